//! Entry point: boots the object store, admission pipeline and every
//! controller under the Lifecycle Supervisor, then serves a small HTTP
//! control surface (healthz/status/component toggles) until SIGTERM.

mod config;
mod http;

use std::sync::Arc;

use dotenv::dotenv;
use kos_admission::Pipeline;
use kos_controllers::component::Component;
use kos_controllers::{cronjob, deployment, dns, events, hpa, job, namespace, node, quota, replicaset, scheduler, service, statefulset, volume, Supervisor};
use kos_store::FileObjectStore;
use tokio_util::sync::CancellationToken;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();
    tracing_subscriber::fmt::init();

    let config = config::Config::from_env();
    info!(root = %config.root.display(), "starting kos control plane");

    let store = FileObjectStore::new(&config.root);
    let pipeline = Arc::new(Pipeline::new(Vec::new(), store.clone()));

    let namespace_controller = Arc::new(namespace::NamespaceController::new(store.clone()));
    let node_registry = Arc::new(node::NodeRegistry::new(store.clone(), config.local_node_name.as_str()));
    let scheduler = Arc::new(scheduler::Scheduler::new(store.clone(), config.scheduler_policy));
    let service_controller = Arc::new(service::ServiceController::new(store.clone(), config.cluster_cidr.as_str(), config.external_cidr.as_deref()));
    let dns_zone = Arc::new(dns::DnsZone::new(store.clone(), config.cluster_domain.as_str()));
    let quota_controller = Arc::new(quota::QuotaController::new(store.clone()));
    let pv_binder = Arc::new(volume::PvBinder::new(store.clone()));

    let replicaset_controller = Arc::new(replicaset::ReplicaSetController::new(store.clone(), pipeline.clone()));
    let deployment_controller = Arc::new(deployment::DeploymentController::new(store.clone()));
    let statefulset_controller = Arc::new(statefulset::StatefulSetController::new(store.clone(), pipeline.clone()));
    let job_controller = Arc::new(job::JobController::new(store.clone(), pipeline.clone()));
    let cronjob_controller = Arc::new(cronjob::CronJobController::new(store.clone()));
    let hpa_controller = Arc::new(hpa::HpaController::new(store.clone(), Arc::new(hpa::NullMetricsSource)));

    let event_recorder = Arc::new(events::EventRecorder::new(store.clone()));

    node_registry
        .register_local_node(config.local_node_capacity, config.local_node_addresses.clone())
        .await?;
    namespace::ensure_namespace(&store, &config.default_namespace).await?;

    let mut supervisor = Supervisor::new();
    supervisor.add_tier(vec![namespace_controller.clone() as Arc<dyn Component>, node_registry.clone() as Arc<dyn Component>]);
    supervisor.add_tier(vec![scheduler.clone() as Arc<dyn Component>]);
    supervisor.add_tier(vec![
        service_controller.clone() as Arc<dyn Component>,
        dns_zone.clone() as Arc<dyn Component>,
        quota_controller.clone() as Arc<dyn Component>,
        pv_binder.clone() as Arc<dyn Component>,
    ]);
    supervisor.add_tier(vec![
        replicaset_controller.clone() as Arc<dyn Component>,
        deployment_controller.clone() as Arc<dyn Component>,
        statefulset_controller.clone() as Arc<dyn Component>,
        job_controller.clone() as Arc<dyn Component>,
        cronjob_controller.clone() as Arc<dyn Component>,
        hpa_controller.clone() as Arc<dyn Component>,
    ]);
    supervisor.add_tier(vec![event_recorder.clone() as Arc<dyn Component>]);

    supervisor.start_all().await?;

    let supervisor = Arc::new(supervisor);
    let healthcheck_cancel = CancellationToken::new();
    let healthcheck_task = {
        let supervisor = supervisor.clone();
        let cancel = healthcheck_cancel.clone();
        tokio::spawn(async move { supervisor.run_healthchecks(cancel).await })
    };

    let state = http::AppState::new(
        vec![
            namespace_controller as Arc<dyn Component>,
            node_registry as Arc<dyn Component>,
            scheduler as Arc<dyn Component>,
            service_controller as Arc<dyn Component>,
            dns_zone as Arc<dyn Component>,
            quota_controller as Arc<dyn Component>,
            pv_binder as Arc<dyn Component>,
            replicaset_controller as Arc<dyn Component>,
            deployment_controller as Arc<dyn Component>,
            statefulset_controller as Arc<dyn Component>,
            job_controller as Arc<dyn Component>,
            cronjob_controller as Arc<dyn Component>,
            hpa_controller as Arc<dyn Component>,
            event_recorder as Arc<dyn Component>,
        ],
        store.clone(),
        pipeline,
    );

    let app = http::router(state);
    let addr = config.http_addr;
    info!(%addr, "control surface listening");

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .with_graceful_shutdown(kos_controllers::supervisor::shutdown_signal())
        .await?;

    healthcheck_cancel.cancel();
    healthcheck_task.await.ok();

    info!("http server stopped, tearing down components");
    supervisor.stop_all().await;

    Ok(())
}
