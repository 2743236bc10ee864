//! Admission pipeline: built-in validation rules plus an external webhook
//! stage, run on every create/update before the store mutates.

pub mod rules;
pub mod webhook;

use std::time::Duration;

use kos_core::kinds::pod::{Pod, PodSpec};
use kos_core::kinds::secret::Secret;
use kos_core::kinds::service::Service;
use kos_core::kinds::volume::PersistentVolumeClaim;
use kos_core::kinds::workloads::{Deployment, StatefulSet};
use kos_core::{Error, Kind};
use kos_store::FileObjectStore;
use serde::Serialize;
use tracing::debug;

pub use webhook::{FailurePolicy, Operation, WebhookConfig};

/// Ordered list of webhooks, grouped by nothing in particular: the source
/// runs every registered webhook for every kind, letting each webhook's own
/// logic decide whether it cares about the object. Also holds the store
/// handle needed to reject writes into a namespace that doesn't exist.
pub struct Pipeline {
    webhooks: Vec<WebhookConfig>,
    http: reqwest::Client,
    store: FileObjectStore,
}

impl Pipeline {
    pub fn new(webhooks: Vec<WebhookConfig>, store: FileObjectStore) -> Self {
        Pipeline { webhooks, http: reqwest::Client::new(), store }
    }

    pub fn register_webhook(&mut self, webhook: WebhookConfig) {
        self.webhooks.push(webhook);
    }

    pub async fn admit_pod(&self, pod: &Pod, operation: Operation) -> Result<(), Error> {
        self.check_namespace(pod.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&pod.metadata.name)?;
        pod_spec_rules(&pod.spec)?;
        self.run_webhooks("Pod", pod.metadata.namespace.as_deref(), operation, pod).await
    }

    pub async fn admit_service(&self, service: &Service, operation: Operation) -> Result<(), Error> {
        self.check_namespace(service.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&service.metadata.name)?;
        rules::service_ports(&service.spec.ports)?;
        self.run_webhooks("Service", service.metadata.namespace.as_deref(), operation, service).await
    }

    pub async fn admit_deployment(&self, deployment: &Deployment, operation: Operation) -> Result<(), Error> {
        self.check_namespace(deployment.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&deployment.metadata.name)?;
        rules::replicas_nonnegative(deployment.spec.replicas)?;
        pod_spec_rules(&deployment.spec.template.spec)?;
        self.run_webhooks("Deployment", deployment.metadata.namespace.as_deref(), operation, deployment).await
    }

    pub async fn admit_stateful_set(&self, sts: &StatefulSet, operation: Operation) -> Result<(), Error> {
        self.check_namespace(sts.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&sts.metadata.name)?;
        rules::replicas_nonnegative(sts.spec.replicas)?;
        rules::stateful_set_service_name(&sts.spec.service_name)?;
        pod_spec_rules(&sts.spec.template.spec)?;
        self.run_webhooks("StatefulSet", sts.metadata.namespace.as_deref(), operation, sts).await
    }

    pub async fn admit_pvc(&self, pvc: &PersistentVolumeClaim, operation: Operation) -> Result<(), Error> {
        self.check_namespace(pvc.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&pvc.metadata.name)?;
        rules::pvc_size(&pvc.spec)?;
        self.run_webhooks("PersistentVolumeClaim", pvc.metadata.namespace.as_deref(), operation, pvc).await
    }

    /// `SecretSpec::secret_type` is a closed Rust enum, so an unrecognised
    /// `type` string is already rejected at deserialization — the
    /// equivalent runtime check the source's dynamically-typed `secret.py`
    /// needs is subsumed by the type system here. Only the name is left to
    /// validate.
    pub async fn admit_secret(&self, secret: &Secret, operation: Operation) -> Result<(), Error> {
        self.check_namespace(secret.metadata.namespace.as_deref()).await?;
        rules::name_dns1123(&secret.metadata.name)?;
        self.run_webhooks("Secret", secret.metadata.namespace.as_deref(), operation, secret).await
    }

    /// Every namespaced write checks the target namespace already exists
    /// and isn't mid-teardown; cluster-scoped kinds never call this.
    async fn check_namespace(&self, namespace: Option<&str>) -> Result<(), Error> {
        let Some(ns) = namespace else { return Ok(()) };
        if !self.store.exists(Kind::Namespace, None, ns).await {
            return Err(Error::Invalid(format!("namespace \"{ns}\" does not exist")));
        }
        Ok(())
    }

    async fn run_webhooks<T: Serialize>(
        &self,
        kind: &str,
        namespace: Option<&str>,
        operation: Operation,
        object: &T,
    ) -> Result<(), Error> {
        if self.webhooks.is_empty() {
            return Ok(());
        }
        let object_json = serde_json::to_value(object).map_err(|e| Error::Internal(format!("encoding object for webhook: {e}")))?;
        for webhook in &self.webhooks {
            debug!(webhook = %webhook.name, kind, "calling admission webhook");
            webhook::call(&self.http, webhook, kind, namespace, operation, &object_json).await?;
        }
        Ok(())
    }
}

fn pod_spec_rules(spec: &PodSpec) -> Result<(), Error> {
    rules::pod_resources(spec)?;
    rules::pod_image(spec)?;
    Ok(())
}

pub fn default_webhook_timeout() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::namespace::Namespace;
    use kos_core::kinds::pod::PodSpec;
    use kos_core::{Object, ObjectMeta};

    fn pipeline() -> (Pipeline, FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        (Pipeline::new(Vec::new(), store.clone()), store, dir)
    }

    fn pod(name: &str, namespace: &str) -> Pod {
        Object::new(Kind::Pod, ObjectMeta::new(name, Some(namespace.to_string())), PodSpec::default())
    }

    #[tokio::test]
    async fn rejects_write_into_nonexistent_namespace() {
        let (pipeline, _store, _dir) = pipeline();
        let err = pipeline.admit_pod(&pod("web", "missing"), Operation::Create).await.unwrap_err();
        assert!(matches!(err, Error::Invalid(_)));
    }

    #[tokio::test]
    async fn admits_write_into_existing_namespace() {
        let (pipeline, store, _dir) = pipeline();
        let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new("default", None), Default::default());
        store.create(ns).await.unwrap();

        pipeline.admit_pod(&pod("web", "default"), Operation::Create).await.unwrap();
    }
}
