//! Control surface: health/status introspection, manual component
//! start/stop over the Lifecycle Supervisor's `Component` trait, and the
//! write paths this binary exposes directly for whichever out-of-scope
//! front-end talks to this process. Every write goes through the
//! admission pipeline first; Pod writes additionally go through quota.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use kos_admission::{Operation, Pipeline};
use kos_core::kinds::pod::Pod;
use kos_core::kinds::secret::Secret;
use kos_core::kinds::service::Service;
use kos_core::kinds::volume::PersistentVolumeClaim;
use kos_core::kinds::workloads::{Deployment, StatefulSet};
use kos_core::Error;
use kos_controllers::component::Component;
use kos_controllers::pod_admission::admit_and_create_pod;
use kos_store::FileObjectStore;
use serde::Serialize;
use tower_http::compression::CompressionLayer;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

#[derive(Clone)]
pub struct AppState {
    components: Arc<HashMap<&'static str, Arc<dyn Component>>>,
    store: FileObjectStore,
    pipeline: Arc<Pipeline>,
}

impl AppState {
    pub fn new(components: Vec<Arc<dyn Component>>, store: FileObjectStore, pipeline: Arc<Pipeline>) -> Self {
        let map = components.into_iter().map(|c| (c.name(), c)).collect();
        AppState { components: Arc::new(map), store, pipeline }
    }
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
}

#[derive(Serialize)]
struct ComponentStatus {
    name: &'static str,
    healthy: bool,
}

#[derive(Serialize)]
struct StatusResponse {
    components: Vec<ComponentStatus>,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/status", get(status))
        .route("/components/:name/enable", post(enable_component))
        .route("/components/:name/disable", post(disable_component))
        .route("/api/v1/namespaces/:namespace/pods", post(create_pod))
        .route("/api/v1/namespaces/:namespace/services", post(create_service))
        .route("/apis/apps/v1/namespaces/:namespace/deployments", post(create_deployment))
        .route("/apis/apps/v1/namespaces/:namespace/statefulsets", post(create_stateful_set))
        .route("/api/v1/namespaces/:namespace/persistentvolumeclaims", post(create_pvc))
        .route("/api/v1/namespaces/:namespace/secrets", post(create_secret))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .layer(CompressionLayer::new())
        .with_state(state)
}

async fn healthz() -> impl IntoResponse {
    Json(HealthResponse { status: "ok" })
}

async fn status(State(state): State<AppState>) -> impl IntoResponse {
    let mut components = Vec::new();
    for component in state.components.values() {
        components.push(ComponentStatus { name: component.name(), healthy: component.healthy().await });
    }
    components.sort_by_key(|c| c.name);
    Json(StatusResponse { components })
}

async fn enable_component(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.components.get(name.as_str()) {
        Some(component) => match component.start().await {
            Ok(()) => StatusCode::OK,
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        None => StatusCode::NOT_FOUND,
    }
}

async fn disable_component(State(state): State<AppState>, Path(name): Path<String>) -> impl IntoResponse {
    match state.components.get(name.as_str()) {
        Some(component) => match component.stop().await {
            Ok(()) => StatusCode::OK,
            Err(_) => StatusCode::INTERNAL_SERVER_ERROR,
        },
        None => StatusCode::NOT_FOUND,
    }
}

async fn create_pod(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut pod): Json<Pod>) -> impl IntoResponse {
    pod.metadata.namespace = Some(namespace);
    match admit_and_create_pod(&state.store, &state.pipeline, pod).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_service(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut service): Json<Service>) -> impl IntoResponse {
    service.metadata.namespace = Some(namespace);
    if let Err(e) = state.pipeline.admit_service(&service, Operation::Create).await {
        return error_response(&e);
    }
    match state.store.create(service).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_deployment(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut deployment): Json<Deployment>) -> impl IntoResponse {
    deployment.metadata.namespace = Some(namespace);
    if let Err(e) = state.pipeline.admit_deployment(&deployment, Operation::Create).await {
        return error_response(&e);
    }
    match state.store.create(deployment).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_stateful_set(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut sts): Json<StatefulSet>) -> impl IntoResponse {
    sts.metadata.namespace = Some(namespace);
    if let Err(e) = state.pipeline.admit_stateful_set(&sts, Operation::Create).await {
        return error_response(&e);
    }
    match state.store.create(sts).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_pvc(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut pvc): Json<PersistentVolumeClaim>) -> impl IntoResponse {
    pvc.metadata.namespace = Some(namespace);
    if let Err(e) = state.pipeline.admit_pvc(&pvc, Operation::Create).await {
        return error_response(&e);
    }
    match state.store.create(pvc).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

async fn create_secret(State(state): State<AppState>, Path(namespace): Path<String>, Json(mut secret): Json<Secret>) -> impl IntoResponse {
    secret.metadata.namespace = Some(namespace);
    if let Err(e) = state.pipeline.admit_secret(&secret, Operation::Create).await {
        return error_response(&e);
    }
    match state.store.create(secret).await {
        Ok(created) => (StatusCode::CREATED, Json(created)).into_response(),
        Err(e) => error_response(&e),
    }
}

fn error_response(error: &Error) -> axum::response::Response {
    let status = match error {
        Error::NotFound { .. } => StatusCode::NOT_FOUND,
        Error::AlreadyExists { .. } | Error::Conflict { .. } => StatusCode::CONFLICT,
        Error::Invalid(_) | Error::Quota(_) => StatusCode::UNPROCESSABLE_ENTITY,
        Error::Timeout(_) => StatusCode::GATEWAY_TIMEOUT,
        Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, error.to_string()).into_response()
}
