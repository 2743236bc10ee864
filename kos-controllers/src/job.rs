//! Job Controller (spec component L). Drives Pods to `completions`,
//! respecting `backoffLimit`, `activeDeadlineSeconds` and
//! `ttlSecondsAfterFinished`.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use kos_admission::Pipeline;
use kos_core::kinds::event::{EventType, InvolvedObjectRef};
use kos_core::kinds::pod::{Pod, PodPhase, PodSpec, RestartPolicy};
use kos_core::kinds::workloads::{Job, JobCondition};
use kos_core::{Error, Kind, Object, ObjectMeta, OwnerReference};
use kos_store::FileObjectStore;
use tracing::{debug, error};

use crate::cadence::JOB_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::events;
use crate::pod_admission::admit_and_create_pod;

pub const JOB_NAME_LABEL: &str = "job-name";

pub struct JobController {
    store: FileObjectStore,
    pipeline: Arc<Pipeline>,
    loop_handle: LoopHandle,
}

impl JobController {
    pub fn new(store: FileObjectStore, pipeline: Arc<Pipeline>) -> Self {
        JobController { store, pipeline, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore, pipeline: &Pipeline) -> Result<(), Error> {
    let jobs: Vec<Job> = store.list(Kind::Job, None, None).await?;
    for job in jobs {
        if let Err(e) = reconcile_one(store, pipeline, &job).await {
            error!(job = %job.metadata.name, error = %e, "job reconcile failed");
        }
    }
    Ok(())
}

pub async fn owned_pods(store: &FileObjectStore, job: &Job) -> Result<Vec<Pod>, Error> {
    let all: Vec<Pod> = store.list(Kind::Pod, job.metadata.namespace.as_deref(), None).await?;
    Ok(kos_store::owned_by(&all, &job.metadata.uid).cloned().collect())
}

async fn reconcile_one(store: &FileObjectStore, pipeline: &Pipeline, job: &Job) -> Result<(), Error> {
    if job.status.condition.is_some() {
        return maybe_gc(store, job).await;
    }

    let mut updated = job.clone();
    let now = Utc::now();
    if updated.status.start_time.is_none() {
        updated.status.start_time = Some(now);
    }

    let pods = owned_pods(store, job).await?;
    let active = pods.iter().filter(|p| matches!(p.status.phase, PodPhase::Pending | PodPhase::Running)).count() as u32;
    let succeeded = pods.iter().filter(|p| p.status.phase == PodPhase::Succeeded).count() as u32;
    let failed = pods.iter().filter(|p| p.status.phase == PodPhase::Failed).count() as u32;

    updated.status.active = active;
    updated.status.succeeded = succeeded;
    updated.status.failed = failed;

    if let (Some(deadline), Some(start)) = (job.spec.active_deadline_seconds, updated.status.start_time) {
        if (now - start).num_seconds() >= deadline {
            updated.status.condition = Some(JobCondition::Failed);
            updated.status.reason = Some("DeadlineExceeded".to_string());
            store.update(updated).await?;
            record_event(store, job, EventType::Warning, "DeadlineExceeded", "job passed its activeDeadlineSeconds").await;
            return Ok(());
        }
    }

    if succeeded >= job.spec.completions {
        updated.status.condition = Some(JobCondition::Complete);
        updated.status.completion_time = Some(now);
        store.update(updated).await?;
        record_event(store, job, EventType::Normal, "Completed", &format!("{succeeded} pods succeeded")).await;
        return Ok(());
    }

    if failed > job.spec.backoff_limit {
        updated.status.condition = Some(JobCondition::Failed);
        updated.status.reason = Some("BackoffLimitExceeded".to_string());
        store.update(updated).await?;
        record_event(store, job, EventType::Warning, "BackoffLimitExceeded", &format!("{failed} pods failed")).await;
        return Ok(());
    }

    let to_launch = job.spec.parallelism.min(job.spec.completions.saturating_sub(succeeded)).saturating_sub(active);
    for _ in 0..to_launch {
        launch_pod(store, pipeline, job).await?;
    }

    match store.update(updated).await {
        Ok(_) => Ok(()),
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn record_event(store: &FileObjectStore, job: &Job, event_type: EventType, reason: &str, message: &str) {
    let involved = InvolvedObjectRef {
        kind: Kind::Job,
        namespace: job.metadata.namespace.clone(),
        name: job.metadata.name.clone(),
        uid: job.metadata.uid.clone(),
    };
    if let Err(e) = events::record(store, involved, event_type, reason, message).await {
        error!(job = %job.metadata.name, error = %e, "failed to record job event");
    }
}

async fn launch_pod(store: &FileObjectStore, pipeline: &Pipeline, job: &Job) -> Result<Pod, Error> {
    let name = format!("{}-{}", job.metadata.name, short_random());
    let mut meta = ObjectMeta::new(name, job.metadata.namespace.clone());
    meta.labels = job.spec.template.labels.clone();
    meta.labels.insert(JOB_NAME_LABEL.to_string(), job.metadata.name.clone());
    meta.annotations = job.spec.template.annotations.clone();
    meta.owner_references.push(OwnerReference::controller_of(Kind::Job, job.metadata.name.clone(), job.metadata.uid.clone()));

    let mut spec: PodSpec = job.spec.template.spec.clone();
    spec.restart_policy = RestartPolicy::Never;

    let pod: Pod = Object::new(Kind::Pod, meta, spec);
    admit_and_create_pod(store, pipeline, pod).await
}

fn short_random() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..5].to_string()
}

async fn maybe_gc(store: &FileObjectStore, job: &Job) -> Result<(), Error> {
    let Some(ttl) = job.spec.ttl_seconds_after_finished else { return Ok(()) };
    let Some(completion) = job.status.completion_time else { return Ok(()) };
    if (Utc::now() - completion).num_seconds() < ttl {
        return Ok(());
    }
    debug!(job = %job.metadata.name, "ttl elapsed, deleting finished job");
    match store.delete(Kind::Job, job.metadata.namespace.as_deref(), &job.metadata.name).await {
        Ok(()) | Err(Error::NotFound { .. }) => {}
        Err(e) => return Err(e),
    }
    for pod in owned_pods(store, job).await? {
        store.delete(Kind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name).await.ok();
    }
    Ok(())
}

#[async_trait]
impl Component for JobController {
    fn name(&self) -> &'static str {
        "job-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let pipeline = self.pipeline.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(JOB_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store, &pipeline).await {
                            error!(error = %e, "job reconcile tick failed");
                        }
                    }
                }
            }
        });
        self.loop_handle.spawn(self.name(), handle).await;
        Ok(())
    }

    async fn stop(&self) -> Result<(), Error> {
        self.loop_handle.stop(self.name()).await;
        Ok(())
    }

    async fn healthy(&self) -> bool {
        self.loop_handle.is_alive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::namespace::Namespace;
    use kos_core::kinds::workloads::JobSpec;

    async fn store() -> (FileObjectStore, Pipeline, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let store = FileObjectStore::new(dir.path());
        let ns: Namespace = Object::new(Kind::Namespace, ObjectMeta::new("default", None), Default::default());
        store.create(ns).await.unwrap();
        let pipeline = Pipeline::new(Vec::new(), store.clone());
        (store, pipeline, dir)
    }

    fn job(name: &str, completions: u32, parallelism: u32) -> Job {
        let spec = JobSpec { parallelism, completions, ..Default::default() };
        Object::new(Kind::Job, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn launches_up_to_parallelism() {
        let (store, pipeline, _dir) = store().await;
        let j = store.create(job("batch", 5, 2)).await.unwrap();

        reconcile_one(&store, &pipeline, &j).await.unwrap();

        let pods: Vec<Pod> = store.list(Kind::Pod, Some("default"), None).await.unwrap();
        assert_eq!(pods.len(), 2);
        assert!(pods.iter().all(|p| p.spec.restart_policy == RestartPolicy::Never));
    }

    #[tokio::test]
    async fn completes_when_succeeded_reaches_completions() {
        let (store, pipeline, _dir) = store().await;
        let mut j = store.create(job("batch", 1, 1)).await.unwrap();
        let pod = launch_pod(&store, &pipeline, &j).await.unwrap();
        let mut succeeded_pod = pod.clone();
        succeeded_pod.status.phase = PodPhase::Succeeded;
        store.update(succeeded_pod).await.unwrap();
        j.status.start_time = Some(Utc::now());

        reconcile_one(&store, &pipeline, &j).await.unwrap();

        let updated: Job = store.get(Kind::Job, Some("default"), "batch").await.unwrap();
        assert_eq!(updated.status.condition, Some(JobCondition::Complete));
    }
}
