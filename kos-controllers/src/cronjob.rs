//! CronJob Controller (spec component M). Creates Jobs from
//! `spec.job_template` on schedule, honoring concurrency policy and
//! prunes finished Job history.

use async_trait::async_trait;
use chrono::Utc;
use kos_core::kinds::workloads::{ConcurrencyPolicy, CronJob, Job, JobCondition};
use kos_core::{Error, Kind, Object, ObjectMeta, OwnerReference};
use kos_store::FileObjectStore;
use tracing::{debug, error, warn};

use crate::cadence::CRONJOB_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::cron::CronSchedule;
use crate::job;

pub const CRONJOB_NAME_LABEL: &str = "cronjob-name";

pub struct CronJobController {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl CronJobController {
    pub fn new(store: FileObjectStore) -> Self {
        CronJobController { store, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore) -> Result<(), Error> {
    let cronjobs: Vec<CronJob> = store.list(Kind::CronJob, None, None).await?;
    for cronjob in cronjobs {
        if let Err(e) = reconcile_one(store, &cronjob).await {
            error!(cronjob = %cronjob.metadata.name, error = %e, "cronjob reconcile failed");
        }
    }
    Ok(())
}

async fn owned_jobs(store: &FileObjectStore, cronjob: &CronJob) -> Result<Vec<Job>, Error> {
    let all: Vec<Job> = store.list(Kind::Job, cronjob.metadata.namespace.as_deref(), None).await?;
    Ok(kos_store::owned_by(&all, &cronjob.metadata.uid).cloned().collect())
}

async fn reconcile_one(store: &FileObjectStore, cronjob: &CronJob) -> Result<(), Error> {
    if cronjob.spec.suspend {
        return Ok(());
    }

    let schedule = match CronSchedule::parse(&cronjob.spec.schedule) {
        Ok(s) => s,
        Err(e) => {
            warn!(cronjob = %cronjob.metadata.name, error = %e, "invalid cron schedule");
            return Ok(());
        }
    };

    let now = Utc::now();
    let last = cronjob.status.last_schedule_time.unwrap_or(now - chrono::Duration::minutes(1));
    let Some(next) = schedule.next_execution_time(last) else { return Ok(()) };
    if next > now {
        return reap_history(store, cronjob).await;
    }

    if let Some(deadline) = cronjob.spec.starting_deadline_seconds {
        if (now - next).num_seconds() > deadline {
            debug!(cronjob = %cronjob.metadata.name, "missed starting deadline, skipping run");
            return advance_schedule(store, cronjob, next).await;
        }
    }

    let jobs = owned_jobs(store, cronjob).await?;
    let active: Vec<&Job> = jobs.iter().filter(|j| j.status.condition.is_none()).collect();

    if !active.is_empty() {
        match cronjob.spec.concurrency_policy {
            ConcurrencyPolicy::Allow => {}
            ConcurrencyPolicy::Forbid => {
                debug!(cronjob = %cronjob.metadata.name, "skipping run, previous job still active");
                return advance_schedule(store, cronjob, next).await;
            }
            ConcurrencyPolicy::Replace => {
                for j in &active {
                    store.delete(Kind::Job, j.metadata.namespace.as_deref(), &j.metadata.name).await.ok();
                    for pod in job::owned_pods(store, j).await? {
                        store.delete(Kind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name).await.ok();
                    }
                }
            }
        }
    }

    create_job(store, cronjob, next).await?;
    advance_schedule(store, cronjob, next).await?;
    reap_history(store, cronjob).await
}

async fn create_job(store: &FileObjectStore, cronjob: &CronJob, scheduled: chrono::DateTime<Utc>) -> Result<Job, Error> {
    let name = format!("{}-{}", cronjob.metadata.name, scheduled.timestamp());
    let mut meta = ObjectMeta::new(name, cronjob.metadata.namespace.clone());
    meta.labels.insert(CRONJOB_NAME_LABEL.to_string(), cronjob.metadata.name.clone());
    meta.owner_references.push(OwnerReference::controller_of(Kind::CronJob, cronjob.metadata.name.clone(), cronjob.metadata.uid.clone()));

    let job: Job = Object::new(Kind::Job, meta, cronjob.spec.job_template.clone());
    match store.create(job).await {
        Ok(created) => Ok(created),
        Err(Error::AlreadyExists { name, namespace, .. }) => {
            store.get(Kind::Job, namespace.as_deref(), &name).await
        }
        Err(e) => Err(e),
    }
}

async fn advance_schedule(store: &FileObjectStore, cronjob: &CronJob, scheduled: chrono::DateTime<Utc>) -> Result<(), Error> {
    let mut updated = cronjob.clone();
    updated.status.last_schedule_time = Some(scheduled);
    let jobs = owned_jobs(store, cronjob).await?;
    updated.status.active_job_names = jobs.iter().filter(|j| j.status.condition.is_none()).map(|j| j.metadata.name.clone()).collect();
    match store.update(updated).await {
        Ok(_) => Ok(()),
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

async fn reap_history(store: &FileObjectStore, cronjob: &CronJob) -> Result<(), Error> {
    let jobs = owned_jobs(store, cronjob).await?;

    let mut succeeded: Vec<&Job> = jobs.iter().filter(|j| j.status.condition == Some(JobCondition::Complete)).collect();
    succeeded.sort_by(|a, b| a.status.completion_time.cmp(&b.status.completion_time));
    prune_finished(store, &succeeded, cronjob.spec.successful_jobs_history_limit).await?;

    let mut failed: Vec<&Job> = jobs.iter().filter(|j| j.status.condition == Some(JobCondition::Failed)).collect();
    failed.sort_by(|a, b| a.status.completion_time.cmp(&b.status.completion_time));
    prune_finished(store, &failed, cronjob.spec.failed_jobs_history_limit).await?;

    Ok(())
}

async fn prune_finished(store: &FileObjectStore, finished: &[&Job], limit: u32) -> Result<(), Error> {
    if finished.len() as u32 <= limit {
        return Ok(());
    }
    let excess = finished.len() - limit as usize;
    for j in finished.iter().take(excess) {
        store.delete(Kind::Job, j.metadata.namespace.as_deref(), &j.metadata.name).await.ok();
        for pod in job::owned_pods(store, j).await? {
            store.delete(Kind::Pod, pod.metadata.namespace.as_deref(), &pod.metadata.name).await.ok();
        }
    }
    Ok(())
}

#[async_trait]
impl Component for CronJobController {
    fn name(&self) -> &'static str {
        "cronjob-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(CRONJOB_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store).await {
                            error!(error = %e, "cronjob reconcile tick failed");
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
    use kos_core::kinds::workloads::{CronJobSpec, JobSpec};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn cronjob(name: &str, schedule: &str) -> CronJob {
        let spec = CronJobSpec { schedule: schedule.into(), job_template: JobSpec::default(), ..Default::default() };
        Object::new(Kind::CronJob, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn creates_job_when_schedule_is_due() {
        let (store, _dir) = store();
        let mut cj = cronjob("backup", "* * * * *");
        cj.status.last_schedule_time = Some(Utc::now() - chrono::Duration::minutes(2));
        let cj = store.create(cj).await.unwrap();

        reconcile_one(&store, &cj).await.unwrap();

        let jobs: Vec<Job> = store.list(Kind::Job, Some("default"), None).await.unwrap();
        assert_eq!(jobs.len(), 1);
        assert!(jobs[0].metadata.labels.get(CRONJOB_NAME_LABEL).is_some());
    }

    #[tokio::test]
    async fn forbid_policy_skips_run_while_previous_job_active() {
        let (store, _dir) = store();
        let mut cj = cronjob("backup", "* * * * *");
        cj.spec.concurrency_policy = ConcurrencyPolicy::Forbid;
        cj.status.last_schedule_time = Some(Utc::now() - chrono::Duration::minutes(2));
        let cj = store.create(cj).await.unwrap();
        create_job(&store, &cj, Utc::now() - chrono::Duration::minutes(1)).await.unwrap();

        reconcile_one(&store, &cj).await.unwrap();

        let jobs: Vec<Job> = store.list(Kind::Job, Some("default"), None).await.unwrap();
        assert_eq!(jobs.len(), 1, "no new job should have been created");
    }

    #[tokio::test]
    async fn suspended_cronjob_does_nothing() {
        let (store, _dir) = store();
        let mut cj = cronjob("backup", "* * * * *");
        cj.spec.suspend = true;
        let cj = store.create(cj).await.unwrap();

        reconcile_one(&store, &cj).await.unwrap();

        let jobs: Vec<Job> = store.list(Kind::Job, Some("default"), None).await.unwrap();
        assert!(jobs.is_empty());
    }

    #[tokio::test]
    async fn history_pruning_keeps_only_the_limit() {
        let (store, _dir) = store();
        let mut cj = cronjob("backup", "* * * * *");
        cj.spec.successful_jobs_history_limit = 1;
        let cj = store.create(cj).await.unwrap();

        for i in 0..3 {
            let mut j = create_job(&store, &cj, Utc::now() - chrono::Duration::minutes(10 - i)).await.unwrap();
            j.status.condition = Some(JobCondition::Complete);
            j.status.completion_time = Some(Utc::now() - chrono::Duration::minutes(10 - i));
            store.update(j).await.unwrap();
        }

        reap_history(&store, &cj).await.unwrap();

        let jobs: Vec<Job> = store.list(Kind::Job, Some("default"), None).await.unwrap();
        assert_eq!(jobs.len(), 1);
    }
}
