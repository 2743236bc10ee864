//! Deployment Controller (spec component J). Owns a family of
//! ReplicaSets keyed by template hash and drives the Recreate/
//! RollingUpdate state machines between them.

use async_trait::async_trait;
use kos_core::kinds::workloads::{Deployment, DeploymentStrategyType, ReplicaSet, ReplicaSetSpec};
use kos_core::{Error, Kind, Object, ObjectMeta, OwnerReference};
use kos_store::FileObjectStore;
use tracing::{debug, error};

use crate::cadence::DEPLOYMENT_INTERVAL;
use crate::component::{Component, LoopHandle};
use crate::replicaset;
use crate::template_hash::template_hash;

const TEMPLATE_HASH_LABEL: &str = "kos.local/template-hash";

pub struct DeploymentController {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl DeploymentController {
    pub fn new(store: FileObjectStore) -> Self {
        DeploymentController { store, loop_handle: LoopHandle::new() }
    }
}

async fn reconcile_tick(store: &FileObjectStore) -> Result<(), Error> {
    let deployments: Vec<Deployment> = store.list(Kind::Deployment, None, None).await?;
    for deployment in deployments {
        if let Err(e) = reconcile_one(store, &deployment).await {
            error!(deployment = %deployment.metadata.name, error = %e, "deployment reconcile failed");
        }
    }
    Ok(())
}

async fn owned_replicasets(store: &FileObjectStore, deployment: &Deployment) -> Result<Vec<ReplicaSet>, Error> {
    let all: Vec<ReplicaSet> = store.list(Kind::ReplicaSet, deployment.metadata.namespace.as_deref(), None).await?;
    Ok(kos_store::owned_by(&all, &deployment.metadata.uid).cloned().collect())
}

async fn find_or_create_current(store: &FileObjectStore, deployment: &Deployment, hash: &str) -> Result<ReplicaSet, Error> {
    let owned = owned_replicasets(store, deployment).await?;
    if let Some(existing) = owned.into_iter().find(|rs| rs.metadata.labels.get(TEMPLATE_HASH_LABEL).map(String::as_str) == Some(hash)) {
        return Ok(existing);
    }

    let mut selector = deployment.spec.selector.clone();
    selector.insert(TEMPLATE_HASH_LABEL.to_string(), hash.to_string());
    let mut template = deployment.spec.template.clone();
    template.labels.insert(TEMPLATE_HASH_LABEL.to_string(), hash.to_string());

    let mut meta = ObjectMeta::new(format!("{}-{}", deployment.metadata.name, &hash[..hash.len().min(8)]), deployment.metadata.namespace.clone());
    meta.labels = selector.clone();
    meta.owner_references.push(OwnerReference::controller_of(Kind::Deployment, deployment.metadata.name.clone(), deployment.metadata.uid.clone()));

    let rs: ReplicaSet = Object::new(Kind::ReplicaSet, meta, ReplicaSetSpec { replicas: 0, selector, template });
    match store.create(rs).await {
        Ok(created) => Ok(created),
        Err(Error::AlreadyExists { .. }) => {
            let owned = owned_replicasets(store, deployment).await?;
            owned
                .into_iter()
                .find(|rs| rs.metadata.labels.get(TEMPLATE_HASH_LABEL).map(String::as_str) == Some(hash))
                .ok_or_else(|| Error::Internal("replicaset vanished after AlreadyExists".into()))
        }
        Err(e) => Err(e),
    }
}

async fn reconcile_one(store: &FileObjectStore, deployment: &Deployment) -> Result<(), Error> {
    let hash = template_hash(&deployment.spec.template);
    let current = find_or_create_current(store, deployment, &hash).await?;

    if deployment.spec.paused {
        return update_status(store, deployment, &current, &owned_replicasets(store, deployment).await?).await;
    }

    let owned = owned_replicasets(store, deployment).await?;
    let mut old: Vec<ReplicaSet> = owned.iter().filter(|rs| rs.metadata.uid != current.metadata.uid).cloned().collect();
    old.sort_by(|a, b| a.metadata.creation_timestamp.cmp(&b.metadata.creation_timestamp));

    match deployment.spec.strategy {
        DeploymentStrategyType::Recreate => recreate_step(store, deployment, &current, &old).await?,
        DeploymentStrategyType::RollingUpdate => rolling_update_step(store, deployment, &current, &old).await?,
    }

    prune_old_replicasets(store, deployment, &old).await?;
    let owned_after = owned_replicasets(store, deployment).await?;
    update_status(store, deployment, &current, &owned_after).await
}

async fn recreate_step(store: &FileObjectStore, deployment: &Deployment, current: &ReplicaSet, old: &[ReplicaSet]) -> Result<(), Error> {
    let any_old_active = old.iter().any(|rs| rs.status.replicas > 0);
    if any_old_active {
        for rs in old {
            replicaset::scale_to(store, rs, 0).await?;
        }
    } else {
        replicaset::scale_to(store, current, deployment.spec.replicas).await?;
    }
    Ok(())
}

async fn rolling_update_step(store: &FileObjectStore, deployment: &Deployment, current: &ReplicaSet, old: &[ReplicaSet]) -> Result<(), Error> {
    let desired = deployment.spec.replicas;
    let max_surge = deployment.spec.rolling_update.max_surge;
    let max_unavailable = deployment.spec.rolling_update.max_unavailable;

    let total_desired: u32 = current.spec.replicas + old.iter().map(|rs| rs.spec.replicas).sum::<u32>();
    let surge_room = (desired + max_surge).saturating_sub(total_desired);
    let current_increment = surge_room.min(desired.saturating_sub(current.spec.replicas));
    if current_increment > 0 {
        replicaset::scale_to(store, current, current.spec.replicas + current_increment).await?;
    }

    let total_available: u32 = current.status.available_replicas + old.iter().map(|rs| rs.status.available_replicas).sum::<u32>();
    let min_available = desired.saturating_sub(max_unavailable);
    let mut removal_budget = total_available.saturating_sub(min_available);

    for rs in old {
        if removal_budget == 0 {
            break;
        }
        let decrement = removal_budget.min(rs.spec.replicas);
        if decrement > 0 {
            replicaset::scale_to(store, rs, rs.spec.replicas - decrement).await?;
            removal_budget -= decrement;
        }
    }
    Ok(())
}

async fn prune_old_replicasets(store: &FileObjectStore, deployment: &Deployment, old: &[ReplicaSet]) -> Result<(), Error> {
    let retired: Vec<&ReplicaSet> = old.iter().filter(|rs| rs.spec.replicas == 0 && rs.status.replicas == 0).collect();
    if retired.len() as u32 <= deployment.spec.revision_history_limit {
        return Ok(());
    }
    let excess = retired.len() - deployment.spec.revision_history_limit as usize;
    for rs in retired.iter().take(excess) {
        if let Err(e) = store.delete(Kind::ReplicaSet, rs.metadata.namespace.as_deref(), &rs.metadata.name).await {
            if !matches!(e, Error::NotFound { .. }) {
                return Err(e);
            }
        }
    }
    Ok(())
}

async fn update_status(store: &FileObjectStore, deployment: &Deployment, current: &ReplicaSet, owned: &[ReplicaSet]) -> Result<(), Error> {
    let replicas: u32 = owned.iter().map(|rs| rs.status.replicas).sum();
    let available_replicas: u32 = owned.iter().map(|rs| rs.status.available_replicas).sum();
    let updated_replicas = current.status.replicas;
    let replica_failure = owned.iter().any(|rs| rs.status.replica_failure);
    let progressing = current.status.replicas < deployment.spec.replicas || current.spec.replicas < deployment.spec.replicas;
    let available = available_replicas >= deployment.spec.replicas;

    let mut history = deployment.status.revision_history.clone();
    if !history.contains(&current.metadata.name) {
        history.push(current.metadata.name.clone());
    }

    if deployment.status.replicas == replicas
        && deployment.status.available_replicas == available_replicas
        && deployment.status.updated_replicas == updated_replicas
        && deployment.status.progressing == progressing
        && deployment.status.available == available
        && deployment.status.replica_failure == replica_failure
        && deployment.status.revision_history == history
    {
        return Ok(());
    }

    let mut updated = deployment.clone();
    updated.status.replicas = replicas;
    updated.status.available_replicas = available_replicas;
    updated.status.updated_replicas = updated_replicas;
    updated.status.progressing = progressing;
    updated.status.available = available;
    updated.status.replica_failure = replica_failure;
    updated.status.revision_history = history;

    match store.update(updated).await {
        Ok(_) => {
            debug!(deployment = %deployment.metadata.name, replicas, available_replicas, "deployment status updated");
            Ok(())
        }
        Err(Error::Conflict { .. }) => Ok(()),
        Err(e) => Err(e),
    }
}

#[async_trait]
impl Component for DeploymentController {
    fn name(&self) -> &'static str {
        "deployment-controller"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(DEPLOYMENT_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = reconcile_tick(&store).await {
                            error!(error = %e, "deployment reconcile tick failed");
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
    use kos_core::kinds::workloads::{DeploymentSpec, RollingUpdateSpec};

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn deployment(name: &str, replicas: u32) -> Deployment {
        let spec = DeploymentSpec {
            replicas,
            rolling_update: RollingUpdateSpec { max_surge: 1, max_unavailable: 1 },
            ..Default::default()
        };
        Object::new(Kind::Deployment, ObjectMeta::new(name, Some("default".into())), spec)
    }

    #[tokio::test]
    async fn first_reconcile_creates_zero_replica_replicaset() {
        let (store, _dir) = store();
        let deployment = store.create(deployment("web", 3)).await.unwrap();

        reconcile_one(&store, &deployment).await.unwrap();

        let rses: Vec<ReplicaSet> = store.list(Kind::ReplicaSet, Some("default"), None).await.unwrap();
        assert_eq!(rses.len(), 1);
        assert!(rses[0].spec.replicas > 0, "first reconcile should have surged the new RS up");
    }

    #[tokio::test]
    async fn rolling_update_respects_surge_budget() {
        let (store, _dir) = store();
        let deployment = store.create(deployment("web", 4)).await.unwrap();
        let hash = template_hash(&deployment.spec.template);
        let current = find_or_create_current(&store, &deployment, &hash).await.unwrap();

        rolling_update_step(&store, &deployment, &current, &[]).await.unwrap();

        let updated: ReplicaSet = store.get(Kind::ReplicaSet, Some("default"), &current.metadata.name).await.unwrap();
        assert!(updated.spec.replicas <= deployment.spec.replicas + deployment.spec.rolling_update.max_surge);
    }
}
