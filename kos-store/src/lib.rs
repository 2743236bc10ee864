//! File-based Object Store. Each object is a JSON document at
//! `<root>/<kind>s/<namespace>/<name>.json`; writes are atomic per object
//! (write to a temp file, then rename) and serialized through a per-path
//! lock so two writers never interleave the same file.

mod path;
pub mod secret_data;
pub mod secret_store;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use kos_core::{Error, Kind, Object, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, Mutex};
use tracing::debug;

pub use path::{kind_dir, namespace_dir, object_path, secret_data_dir};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventType {
    Created,
    Updated,
    Deleted,
}

#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
    pub event_type: WatchEventType,
}

/// The object store. Cheap to clone (an `Arc` around the shared lock map
/// and broadcast sender); controllers each hold a clone.
#[derive(Clone)]
pub struct FileObjectStore {
    root: PathBuf,
    locks: Arc<Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>>,
    watch_tx: broadcast::Sender<WatchEvent>,
}

impl FileObjectStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let (watch_tx, _rx) = broadcast::channel(1024);
        FileObjectStore { root: root.into(), locks: Arc::new(Mutex::new(HashMap::new())), watch_tx }
    }

    pub fn root(&self) -> &std::path::Path {
        &self.root
    }

    pub fn watch(&self) -> broadcast::Receiver<WatchEvent> {
        self.watch_tx.subscribe()
    }

    async fn lock_for(&self, path: &std::path::Path) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(path.to_path_buf()).or_insert_with(|| Arc::new(Mutex::new(()))).clone()
    }

    pub async fn get<S: DeserializeOwned, St: DeserializeOwned>(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        name: &str,
    ) -> Result<Object<S, St>> {
        let path = object_path(&self.root, kind, namespace, name);
        read_object(&path, kind, namespace, name).await
    }

    pub async fn list<S: DeserializeOwned, St: DeserializeOwned>(
        &self,
        kind: Kind,
        namespace: Option<&str>,
        label_selector: Option<&HashMap<String, String>>,
    ) -> Result<Vec<Object<S, St>>> {
        let dir = namespace_dir(&self.root, kind, namespace);
        let mut out = Vec::new();
        let mut entries = match tokio::fs::read_dir(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(out),
            Err(e) => return Err(Error::Internal(format!("reading {}: {e}", dir.display()))),
        };
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| Error::Internal(format!("reading {}: {e}", dir.display())))?
        {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| Error::Internal(format!("reading {}: {e}", path.display())))?;
            let obj: Object<S, St> = serde_json::from_slice(&bytes)
                .map_err(|e| Error::Internal(format!("decoding {}: {e}", path.display())))?;
            if let Some(selector) = label_selector {
                if !kos_core::selector::matches(selector, &obj.metadata.labels) {
                    continue;
                }
            }
            out.push(obj);
        }
        out.sort_by(|a: &Object<S, St>, b: &Object<S, St>| a.metadata.name.cmp(&b.metadata.name));
        Ok(out)
    }

    /// Assigns uid (if missing), generation=1, resourceVersion=1.
    /// Fails with `AlreadyExists` if the object already exists on disk.
    pub async fn create<S: Serialize, St: Serialize>(&self, mut obj: Object<S, St>) -> Result<Object<S, St>> {
        let kind = obj.kind;
        let namespace = obj.metadata.namespace.clone();
        let name = obj.metadata.name.clone();
        let path = object_path(&self.root, kind, namespace.as_deref(), &name);
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        if tokio::fs::metadata(&path).await.is_ok() {
            return Err(Error::already_exists(kind.as_str(), namespace, name));
        }

        obj.metadata.assign_uid_if_missing();
        obj.metadata.generation = 1;
        obj.metadata.resource_version = 1;

        write_object_atomic(&path, &obj).await?;
        debug!(kind = kind.as_str(), name = %obj.metadata.name, "created object");
        let _ = self.watch_tx.send(WatchEvent {
            kind,
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone(),
            event_type: WatchEventType::Created,
        });
        Ok(obj)
    }

    /// Optimistic-concurrency update: `obj.metadata.resource_version` must
    /// equal the version currently on disk or this fails with `Conflict`.
    /// `generation` is bumped only when `spec` changes; callers that only
    /// touch `status` should preserve the incoming generation.
    pub async fn update<S, St>(&self, mut obj: Object<S, St>) -> Result<Object<S, St>>
    where
        S: Serialize + DeserializeOwned + PartialEq,
        St: Serialize + DeserializeOwned,
    {
        let kind = obj.kind;
        let namespace = obj.metadata.namespace.clone();
        let name = obj.metadata.name.clone();
        let path = object_path(&self.root, kind, namespace.as_deref(), &name);
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        let current: Object<S, St> = read_object(&path, kind, namespace.as_deref(), &name).await?;
        if current.metadata.resource_version != obj.metadata.resource_version {
            return Err(Error::Conflict {
                kind: kind.as_str().to_string(),
                name,
                expected: obj.metadata.resource_version,
                actual: current.metadata.resource_version,
            });
        }

        if current.spec != obj.spec {
            obj.metadata.generation = current.metadata.generation + 1;
        }
        obj.metadata.resource_version = current.metadata.resource_version + 1;
        obj.metadata.uid = current.metadata.uid;
        obj.metadata.creation_timestamp = current.metadata.creation_timestamp;

        write_object_atomic(&path, &obj).await?;
        let _ = self.watch_tx.send(WatchEvent {
            kind,
            namespace: obj.metadata.namespace.clone(),
            name: obj.metadata.name.clone(),
            event_type: WatchEventType::Updated,
        });
        Ok(obj)
    }

    pub async fn delete(&self, kind: Kind, namespace: Option<&str>, name: &str) -> Result<()> {
        let path = object_path(&self.root, kind, namespace, name);
        let lock = self.lock_for(&path).await;
        let _guard = lock.lock().await;

        match tokio::fs::remove_file(&path).await {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(Error::not_found(kind.as_str(), namespace.map(String::from), name));
            }
            Err(e) => return Err(Error::Internal(format!("deleting {}: {e}", path.display()))),
        }
        let _ = self.watch_tx.send(WatchEvent {
            kind,
            namespace: namespace.map(String::from),
            name: name.to_string(),
            event_type: WatchEventType::Deleted,
        });
        Ok(())
    }

    pub async fn exists(&self, kind: Kind, namespace: Option<&str>, name: &str) -> bool {
        tokio::fs::metadata(object_path(&self.root, kind, namespace, name)).await.is_ok()
    }
}

async fn read_object<S: DeserializeOwned, St: DeserializeOwned>(
    path: &std::path::Path,
    kind: Kind,
    namespace: Option<&str>,
    name: &str,
) -> Result<Object<S, St>> {
    let bytes = match tokio::fs::read(path).await {
        Ok(b) => b,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(Error::not_found(kind.as_str(), namespace.map(String::from), name))
        }
        Err(e) => return Err(Error::Internal(format!("reading {}: {e}", path.display()))),
    };
    serde_json::from_slice(&bytes).map_err(|e| Error::Internal(format!("decoding {}: {e}", path.display())))
}

/// Writes via a temp file in the same directory then renames over the
/// target, so a reader never observes a partially written document.
async fn write_object_atomic<S: Serialize, St: Serialize>(path: &std::path::Path, obj: &Object<S, St>) -> Result<()> {
    let dir = path.parent().ok_or_else(|| Error::Internal("object path has no parent".into()))?;
    tokio::fs::create_dir_all(dir).await.map_err(|e| Error::Internal(format!("creating {}: {e}", dir.display())))?;

    let body = serde_json::to_vec_pretty(obj).map_err(|e| Error::Internal(format!("encoding object: {e}")))?;
    let tmp_path = dir.join(format!(".{}.tmp", uuid::Uuid::new_v4()));
    tokio::fs::write(&tmp_path, &body)
        .await
        .map_err(|e| Error::Internal(format!("writing {}: {e}", tmp_path.display())))?;
    if let Err(e) = tokio::fs::rename(&tmp_path, path).await {
        let _ = tokio::fs::remove_file(&tmp_path).await;
        return Err(Error::Internal(format!("renaming into {}: {e}", path.display())));
    }
    Ok(())
}

/// Cascade GC: given a deleted owner's (kind, uid), the caller passes every
/// remaining object of a dependent kind through this filter to find which
/// ones must also be deleted. Kept here (rather than in `kos-controllers`)
/// since it only needs `ObjectMeta`, not any controller state.
pub fn owned_by<'a, S, St>(objects: &'a [Object<S, St>], owner_uid: &str) -> impl Iterator<Item = &'a Object<S, St>> {
    objects.iter().filter(move |o| o.metadata.is_controlled_by(owner_uid))
}

#[cfg(test)]
mod tests {
    use super::*;
    use kos_core::kinds::pod::{Pod, PodSpec, PodStatus};
    use kos_core::ObjectMeta;

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn pod(name: &str, ns: &str) -> Object<PodSpec, PodStatus> {
        Object::new(Kind::Pod, ObjectMeta::new(name, Some(ns.to_string())), PodSpec::default())
    }

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let (store, _dir) = store();
        let created = store.create(pod("web", "default")).await.unwrap();
        assert!(!created.metadata.uid.is_empty());
        assert_eq!(created.metadata.resource_version, 1);

        let fetched: Pod = store.get(Kind::Pod, Some("default"), "web").await.unwrap();
        assert_eq!(fetched.metadata.uid, created.metadata.uid);
    }

    #[tokio::test]
    async fn create_twice_conflicts() {
        let (store, _dir) = store();
        store.create(pod("web", "default")).await.unwrap();
        let err = store.create(pod("web", "default")).await.unwrap_err();
        assert!(matches!(err, Error::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn update_with_stale_resource_version_conflicts() {
        let (store, _dir) = store();
        let created = store.create(pod("web", "default")).await.unwrap();
        store.update(created.clone()).await.unwrap();
        let err = store.update(created).await.unwrap_err();
        assert!(matches!(err, Error::Conflict { .. }));
    }

    #[tokio::test]
    async fn delete_removes_object() {
        let (store, _dir) = store();
        store.create(pod("web", "default")).await.unwrap();
        store.delete(Kind::Pod, Some("default"), "web").await.unwrap();
        let err: Error = store.get::<PodSpec, PodStatus>(Kind::Pod, Some("default"), "web").await.unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn list_filters_by_label_selector() {
        let (store, _dir) = store();
        let mut a = pod("a", "default");
        a.metadata.labels.insert("app".into(), "web".into());
        let mut b = pod("b", "default");
        b.metadata.labels.insert("app".into(), "db".into());
        store.create(a).await.unwrap();
        store.create(b).await.unwrap();

        let selector: HashMap<String, String> = [("app".to_string(), "web".to_string())].into();
        let found: Vec<Pod> = store.list(Kind::Pod, Some("default"), Some(&selector)).await.unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].metadata.name, "a");
    }

    #[tokio::test]
    async fn cluster_scoped_kind_drops_namespace_segment() {
        use kos_core::kinds::node::{NodeSpec, NodeStatus};
        let (store, dir) = store();
        let node = Object::<NodeSpec, NodeStatus>::new(Kind::Node, ObjectMeta::new("node-1", None), NodeSpec::default());
        store.create(node).await.unwrap();
        assert!(dir.path().join("Nodes").join("node-1.json").exists());
    }
}
