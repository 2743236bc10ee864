//! Event Recorder (spec component O). Coalesces repeated events on the
//! same (involved object, reason, type) within a window instead of
//! growing the store unboundedly, and prunes old history in the
//! background.

use async_trait::async_trait;
use chrono::Utc;
use kos_core::kinds::event::{Event, EventSpec, EventStatus, EventType, InvolvedObjectRef};
use kos_core::{Error, Kind, Object, ObjectMeta};
use kos_store::FileObjectStore;
use tracing::error;

use crate::cadence::{EVENT_COALESCE_WINDOW, EVENT_NORMAL_TTL, EVENT_PRUNE_INTERVAL, EVENT_WARNING_TTL};
use crate::component::{Component, LoopHandle};

pub struct EventRecorder {
    store: FileObjectStore,
    loop_handle: LoopHandle,
}

impl EventRecorder {
    pub fn new(store: FileObjectStore) -> Self {
        EventRecorder { store, loop_handle: LoopHandle::new() }
    }

    pub async fn record(&self, involved: InvolvedObjectRef, event_type: EventType, reason: &str, message: &str) -> Result<Event, Error> {
        record(&self.store, involved, event_type, reason, message).await
    }
}

pub async fn record(store: &FileObjectStore, involved: InvolvedObjectRef, event_type: EventType, reason: &str, message: &str) -> Result<Event, Error> {
    let ns = involved.namespace.clone();
    let existing: Vec<Event> = store.list(Kind::Event, ns.as_deref(), None).await?;
    let now = Utc::now();

    let recent = existing.into_iter().find(|e| {
        e.spec.involved_object.uid == involved.uid
            && e.spec.reason == reason
            && e.spec.event_type == event_type
            && e.status.last_timestamp.map(|t| now - t <= EVENT_COALESCE_WINDOW).unwrap_or(false)
    });

    if let Some(mut event) = recent {
        event.spec.message = message.to_string();
        event.status.count += 1;
        event.status.last_timestamp = Some(now);
        return store.update(event).await;
    }

    let spec = EventSpec { involved_object: involved, reason: reason.to_string(), message: message.to_string(), event_type, source: "kos-controllers".to_string() };
    let status = EventStatus { first_timestamp: Some(now), last_timestamp: Some(now), count: 1 };
    let name = format!("{}-{}", reason.to_ascii_lowercase(), uuid::Uuid::new_v4().simple().to_string()[..8].to_string());
    let meta = ObjectMeta::new(name, ns);
    let mut event: Event = Object::new(Kind::Event, meta, spec);
    event.status = status;
    store.create(event).await
}

async fn prune_tick(store: &FileObjectStore) -> Result<(), Error> {
    let events: Vec<Event> = store.list(Kind::Event, None, None).await?;
    let now = Utc::now();
    for event in events {
        let Some(last) = event.status.last_timestamp else { continue };
        let ttl = match event.spec.event_type {
            EventType::Normal => EVENT_NORMAL_TTL,
            EventType::Warning | EventType::Error => EVENT_WARNING_TTL,
        };
        if now - last > ttl {
            store.delete(Kind::Event, event.metadata.namespace.as_deref(), &event.metadata.name).await.ok();
        }
    }
    Ok(())
}

#[async_trait]
impl Component for EventRecorder {
    fn name(&self) -> &'static str {
        "event-recorder"
    }

    async fn start(&self) -> Result<(), Error> {
        let store = self.store.clone();
        let token = self.loop_handle.token();
        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(EVENT_PRUNE_INTERVAL);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = interval.tick() => {
                        if let Err(e) = prune_tick(&store).await {
                            error!(error = %e, "event prune tick failed");
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

    fn store() -> (FileObjectStore, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        (FileObjectStore::new(dir.path()), dir)
    }

    fn involved(uid: &str) -> InvolvedObjectRef {
        InvolvedObjectRef { kind: Kind::Pod, namespace: Some("default".into()), name: "web-abcde".into(), uid: uid.into() }
    }

    #[tokio::test]
    async fn first_occurrence_creates_an_event() {
        let (store, _dir) = store();
        let event = record(&store, involved("uid-1"), EventType::Normal, "Scheduled", "assigned to node-1").await.unwrap();
        assert_eq!(event.status.count, 1);
    }

    #[tokio::test]
    async fn repeat_within_window_coalesces() {
        let (store, _dir) = store();
        record(&store, involved("uid-1"), EventType::Warning, "FailedMount", "volume not ready").await.unwrap();
        record(&store, involved("uid-1"), EventType::Warning, "FailedMount", "volume not ready, retrying").await.unwrap();

        let events: Vec<Event> = store.list(Kind::Event, Some("default"), None).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].status.count, 2);
    }

    #[tokio::test]
    async fn different_reason_creates_a_separate_event() {
        let (store, _dir) = store();
        record(&store, involved("uid-1"), EventType::Normal, "Scheduled", "assigned to node-1").await.unwrap();
        record(&store, involved("uid-1"), EventType::Normal, "Started", "container started").await.unwrap();

        let events: Vec<Event> = store.list(Kind::Event, Some("default"), None).await.unwrap();
        assert_eq!(events.len(), 2);
    }

    #[tokio::test]
    async fn prune_removes_expired_normal_events() {
        let (store, _dir) = store();
        let mut event = record(&store, involved("uid-1"), EventType::Normal, "Scheduled", "assigned").await.unwrap();
        event.status.last_timestamp = Some(Utc::now() - chrono::Duration::hours(2));
        store.update(event).await.unwrap();

        prune_tick(&store).await.unwrap();

        let events: Vec<Event> = store.list(Kind::Event, Some("default"), None).await.unwrap();
        assert!(events.is_empty());
    }
}
