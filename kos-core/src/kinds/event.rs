use serde::{Deserialize, Serialize};

use crate::object::{Kind, Object};

pub type Event = Object<EventSpec, EventStatus>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InvolvedObjectRef {
    pub kind: Kind,
    pub namespace: Option<String>,
    pub name: String,
    pub uid: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum EventType {
    Normal,
    Warning,
    Error,
}

/// Events carry their mutable fields in `spec` rather than `status` since
/// they have no controller-observed/user-declared split; the envelope is
/// kept uniform with every other kind for the store's benefit regardless.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventSpec {
    pub involved_object: InvolvedObjectRef,
    pub reason: String,
    pub message: String,
    pub event_type: EventType,
    pub source: String,
}

impl Default for EventSpec {
    fn default() -> Self {
        EventSpec {
            involved_object: InvolvedObjectRef {
                kind: Kind::Pod,
                namespace: None,
                name: String::new(),
                uid: String::new(),
            },
            reason: String::new(),
            message: String::new(),
            event_type: EventType::Normal,
            source: String::new(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EventStatus {
    #[serde(default)]
    pub first_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub last_timestamp: Option<chrono::DateTime<chrono::Utc>>,
    #[serde(default)]
    pub count: u32,
}
