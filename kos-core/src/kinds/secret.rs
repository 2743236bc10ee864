use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::object::Object;

pub type Secret = Object<SecretSpec, SecretStatus>;

/// A closed set, so an unrecognised `type` string is rejected at
/// deserialization rather than needing a dedicated admission rule.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SecretType {
    Opaque,
    ServiceAccountToken,
    DockerConfigJson,
    BasicAuth,
    Tls,
}

impl Default for SecretType {
    fn default() -> Self {
        SecretType::Opaque
    }
}

/// `data`/`string_data` never touch the JSON document on disk; the store
/// writes the referenced bytes into the sibling `<name>_data/<key>`
/// directory and keeps only key names here. See `kos_store::secret_store`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretSpec {
    #[serde(rename = "type")]
    pub secret_type: SecretType,
    /// key -> base64-encoded value, as provided by the client.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub data: HashMap<String, String>,
    /// key -> plaintext value, as provided by the client; encoded to
    /// base64 and merged into `data` on write.
    #[serde(default, skip_serializing, skip_deserializing)]
    pub string_data: HashMap<String, String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SecretStatus {
    /// key names only; values live on disk, never in the JSON document.
    #[serde(default)]
    pub keys: Vec<String>,
}
