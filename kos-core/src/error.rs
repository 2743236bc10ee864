use thiserror::Error;

/// Shared error type threaded through the store, admission pipeline and
/// every controller. Mirrors the error kinds the source assigns to object
/// writes and reconciliation failures.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum Error {
    #[error("{kind} \"{name}\" not found{ns}", ns = namespace_suffix(.namespace))]
    NotFound { kind: String, namespace: Option<String>, name: String },

    #[error("{kind} \"{name}\" already exists{ns}", ns = namespace_suffix(.namespace))]
    AlreadyExists { kind: String, namespace: Option<String>, name: String },

    #[error("resourceVersion conflict on {kind} \"{name}\": expected {expected}, have {actual}")]
    Conflict { kind: String, name: String, expected: u64, actual: u64 },

    #[error("invalid object: {0}")]
    Invalid(String),

    #[error("quota exceeded: {0}")]
    Quota(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("internal error: {0}")]
    Internal(String),
}

fn namespace_suffix(namespace: &Option<String>) -> String {
    match namespace {
        Some(ns) => format!(" in namespace \"{ns}\""),
        None => String::new(),
    }
}

impl Error {
    pub fn not_found(kind: impl Into<String>, namespace: Option<String>, name: impl Into<String>) -> Self {
        Error::NotFound { kind: kind.into(), namespace, name: name.into() }
    }

    pub fn already_exists(kind: impl Into<String>, namespace: Option<String>, name: impl Into<String>) -> Self {
        Error::AlreadyExists { kind: kind.into(), namespace, name: name.into() }
    }

    /// `true` for errors the spec's propagation policy says to retry
    /// (Conflict, Timeout, transient Internal).
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Conflict { .. } | Error::Timeout(_) | Error::Internal(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
