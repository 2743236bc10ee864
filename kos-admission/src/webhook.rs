//! Webhook stage of the admission pipeline: after built-in rules pass,
//! each registered webhook is POSTed an AdmissionReview envelope.

use std::time::Duration;

use kos_core::Error;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePolicy {
    Fail,
    Ignore,
}

#[derive(Debug, Clone)]
pub struct WebhookConfig {
    pub name: String,
    pub url: String,
    pub failure_policy: FailurePolicy,
    pub timeout: Duration,
}

impl WebhookConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, failure_policy: FailurePolicy) -> Self {
        WebhookConfig { name: name.into(), url: url.into(), failure_policy, timeout: crate::default_webhook_timeout() }
    }
}

#[derive(Debug, Serialize)]
struct AdmissionReview {
    kind: &'static str,
    #[serde(rename = "apiVersion")]
    api_version: &'static str,
    request: AdmissionRequest,
}

#[derive(Debug, Serialize)]
struct AdmissionRequest {
    uid: String,
    kind: ObjectKindRef,
    resource: Value,
    namespace: Option<String>,
    operation: &'static str,
    object: Value,
}

#[derive(Debug, Serialize)]
struct ObjectKindRef {
    kind: String,
    #[serde(rename = "apiVersion")]
    api_version: String,
}

#[derive(Debug, Deserialize)]
struct AdmissionReviewResponse {
    response: AdmissionResponse,
}

#[derive(Debug, Deserialize)]
struct AdmissionResponse {
    allowed: bool,
    #[serde(default)]
    status: Option<AdmissionStatus>,
}

#[derive(Debug, Deserialize)]
struct AdmissionStatus {
    #[serde(default)]
    message: String,
}

#[derive(Debug, Clone, Copy)]
pub enum Operation {
    Create,
    Update,
}

impl Operation {
    fn as_str(&self) -> &'static str {
        match self {
            Operation::Create => "CREATE",
            Operation::Update => "UPDATE",
        }
    }
}

/// Calls one webhook. `Ok(())` means allowed (or the webhook's
/// failurePolicy is Ignore and the call errored); `Err` carries the
/// rejection message to surface as `Error::Invalid`.
pub async fn call(
    client: &reqwest::Client,
    webhook: &WebhookConfig,
    kind: &str,
    namespace: Option<&str>,
    operation: Operation,
    object: &Value,
) -> Result<(), Error> {
    let review = AdmissionReview {
        kind: "AdmissionReview",
        api_version: "v1",
        request: AdmissionRequest {
            uid: uuid::Uuid::new_v4().to_string(),
            kind: ObjectKindRef { kind: kind.to_string(), api_version: "v1".to_string() },
            resource: Value::Null,
            namespace: namespace.map(String::from),
            operation: operation.as_str(),
            object: object.clone(),
        },
    };

    let result = client
        .post(&webhook.url)
        .timeout(webhook.timeout)
        .json(&review)
        .send()
        .await;

    let response = match result {
        Ok(r) => r,
        Err(e) => return handle_failure(webhook, format!("webhook \"{}\" request failed: {e}", webhook.name)),
    };

    if !response.status().is_success() {
        return handle_failure(
            webhook,
            format!("webhook \"{}\" responded with status {}", webhook.name, response.status()),
        );
    }

    let body: AdmissionReviewResponse = match response.json().await {
        Ok(b) => b,
        Err(e) => return handle_failure(webhook, format!("webhook \"{}\" returned an unparsable response: {e}", webhook.name)),
    };

    if body.response.allowed {
        Ok(())
    } else {
        let message = body.response.status.map(|s| s.message).unwrap_or_default();
        Err(Error::Invalid(format!("webhook \"{}\" rejected: {message}", webhook.name)))
    }
}

fn handle_failure(webhook: &WebhookConfig, message: String) -> Result<(), Error> {
    match webhook.failure_policy {
        FailurePolicy::Fail => Err(Error::Invalid(message)),
        FailurePolicy::Ignore => {
            warn!(webhook = %webhook.name, "ignoring webhook failure: {message}");
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ignore_policy_swallows_failure() {
        let webhook = WebhookConfig::new("w", "http://127.0.0.1:0", FailurePolicy::Ignore);
        assert!(handle_failure(&webhook, "boom".into()).is_ok());
    }

    #[test]
    fn fail_policy_propagates_failure() {
        let webhook = WebhookConfig::new("w", "http://127.0.0.1:0", FailurePolicy::Fail);
        assert!(handle_failure(&webhook, "boom".into()).is_err());
    }
}
