//! Remote action server client
//!
//! Custom actions run out of process behind a single webhook. One POST per
//! action; the server answers with events to apply and responses to utter.

use super::error::{ActionExecutionError, FailureKind};
use crate::domain::Domain;
use crate::tracker::{ActiveForm, TrackerSnapshot, UserMessage};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Version reported to the action server
pub const ENGINE_VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// Wire types
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackerPayload {
    pub sender_id: String,
    pub slots: BTreeMap<String, Value>,
    pub active_form: Option<ActiveForm>,
    pub latest_message: Option<UserMessage>,
    pub latest_action_name: Option<String>,
    pub paused: bool,
    /// Events of the current session, in the action server's format
    pub events: Vec<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DomainInfo {
    pub digest: String,
}

/// Body POSTed to the action server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    pub next_action: String,
    pub sender_id: String,
    pub tracker: TrackerPayload,
    pub domain: DomainInfo,
    pub version: String,
}

impl ActionRequest {
    pub fn new(action_name: &str, tracker: &TrackerSnapshot, domain: &Domain) -> Self {
        Self {
            next_action: action_name.to_string(),
            sender_id: tracker.sender_id.clone(),
            tracker: TrackerPayload {
                sender_id: tracker.sender_id.clone(),
                slots: tracker.slots.clone(),
                active_form: tracker.active_form.clone(),
                latest_message: tracker.latest_message.clone(),
                latest_action_name: tracker.latest_action_name.clone(),
                paused: tracker.paused,
                events: tracker.session_events().iter().map(|e| e.to_wire()).collect(),
            },
            domain: DomainInfo {
                digest: domain.digest().to_string(),
            },
            version: ENGINE_VERSION.to_string(),
        }
    }
}

/// A bot response requested by the action server
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResponseSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Template parameters
    #[serde(flatten)]
    pub params: Map<String, Value>,
}

#[cfg(test)]
impl ResponseSpec {
    pub fn template(name: impl Into<String>) -> Self {
        Self {
            template: Some(name.into()),
            ..Self::default()
        }
    }
}

/// Successful action server reply. Event descriptors stay raw until the
/// executor validates them against the domain.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionResponse {
    #[serde(default)]
    pub events: Vec<Value>,
    #[serde(default)]
    pub responses: Vec<ResponseSpec>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: String,
    #[serde(default)]
    action_name: Option<String>,
    #[serde(default)]
    slot: Option<String>,
}

// ============================================================================
// Client trait
// ============================================================================

/// Transport to the action server
#[async_trait]
pub trait ActionClient: Send + Sync {
    /// Run one remote action. Every failure is normalized into an
    /// `ActionExecutionError`; there are no retries.
    async fn run(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError>;

    /// Where requests are sent, for logging
    fn endpoint(&self) -> &str;
}

#[async_trait]
impl<T: ActionClient + ?Sized> ActionClient for Arc<T> {
    async fn run(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError> {
        (**self).run(request).await
    }

    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

// ============================================================================
// Webhook client
// ============================================================================

/// HTTP client for the action server webhook
pub struct WebhookClient {
    client: Client,
    url: String,
    token: Option<String>,
}

impl WebhookClient {
    pub fn new(url: impl Into<String>, token: Option<String>, timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            client,
            url: url.into(),
            token,
        }
    }

    /// Turn an error payload into an execution error
    fn error_from_body(
        action_name: &str,
        kind: FailureKind,
        body: ErrorBody,
    ) -> ActionExecutionError {
        let action_name = body.action_name.unwrap_or_else(|| action_name.to_string());
        ActionExecutionError::new(action_name, kind, body.error).with_slot_hint(body.slot)
    }
}

#[async_trait]
impl ActionClient for WebhookClient {
    async fn run(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError> {
        let action = request.next_action.as_str();
        let mut builder = self.client.post(&self.url).json(request);
        if let Some(token) = &self.token {
            builder = builder.query(&[("token", token)]);
        }

        let response = builder.send().await.map_err(|e| {
            if e.is_timeout() {
                ActionExecutionError::timeout(action, format!("Request timeout: {e}"))
            } else {
                ActionExecutionError::connection(action, format!("Connection failed: {e}"))
            }
        })?;

        let status = response.status();
        let body = response.text().await.map_err(|e| {
            ActionExecutionError::connection(action, format!("Failed to read response: {e}"))
        })?;

        if !status.is_success() {
            tracing::warn!(action, status = status.as_u16(), "Action server returned an error status");
            let err = match serde_json::from_str::<ErrorBody>(&body) {
                Ok(parsed) => Self::error_from_body(action, FailureKind::Status, parsed),
                Err(_) => ActionExecutionError::new(
                    action,
                    FailureKind::Status,
                    format!("HTTP {status}: {body}"),
                )
                .with_slot_hint(None),
            };
            return Err(err.with_status(status.as_u16()));
        }

        let value: Value = serde_json::from_str(&body).map_err(|e| {
            ActionExecutionError::malformed(action, format!("Failed to parse response: {e}"))
        })?;
        if value.get("error").is_some() {
            let parsed: ErrorBody = serde_json::from_value(value).map_err(|e| {
                ActionExecutionError::malformed(action, format!("Invalid error payload: {e}"))
            })?;
            return Err(Self::error_from_body(action, FailureKind::Application, parsed)
                .with_status(status.as_u16()));
        }
        serde_json::from_value(value).map_err(|e| {
            ActionExecutionError::malformed(action, format!("Unexpected response shape: {e}"))
        })
    }

    fn endpoint(&self) -> &str {
        &self.url
    }
}
