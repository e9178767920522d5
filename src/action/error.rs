//! Action execution errors

use crate::tracker::Event;
use regex::Regex;
use std::fmt;
use std::sync::LazyLock;
use thiserror::Error;

/// Slot named in free-form action server messages such as
/// "Failed to validate slot cuisine with action restaurant_form"
static SLOT_IN_MESSAGE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"slot\s+'?([A-Za-z_][A-Za-z0-9_]*)").expect("static regex is valid")
});

/// Where an execution failure came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Could not reach the action server
    Connection,
    /// The call exceeded its deadline
    Timeout,
    /// Non-2xx HTTP status
    Status,
    /// Body was not valid JSON or did not have the expected shape
    Malformed,
    /// 2xx body carrying an explicit error payload
    Application,
    /// No local or remote action with that name
    UnknownAction,
    /// Cancelled by an out-of-band restart
    Cancelled,
    /// A remote action was requested but no endpoint is configured
    NotConfigured,
    /// An in-process action failed
    Local,
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Connection => "connection",
            Self::Timeout => "timeout",
            Self::Status => "status",
            Self::Malformed => "malformed",
            Self::Application => "application",
            Self::UnknownAction => "unknown_action",
            Self::Cancelled => "cancelled",
            Self::NotConfigured => "not_configured",
            Self::Local => "local",
        };
        f.write_str(s)
    }
}

/// A recoverable failure to execute an action.
///
/// Never escapes a turn: the processor records it as an
/// `action_execution_failed` event and asks the policies again.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Action '{action_name}' failed ({kind}): {message}")]
pub struct ActionExecutionError {
    pub action_name: String,
    pub kind: FailureKind,
    pub status: Option<u16>,
    pub message: String,
    /// Slot the failure is about, when known
    pub slot: Option<String>,
}

impl ActionExecutionError {
    pub fn new(action_name: impl Into<String>, kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            action_name: action_name.into(),
            kind,
            status: None,
            message: message.into(),
            slot: None,
        }
    }

    pub fn connection(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(action_name, FailureKind::Connection, message)
    }

    pub fn timeout(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(action_name, FailureKind::Timeout, message)
    }

    pub fn malformed(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(action_name, FailureKind::Malformed, message)
    }

    pub fn local(action_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(action_name, FailureKind::Local, message)
    }

    pub fn cancelled(action_name: impl Into<String>) -> Self {
        Self::new(action_name, FailureKind::Cancelled, "cancelled by restart")
    }

    pub fn unknown_action(action_name: impl Into<String>) -> Self {
        let name = action_name.into();
        let message = format!("no action named '{name}' is registered");
        Self::new(name, FailureKind::UnknownAction, message)
    }

    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Attach a slot unless one is already known
    pub fn with_slot(mut self, slot: impl Into<String>) -> Self {
        if self.slot.is_none() {
            self.slot = Some(slot.into());
        }
        self
    }

    /// Use `slot` when given, otherwise try to recover it from the message
    pub fn with_slot_hint(mut self, slot: Option<String>) -> Self {
        self.slot = slot.or_else(|| slot_from_message(&self.message));
        self
    }

    /// The event recorded in place of the action's effects
    pub fn to_event(&self) -> Event {
        Event::ActionExecutionFailed {
            action_name: self.action_name.clone(),
            message: self.message.clone(),
            status: self.status,
            slot: self.slot.clone(),
        }
    }
}

/// Extract the slot name from a message like "... slot cuisine ..."
pub fn slot_from_message(message: &str) -> Option<String> {
    SLOT_IN_MESSAGE
        .captures(message)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str().to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn recovers_slot_from_action_server_message() {
        assert_eq!(
            slot_from_message("Failed to validate slot cuisine with action restaurant_form"),
            Some("cuisine".to_string())
        );
        assert_eq!(
            slot_from_message("invalid value for slot 'num_people'"),
            Some("num_people".to_string())
        );
        assert_eq!(slot_from_message("something else broke"), None);
    }

    #[test]
    fn explicit_slot_wins_over_message() {
        let err = ActionExecutionError::new("restaurant_form", FailureKind::Status, "slot cuisine")
            .with_slot_hint(Some("num_people".to_string()));
        assert_eq!(err.slot.as_deref(), Some("num_people"));
    }

    #[test]
    fn converts_to_failure_event() {
        let err = ActionExecutionError::new("restaurant_form", FailureKind::Status, "bad")
            .with_status(400)
            .with_slot("cuisine");
        assert_eq!(
            err.to_event(),
            Event::ActionExecutionFailed {
                action_name: "restaurant_form".to_string(),
                message: "bad".to_string(),
                status: Some(400),
                slot: Some("cuisine".to_string()),
            }
        );
    }
}
