//! Conversation events
//!
//! Events are the single source of truth: every piece of tracker state is a
//! fold over them.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Recognized intent with NLU confidence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub name: String,
    pub confidence: f64,
}

/// Extracted entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub entity: String,
    pub value: Value,
}

/// Structured user input, as produced by the interpreter
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct UserMessage {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<Intent>,
    #[serde(default)]
    pub entities: Vec<Entity>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
}

impl UserMessage {
    pub fn with_intent(name: impl Into<String>, confidence: f64) -> Self {
        Self {
            intent: Some(Intent {
                name: name.into(),
                confidence,
            }),
            ..Self::default()
        }
    }

    pub fn with_entity(mut self, entity: impl Into<String>, value: Value) -> Self {
        self.entities.push(Entity {
            entity: entity.into(),
            value,
        });
        self
    }

    pub fn intent_name(&self) -> Option<&str> {
        self.intent.as_ref().map(|i| i.name.as_str())
    }

    /// NLU confidence, zero when no intent was recognized
    pub fn intent_confidence(&self) -> f64 {
        self.intent.as_ref().map_or(0.0, |i| i.confidence)
    }
}

/// An immutable fact about a conversation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum Event {
    #[serde(rename = "user")]
    UserUttered(UserMessage),

    #[serde(rename = "action")]
    ActionExecuted {
        name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        policy: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        confidence: Option<f64>,
    },

    #[serde(rename = "bot")]
    BotUttered {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        template: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        data: Option<Value>,
    },

    #[serde(rename = "slot")]
    SlotSet {
        name: String,
        #[serde(default)]
        value: Value,
    },

    #[serde(rename = "form")]
    FormActivated { name: String },

    FormDeactivated,

    /// The action did not run; its intended effects were not applied
    ActionExecutionFailed {
        action_name: String,
        message: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        status: Option<u16>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<String>,
    },

    /// The action ran but refused to proceed (a form rejecting a slot value)
    ActionExecutionRejected {
        action_name: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        slot: Option<String>,
    },

    #[serde(rename = "restart")]
    Restarted,

    SessionEnded,

    #[serde(rename = "pause")]
    ConversationPaused,

    #[serde(rename = "resume")]
    ConversationResumed,

    #[serde(rename = "reset_slots")]
    AllSlotsReset,

    #[serde(rename = "followup")]
    FollowupAction { name: String },
}

impl Event {
    pub fn action(name: impl Into<String>) -> Self {
        Event::ActionExecuted {
            name: name.into(),
            policy: None,
            confidence: None,
        }
    }

    pub fn slot(name: impl Into<String>, value: Value) -> Self {
        Event::SlotSet {
            name: name.into(),
            value,
        }
    }

    #[cfg(test)]
    pub fn utter(text: impl Into<String>) -> Self {
        Event::BotUttered {
            text: Some(text.into()),
            template: None,
            data: None,
        }
    }

    /// Wire tag of this event
    pub fn kind(&self) -> &'static str {
        match self {
            Event::UserUttered(_) => "user",
            Event::ActionExecuted { .. } => "action",
            Event::BotUttered { .. } => "bot",
            Event::SlotSet { .. } => "slot",
            Event::FormActivated { .. } | Event::FormDeactivated => "form",
            Event::ActionExecutionFailed { .. } => "action_execution_failed",
            Event::ActionExecutionRejected { .. } => "action_execution_rejected",
            Event::Restarted => "restart",
            Event::SessionEnded => "session_ended",
            Event::ConversationPaused => "pause",
            Event::ConversationResumed => "resume",
            Event::AllSlotsReset => "reset_slots",
            Event::FollowupAction { .. } => "followup",
        }
    }

    /// Whether this event starts a fresh dialogue (history before it is not
    /// part of the current session)
    pub fn is_session_boundary(&self) -> bool {
        matches!(self, Event::Restarted | Event::SessionEnded)
    }

    /// Serialize in the action server's format, where form deactivation is a
    /// `form` event with a null name.
    pub fn to_wire(&self) -> Value {
        match self {
            Event::FormDeactivated => json!({ "event": "form", "name": null }),
            other => serde_json::to_value(other).unwrap_or(Value::Null),
        }
    }

    /// Parse an event descriptor in the action server's format
    pub fn from_wire(value: Value) -> Result<Self, String> {
        let kind = value
            .get("event")
            .and_then(Value::as_str)
            .ok_or_else(|| "event descriptor without an 'event' field".to_string())?;
        if kind == "form" && value.get("name").map_or(true, Value::is_null) {
            return Ok(Event::FormDeactivated);
        }
        let kind = kind.to_string();
        serde_json::from_value(value).map_err(|e| format!("invalid '{kind}' event: {e}"))
    }
}
