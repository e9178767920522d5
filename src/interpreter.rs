//! Message interpreter
//!
//! Turns raw user text into a structured message. Only the explicit
//! `/intent{...}` syntax is understood; real NLU sits outside the engine.

use crate::tracker::{Entity, Intent, UserMessage};
use async_trait::async_trait;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::LazyLock;

/// `/intent`, optional `@confidence`, optional JSON entity object
static INTENT_SYNTAX: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\s*/([A-Za-z_][\w-]*)(?:@([0-9]*\.?[0-9]+))?\s*(\{.*\})?\s*$")
        .expect("static regex is valid")
});

#[async_trait]
pub trait Interpreter: Send + Sync {
    async fn parse(&self, text: &str) -> UserMessage;
}

/// Parses `/greet`, `/inform{"cuisine": "thai"}` and `/greet@0.4`
#[derive(Debug, Default, Clone)]
pub struct RegexInterpreter;

impl RegexInterpreter {
    pub fn new() -> Self {
        Self
    }

    fn parse_sync(text: &str) -> UserMessage {
        let mut message = UserMessage {
            text: Some(text.to_string()),
            message_id: Some(uuid::Uuid::new_v4().to_string()),
            ..UserMessage::default()
        };

        let Some(captures) = INTENT_SYNTAX.captures(text) else {
            return message;
        };
        let Some(name) = captures.get(1) else {
            return message;
        };
        let confidence = captures
            .get(2)
            .and_then(|m| m.as_str().parse::<f64>().ok())
            .map_or(1.0, |c| c.clamp(0.0, 1.0));

        let entities = match captures.get(3) {
            Some(raw) => match serde_json::from_str::<Map<String, Value>>(raw.as_str()) {
                Ok(map) => map
                    .into_iter()
                    .map(|(entity, value)| Entity { entity, value })
                    .collect(),
                Err(e) => {
                    tracing::warn!(error = %e, "Ignoring malformed entity JSON in message");
                    Vec::new()
                }
            },
            None => Vec::new(),
        };

        message.intent = Some(Intent {
            name: name.as_str().to_string(),
            confidence,
        });
        message.entities = entities;
        message
    }
}

#[async_trait]
impl Interpreter for RegexInterpreter {
    async fn parse(&self, text: &str) -> UserMessage {
        Self::parse_sync(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn parses_intent_with_entities() {
        let message = RegexInterpreter
            .parse(r#"/inform{"cuisine": "thai", "number": 4}"#)
            .await;
        assert_eq!(message.intent_name(), Some("inform"));
        assert!((message.intent_confidence() - 1.0).abs() < f64::EPSILON);
        assert_eq!(message.entities.len(), 2);
        assert!(message
            .entities
            .iter()
            .any(|e| e.entity == "cuisine" && e.value == json!("thai")));
        assert!(message.message_id.is_some());
    }

    #[tokio::test]
    async fn parses_explicit_confidence() {
        let message = RegexInterpreter.parse("/greet@0.25").await;
        assert_eq!(message.intent_name(), Some("greet"));
        assert!((message.intent_confidence() - 0.25).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn plain_text_has_no_intent() {
        let message = RegexInterpreter.parse("hello there").await;
        assert_eq!(message.intent, None);
        assert_eq!(message.text.as_deref(), Some("hello there"));
        assert!(message.intent_confidence().abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn malformed_entities_keep_the_intent() {
        let message = RegexInterpreter.parse(r#"/inform{"cuisine": }"#).await;
        assert_eq!(message.intent_name(), Some("inform"));
        assert!(message.entities.is_empty());
    }
}
