//! Slot declarations

use crate::tracker::UserMessage;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Value type of a slot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SlotType {
    Text,
    Bool,
    Categorical,
    Float,
    List,
    /// Carries a value but never contributes features
    Unfeaturized,
}

/// How a slot value is extracted from a user message while a form runs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SlotMapping {
    /// Take the value of an extracted entity (defaults to the slot's own name)
    FromEntity {
        #[serde(default)]
        entity: Option<String>,
        #[serde(default)]
        intent: Vec<String>,
    },
    /// Set a fixed value when the message carries a given intent
    FromIntent { intent: String, value: Value },
    /// Take the raw message text
    FromText {
        #[serde(default)]
        intent: Vec<String>,
    },
}

impl SlotMapping {
    fn intent_matches(allowed: &[String], message: &UserMessage) -> bool {
        allowed.is_empty()
            || message
                .intent_name()
                .is_some_and(|name| allowed.iter().any(|a| a == name))
    }

    /// Candidate value for `slot_name` under this mapping
    pub fn extract(&self, slot_name: &str, message: &UserMessage) -> Option<Value> {
        match self {
            SlotMapping::FromEntity { entity, intent } => {
                if !Self::intent_matches(intent, message) {
                    return None;
                }
                let wanted = entity.as_deref().unwrap_or(slot_name);
                message
                    .entities
                    .iter()
                    .find(|e| e.entity == wanted)
                    .map(|e| e.value.clone())
            }
            SlotMapping::FromIntent { intent, value } => (message.intent_name()
                == Some(intent.as_str()))
            .then(|| value.clone()),
            SlotMapping::FromText { intent } => {
                if !Self::intent_matches(intent, message) {
                    return None;
                }
                message.text.clone().map(Value::String)
            }
        }
    }
}

fn default_influence() -> bool {
    true
}

/// A named, typed conversation variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Slot {
    #[serde(rename = "type")]
    pub kind: SlotType,
    /// Allowed values for categorical slots
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub values: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub min_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_value: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub initial_value: Option<Value>,
    /// Whether the slot contributes features to statistical predictions
    #[serde(default = "default_influence")]
    pub influence_conversation: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub mappings: Vec<SlotMapping>,
}

impl Slot {
    pub fn new(kind: SlotType) -> Self {
        Self {
            kind,
            values: Vec::new(),
            min_value: None,
            max_value: None,
            initial_value: None,
            influence_conversation: kind != SlotType::Unfeaturized,
            mappings: Vec::new(),
        }
    }

    #[cfg(test)]
    pub fn categorical(values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| (*v).to_string()).collect(),
            ..Self::new(SlotType::Categorical)
        }
    }

    /// Value the slot holds before anything sets it (`null` is "unknown")
    pub fn initial(&self) -> Value {
        self.initial_value.clone().unwrap_or(Value::Null)
    }

    /// Type check for a candidate value. `null` always passes (it resets the slot).
    pub fn validate_value(&self, value: &Value) -> Result<(), String> {
        if value.is_null() {
            return Ok(());
        }
        match self.kind {
            SlotType::Text => value
                .is_string()
                .then_some(())
                .ok_or_else(|| "expected a string".to_string()),
            SlotType::Bool => value
                .is_boolean()
                .then_some(())
                .ok_or_else(|| "expected a boolean".to_string()),
            SlotType::List => value
                .is_array()
                .then_some(())
                .ok_or_else(|| "expected a list".to_string()),
            SlotType::Categorical => {
                let Some(text) = value.as_str() else {
                    return Err("expected a string".to_string());
                };
                if self.values.iter().any(|v| v.eq_ignore_ascii_case(text)) {
                    Ok(())
                } else {
                    Err(format!("'{text}' is not one of {:?}", self.values))
                }
            }
            SlotType::Float => {
                let number = value
                    .as_f64()
                    .or_else(|| value.as_str().and_then(|s| s.trim().parse().ok()))
                    .ok_or_else(|| "expected a number".to_string())?;
                if self.min_value.is_some_and(|min| number < min) {
                    return Err(format!("{number} is below the minimum"));
                }
                if self.max_value.is_some_and(|max| number > max) {
                    return Err(format!("{number} is above the maximum"));
                }
                Ok(())
            }
            SlotType::Unfeaturized => Ok(()),
        }
    }

    /// Normalize an accepted value to the slot's storage form
    pub fn coerce(&self, value: Value) -> Value {
        match (self.kind, &value) {
            (SlotType::Float, Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .ok()
                .and_then(serde_json::Number::from_f64)
                .map_or(value, Value::Number),
            (SlotType::Categorical, Value::String(s)) => self
                .values
                .iter()
                .find(|v| v.eq_ignore_ascii_case(s))
                .map_or(value, |v| Value::String(v.clone())),
            _ => value,
        }
    }

    /// Feature names contributed to a featurized state
    pub fn features(&self, name: &str, value: &Value) -> Vec<String> {
        if !self.influence_conversation || value.is_null() {
            return Vec::new();
        }
        match self.kind {
            SlotType::Unfeaturized => Vec::new(),
            SlotType::Text | SlotType::Float => vec![format!("slot_{name}")],
            SlotType::Bool => vec![format!(
                "slot_{name}_{}",
                value.as_bool().unwrap_or(false)
            )],
            SlotType::List => {
                if value.as_array().is_some_and(|items| !items.is_empty()) {
                    vec![format!("slot_{name}")]
                } else {
                    Vec::new()
                }
            }
            SlotType::Categorical => {
                let category = value
                    .as_str()
                    .and_then(|s| self.values.iter().find(|v| v.eq_ignore_ascii_case(s)))
                    .map_or("other", String::as_str);
                vec![format!("slot_{name}_{category}")]
            }
        }
    }

    /// Mappings in effect, falling back to "entity with the slot's name"
    pub fn effective_mappings(&self) -> Vec<SlotMapping> {
        if self.mappings.is_empty() {
            vec![SlotMapping::FromEntity {
                entity: None,
                intent: Vec::new(),
            }]
        } else {
            self.mappings.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn categorical_accepts_declared_values_case_insensitively() {
        let slot = Slot::categorical(&["inside", "outside"]);
        assert!(slot.validate_value(&json!("Inside")).is_ok());
        assert!(slot.validate_value(&json!("rooftop")).is_err());
        assert_eq!(slot.coerce(json!("OUTSIDE")), json!("outside"));
    }

    #[test]
    fn float_respects_bounds_and_parses_strings() {
        let slot = Slot {
            min_value: Some(1.0),
            max_value: Some(20.0),
            ..Slot::new(SlotType::Float)
        };
        assert!(slot.validate_value(&json!(4)).is_ok());
        assert!(slot.validate_value(&json!("7")).is_ok());
        assert!(slot.validate_value(&json!(0)).is_err());
        assert!(slot.validate_value(&json!(21.5)).is_err());
        assert_eq!(slot.coerce(json!("7")), json!(7.0));
    }

    #[test]
    fn null_always_validates() {
        assert!(Slot::new(SlotType::Bool).validate_value(&Value::Null).is_ok());
    }

    #[test]
    fn features_respect_influence_flag() {
        let mut slot = Slot::new(SlotType::Text);
        assert_eq!(slot.features("cuisine", &json!("thai")), vec!["slot_cuisine"]);
        assert!(slot.features("cuisine", &Value::Null).is_empty());
        slot.influence_conversation = false;
        assert!(slot.features("cuisine", &json!("thai")).is_empty());
    }

    #[test]
    fn categorical_features_bucket_unknown_values() {
        let slot = Slot::categorical(&["inside", "outside"]);
        assert_eq!(slot.features("seating", &json!("inside")), vec!["slot_seating_inside"]);
        assert_eq!(slot.features("seating", &json!("roof")), vec!["slot_seating_other"]);
    }
}
