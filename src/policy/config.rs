//! Policy configuration file

use crate::domain::{Domain, ACTION_DEACTIVATE_FORM, ACTION_DEFAULT_FALLBACK, ACTION_LISTEN, ACTION_RESTART};
use crate::error::ConfigurationError;
use crate::tracker::{Event, UserMessage};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::Path;

pub const DEFAULT_MAX_HISTORY: usize = 5;
pub const DEFAULT_CORE_THRESHOLD: f64 = 0.3;
pub const DEFAULT_NLU_THRESHOLD: f64 = 0.3;

/// One configured sub-policy
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum PolicyEntry {
    Form {
        #[serde(default)]
        priority: Option<u32>,
    },
    Mapping {
        #[serde(default)]
        priority: Option<u32>,
    },
    Memoization {
        #[serde(default)]
        priority: Option<u32>,
        #[serde(default)]
        max_history: Option<usize>,
    },
    Fallback {
        #[serde(default)]
        priority: Option<u32>,
    },
}

/// One step of an example conversation
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoryStep {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub intent: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub entities: BTreeMap<String, Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub action: Option<String>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub slots: BTreeMap<String, Value>,
}

/// Example conversation the memoization policy learns its lookup from
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Story {
    #[serde(default)]
    pub name: String,
    pub steps: Vec<StoryStep>,
}

impl Story {
    /// Expand the story into tracker events. `action_listen` is implied after
    /// every run of bot actions that precedes a user message, and at the end.
    pub fn to_events(&self, domain: &Domain) -> Result<Vec<Event>, ConfigurationError> {
        let mut events = Vec::new();
        let mut pending_listen = false;
        for (index, step) in self.steps.iter().enumerate() {
            let kinds = usize::from(step.intent.is_some())
                + usize::from(step.action.is_some())
                + usize::from(!step.slots.is_empty());
            if kinds != 1 {
                return Err(ConfigurationError::Invalid(format!(
                    "story '{}' step {index} must set exactly one of intent, action or slots",
                    self.name
                )));
            }

            if let Some(intent) = &step.intent {
                if !domain.has_intent(intent) {
                    return Err(ConfigurationError::UnknownIntent(intent.clone()));
                }
                if let Some(entity) = step.entities.keys().find(|e| !domain.has_entity(e)) {
                    return Err(ConfigurationError::Invalid(format!(
                        "story '{}' step {index} uses undeclared entity '{entity}'",
                        self.name
                    )));
                }
                if pending_listen {
                    events.push(Event::action(ACTION_LISTEN));
                    pending_listen = false;
                }
                let message = step.entities.iter().fold(
                    UserMessage::with_intent(intent.clone(), 1.0),
                    |message, (entity, value)| message.with_entity(entity.clone(), value.clone()),
                );
                events.push(Event::UserUttered(message));
            } else if let Some(action) = &step.action {
                domain.require_action(action)?;
                events.push(Event::action(action.clone()));
                pending_listen = action != ACTION_LISTEN;
            } else {
                for (name, value) in &step.slots {
                    domain.require_slot(name)?;
                    events.push(Event::slot(name.clone(), value.clone()));
                }
            }
        }
        if pending_listen {
            events.push(Event::action(ACTION_LISTEN));
        }
        Ok(events)
    }
}

fn default_fallback_action() -> String {
    ACTION_DEFAULT_FALLBACK.to_string()
}

fn default_core_threshold() -> f64 {
    DEFAULT_CORE_THRESHOLD
}

fn default_nlu_threshold() -> f64 {
    DEFAULT_NLU_THRESHOLD
}

fn default_max_history() -> usize {
    DEFAULT_MAX_HISTORY
}

fn default_overrides() -> Vec<String> {
    vec![ACTION_RESTART.to_string(), ACTION_DEACTIVATE_FORM.to_string()]
}

fn default_policies() -> Vec<PolicyEntry> {
    vec![
        PolicyEntry::Form { priority: None },
        PolicyEntry::Mapping { priority: None },
        PolicyEntry::Memoization {
            priority: None,
            max_history: None,
        },
        PolicyEntry::Fallback { priority: None },
    ]
}

/// Policy file as written on disk
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PolicyConfig {
    #[serde(default = "default_policies")]
    pub policies: Vec<PolicyEntry>,
    /// Action returned when no proposal clears `core_threshold`
    #[serde(default = "default_fallback_action")]
    pub fallback_action: String,
    #[serde(default = "default_core_threshold")]
    pub core_threshold: f64,
    #[serde(default = "default_nlu_threshold")]
    pub nlu_threshold: f64,
    #[serde(default = "default_max_history")]
    pub max_history: usize,
    /// Actions admissible while a form is active, besides the form itself
    #[serde(default = "default_overrides")]
    pub form_overrides: Vec<String>,
    #[serde(default)]
    pub stories: Vec<Story>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            policies: default_policies(),
            fallback_action: default_fallback_action(),
            core_threshold: DEFAULT_CORE_THRESHOLD,
            nlu_threshold: DEFAULT_NLU_THRESHOLD,
            max_history: DEFAULT_MAX_HISTORY,
            form_overrides: default_overrides(),
            stories: Vec::new(),
        }
    }
}

impl PolicyConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        Ok(toml::from_str(raw)?)
    }
}
