//! Domain configuration
//!
//! Everything the engine knows statically: intents, entities, slots, forms,
//! response templates and which actions run on the remote action server.
//! Loaded once at startup and shared read-only by every conversation.

mod slot;
mod templates;

pub use slot::{Slot, SlotMapping, SlotType};
pub use templates::TemplateStore;

use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

pub const ACTION_LISTEN: &str = "action_listen";
pub const ACTION_RESTART: &str = "action_restart";
pub const ACTION_DEFAULT_FALLBACK: &str = "action_default_fallback";
pub const ACTION_DEACTIVATE_FORM: &str = "action_deactivate_form";
pub const ACTION_SESSION_END: &str = "action_session_end";

/// Built-in actions every domain knows about
pub const DEFAULT_ACTIONS: [&str; 5] = [
    ACTION_LISTEN,
    ACTION_RESTART,
    ACTION_DEFAULT_FALLBACK,
    ACTION_DEACTIVATE_FORM,
    ACTION_SESSION_END,
];

/// Reserved slot tracking which slot the active form is asking for
pub const REQUESTED_SLOT: &str = "requested_slot";

/// Template uttered by the default fallback action
pub const UTTER_DEFAULT: &str = "utter_default";

const DEFAULT_ACTION_HISTORY: usize = 10;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Action to run whenever this intent is recognized
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggers: Option<String>,
}

/// A declared bundle of required slots driving a constrained sub-dialogue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FormConfig {
    pub required_slots: Vec<String>,
    /// Ask in declaration order; otherwise by ascending `priority`
    #[serde(default = "default_true")]
    pub ordered: bool,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub priority: BTreeMap<String, i32>,
    /// Per-slot validation action, run through the action executor
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub validation: BTreeMap<String, String>,
    /// Scheduled as a follow-up once every required slot is filled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub submit_action: Option<String>,
}

fn default_true() -> bool {
    true
}

fn default_action_history() -> usize {
    DEFAULT_ACTION_HISTORY
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Capacity of the recent-actions ring kept on every tracker
    #[serde(default = "default_action_history")]
    pub action_history_size: usize,
    /// Keep slot values when a session ends
    #[serde(default = "default_true")]
    pub carry_over_slots: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            action_history_size: DEFAULT_ACTION_HISTORY,
            carry_over_slots: true,
        }
    }
}

/// Domain file as written on disk
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DomainConfig {
    #[serde(default)]
    pub intents: BTreeMap<String, IntentConfig>,
    #[serde(default)]
    pub entities: Vec<String>,
    #[serde(default)]
    pub slots: BTreeMap<String, Slot>,
    #[serde(default)]
    pub forms: BTreeMap<String, FormConfig>,
    #[serde(default)]
    pub templates: TemplateStore,
    /// Custom actions executed by the remote action server
    #[serde(default)]
    pub actions: Vec<String>,
    #[serde(default)]
    pub session: SessionConfig,
}

/// Validated, immutable domain
#[derive(Debug, Clone)]
pub struct Domain {
    intents: BTreeMap<String, IntentConfig>,
    entities: BTreeSet<String>,
    slots: BTreeMap<String, Slot>,
    forms: BTreeMap<String, FormConfig>,
    templates: TemplateStore,
    remote_actions: BTreeSet<String>,
    session: SessionConfig,
    digest: String,
}

impl Domain {
    /// Load and validate a TOML domain file
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigurationError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigurationError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&raw)
    }

    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigurationError> {
        let config: DomainConfig = toml::from_str(raw)?;
        Self::from_config(config)
    }

    pub fn from_config(mut config: DomainConfig) -> Result<Self, ConfigurationError> {
        if !config.forms.is_empty() {
            config
                .slots
                .entry(REQUESTED_SLOT.to_string())
                .or_insert_with(|| Slot::new(SlotType::Unfeaturized));
        }

        let digest = {
            let canonical = serde_json::to_vec(&config)
                .map_err(|e| ConfigurationError::Invalid(format!("domain not serializable: {e}")))?;
            format!("{:x}", Sha256::digest(&canonical))
        };

        let domain = Self {
            intents: config.intents,
            entities: config.entities.into_iter().collect(),
            slots: config.slots,
            forms: config.forms,
            templates: config.templates,
            remote_actions: config.actions.into_iter().collect(),
            session: config.session,
            digest,
        };
        domain.validate()?;
        Ok(domain)
    }

    fn validate(&self) -> Result<(), ConfigurationError> {
        for name in &self.remote_actions {
            if DEFAULT_ACTIONS.contains(&name.as_str()) || self.templates.contains(name) {
                return Err(ConfigurationError::Invalid(format!(
                    "remote action '{name}' shadows a built-in or template action"
                )));
            }
        }

        for (form_name, form) in &self.forms {
            if form.required_slots.is_empty() {
                return Err(ConfigurationError::Invalid(format!(
                    "form '{form_name}' has no required slots"
                )));
            }
            for slot in &form.required_slots {
                if !self.slots.contains_key(slot) {
                    return Err(ConfigurationError::UnknownSlot(slot.clone()));
                }
            }
            for (slot, action) in &form.validation {
                if !form.required_slots.contains(slot) {
                    return Err(ConfigurationError::UnknownSlot(slot.clone()));
                }
                self.require_action(action)?;
            }
            if let Some(submit) = &form.submit_action {
                self.require_action(submit)?;
            }
        }

        for (intent, config) in &self.intents {
            if let Some(action) = &config.triggers {
                self.require_action(action).map_err(|_| {
                    ConfigurationError::Invalid(format!(
                        "intent '{intent}' triggers unknown action '{action}'"
                    ))
                })?;
            }
        }

        if self.session.action_history_size == 0 {
            return Err(ConfigurationError::Invalid(
                "session.action_history_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    /// Error unless `name` is an action this domain can execute
    pub fn require_action(&self, name: &str) -> Result<(), ConfigurationError> {
        if self.is_known_action(name) {
            Ok(())
        } else {
            Err(ConfigurationError::UnknownAction(name.to_string()))
        }
    }

    pub fn is_known_action(&self, name: &str) -> bool {
        DEFAULT_ACTIONS.contains(&name)
            || self.templates.contains(name)
            || self.forms.contains_key(name)
            || self.remote_actions.contains(name)
    }

    pub fn is_remote_action(&self, name: &str) -> bool {
        self.remote_actions.contains(name)
    }

    /// Every executable action name, sorted
    pub fn action_names(&self) -> BTreeSet<String> {
        DEFAULT_ACTIONS
            .iter()
            .map(|s| (*s).to_string())
            .chain(self.templates.names().map(String::from))
            .chain(self.forms.keys().cloned())
            .chain(self.remote_actions.iter().cloned())
            .collect()
    }

    pub fn slot(&self, name: &str) -> Option<&Slot> {
        self.slots.get(name)
    }

    pub fn require_slot(&self, name: &str) -> Result<&Slot, ConfigurationError> {
        self.slots
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownSlot(name.to_string()))
    }

    /// Slot map every tracker starts from
    pub fn initial_slots(&self) -> BTreeMap<String, serde_json::Value> {
        self.slots
            .iter()
            .map(|(name, slot)| (name.clone(), slot.initial()))
            .collect()
    }

    pub fn form(&self, name: &str) -> Option<&FormConfig> {
        self.forms.get(name)
    }

    pub fn forms(&self) -> &BTreeMap<String, FormConfig> {
        &self.forms
    }

    pub fn has_intent(&self, name: &str) -> bool {
        self.intents.contains_key(name)
    }

    /// Action declared to run whenever `intent` is recognized
    pub fn trigger_for(&self, intent: &str) -> Option<&str> {
        self.intents.get(intent)?.triggers.as_deref()
    }

    pub fn has_entity(&self, name: &str) -> bool {
        self.entities.contains(name)
    }

    pub fn templates(&self) -> &TemplateStore {
        &self.templates
    }

    pub fn session(&self) -> &SessionConfig {
        &self.session
    }

    /// Stable content hash sent to the action server
    pub fn digest(&self) -> &str {
        &self.digest
    }
}
