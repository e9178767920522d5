//! Derived dialogue state and the pure fold that builds it

use super::event::{Event, UserMessage};
use crate::domain::Domain;
use crate::error::ConfigurationError;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use thiserror::Error;

/// The form currently driving the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ActiveForm {
    pub name: String,
    /// Set when the form's last attempt failed or rejected a value; cleared by
    /// the next user message. While set the form yields control to the other
    /// policies.
    #[serde(default)]
    pub rejected: bool,
}

/// State derived by folding a conversation's events
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DialogueState {
    pub slots: BTreeMap<String, Value>,
    pub active_form: Option<ActiveForm>,
    pub latest_message: Option<UserMessage>,
    pub latest_action: Option<String>,
    /// The most recent event is an execution failure
    pub latest_action_failed: bool,
    /// Bounded ring of recently executed actions, oldest first
    pub recent_actions: VecDeque<String>,
    pub followup_action: Option<String>,
    pub paused: bool,
    /// Bumped on every restart or session end
    pub generation: u64,
    history_size: usize,
}

/// Why an event cannot be folded into a state
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FoldError {
    #[error("slot '{0}' is not declared in the domain")]
    UnknownSlot(String),
    #[error("form '{0}' is not declared in the domain")]
    UnknownForm(String),
    #[error("action '{0}' is not declared in the domain")]
    UnknownAction(String),
}

impl From<FoldError> for ConfigurationError {
    fn from(err: FoldError) -> Self {
        match err {
            FoldError::UnknownSlot(name) => ConfigurationError::UnknownSlot(name),
            FoldError::UnknownForm(name) => ConfigurationError::UnknownForm(name),
            FoldError::UnknownAction(name) => ConfigurationError::UnknownAction(name),
        }
    }
}

impl DialogueState {
    /// State of a conversation with no events
    pub fn initial(domain: &Domain) -> Self {
        Self {
            slots: domain.initial_slots(),
            active_form: None,
            latest_message: None,
            latest_action: None,
            latest_action_failed: false,
            recent_actions: VecDeque::new(),
            followup_action: None,
            paused: false,
            generation: 0,
            history_size: domain.session().action_history_size,
        }
    }

    /// Fold a whole event sequence from the initial state
    pub fn replay<'a>(
        events: impl IntoIterator<Item = &'a Event>,
        domain: &Domain,
    ) -> Result<Self, (usize, FoldError)> {
        let mut state = Self::initial(domain);
        for (index, event) in events.into_iter().enumerate() {
            state.apply(event, domain).map_err(|e| (index, e))?;
        }
        Ok(state)
    }

    /// Pure fold step: `(state, event) -> state`
    #[cfg(test)]
    pub fn fold(&self, event: &Event, domain: &Domain) -> Result<Self, FoldError> {
        let mut next = self.clone();
        next.apply(event, domain)?;
        Ok(next)
    }

    /// In-place fold step. On error the state is left untouched.
    pub fn apply(&mut self, event: &Event, domain: &Domain) -> Result<(), FoldError> {
        match event {
            Event::UserUttered(message) => {
                self.latest_message = Some(message.clone());
                self.latest_action_failed = false;
                if let Some(form) = self.active_form.as_mut() {
                    form.rejected = false;
                }
            }

            Event::ActionExecuted { name, .. } => {
                self.latest_action = Some(name.clone());
                self.latest_action_failed = false;
                if self.followup_action.as_deref() == Some(name.as_str()) {
                    self.followup_action = None;
                }
                self.recent_actions.push_back(name.clone());
                while self.recent_actions.len() > self.history_size {
                    self.recent_actions.pop_front();
                }
            }

            Event::BotUttered { .. } => {}

            Event::SlotSet { name, value } => {
                let slot = self
                    .slots
                    .get_mut(name)
                    .ok_or_else(|| FoldError::UnknownSlot(name.clone()))?;
                *slot = value.clone();
            }

            Event::FormActivated { name } => {
                if domain.form(name).is_none() {
                    return Err(FoldError::UnknownForm(name.clone()));
                }
                self.active_form = Some(ActiveForm {
                    name: name.clone(),
                    rejected: false,
                });
            }

            Event::FormDeactivated => {
                self.active_form = None;
            }

            Event::ActionExecutionFailed { action_name, .. } => {
                self.latest_action_failed = true;
                if self.followup_action.as_deref() == Some(action_name.as_str()) {
                    self.followup_action = None;
                }
                if let Some(form) = self.active_form.as_mut() {
                    form.rejected = true;
                }
            }

            Event::ActionExecutionRejected { .. } => {
                if let Some(form) = self.active_form.as_mut() {
                    form.rejected = true;
                }
            }

            Event::Restarted => {
                let generation = self.generation + 1;
                *self = Self::initial(domain);
                self.generation = generation;
            }

            Event::SessionEnded => {
                let slots = std::mem::take(&mut self.slots);
                let generation = self.generation + 1;
                *self = Self::initial(domain);
                if domain.session().carry_over_slots {
                    self.slots = slots;
                }
                self.generation = generation;
            }

            Event::ConversationPaused => self.paused = true,
            Event::ConversationResumed => self.paused = false,

            Event::AllSlotsReset => {
                self.slots = domain.initial_slots();
            }

            Event::FollowupAction { name } => {
                if !domain.is_known_action(name) {
                    return Err(FoldError::UnknownAction(name.clone()));
                }
                self.followup_action = Some(name.clone());
            }
        }
        Ok(())
    }
}
