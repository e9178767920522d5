//! Conversation tracker
//!
//! Event-sourced per-conversation state. The tracker owns the ordered event
//! history plus the state folded from it; every append goes to the tracker
//! store first and only then becomes visible in memory.

mod event;
mod state;
mod store;

#[cfg(test)]
mod proptests;

pub use event::{Entity, Event, Intent, UserMessage};
pub use state::{ActiveForm, DialogueState, FoldError};
pub use store::{InMemoryTrackerStore, SqliteTrackerStore, StoreError, TrackerStore};
#[cfg(test)]
pub use store::StoreResult;

use crate::domain::Domain;
use crate::error::{ConfigurationError, TrackerCorruptionError};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors from appending to a tracker
#[derive(Debug, Error)]
pub enum TrackerError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Read-only view of a tracker handed to policies and actions
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TrackerSnapshot {
    pub sender_id: String,
    pub slots: BTreeMap<String, Value>,
    pub active_form: Option<ActiveForm>,
    pub latest_message: Option<UserMessage>,
    pub latest_action_name: Option<String>,
    pub latest_action_failed: bool,
    pub followup_action: Option<String>,
    pub paused: bool,
    pub recent_actions: Vec<String>,
    pub generation: u64,
    /// Shared with the tracker; appends copy it only while a snapshot is alive
    pub events: Arc<Vec<Event>>,
    /// Index into `events` where the current session starts
    #[serde(skip)]
    session_start: usize,
}

impl TrackerSnapshot {
    #[cfg(test)]
    pub fn slot(&self, name: &str) -> Option<&Value> {
        self.slots.get(name)
    }

    pub fn latest_intent(&self) -> Option<&str> {
        self.latest_message.as_ref()?.intent_name()
    }

    pub fn latest_event(&self) -> Option<&Event> {
        self.events.last()
    }

    /// Events since the last restart or session end
    pub fn session_events(&self) -> &[Event] {
        self.events.get(self.session_start..).unwrap_or_default()
    }

    pub fn active_form_name(&self) -> Option<&str> {
        self.active_form.as_ref().map(|f| f.name.as_str())
    }

    /// True right after a user message, before any action has reacted to it
    pub fn awaiting_reaction(&self) -> bool {
        matches!(self.latest_event(), Some(Event::UserUttered(_)))
    }

    /// Whether the turn is already listening (nothing left to do)
    #[cfg(test)]
    pub fn is_listening(&self) -> bool {
        self.latest_action_name.as_deref() == Some(crate::domain::ACTION_LISTEN)
            && !self.awaiting_reaction()
    }

    /// Return a copy with one slot replaced (used for validation calls)
    pub fn with_slot(&self, name: &str, value: Value) -> Self {
        let mut copy = self.clone();
        copy.slots.insert(name.to_string(), value);
        copy
    }
}

/// In-memory tracker for one conversation
#[derive(Debug, Clone)]
pub struct DialogueStateTracker {
    sender_id: String,
    domain: Arc<Domain>,
    events: Arc<Vec<Event>>,
    state: DialogueState,
    session_start: usize,
}

impl DialogueStateTracker {
    #[cfg(test)]
    pub fn new(sender_id: impl Into<String>, domain: Arc<Domain>) -> Self {
        let state = DialogueState::initial(&domain);
        Self {
            sender_id: sender_id.into(),
            domain,
            events: Arc::default(),
            state,
            session_start: 0,
        }
    }

    /// Rebuild a tracker by replaying a stored event log
    pub fn from_events(
        sender_id: impl Into<String>,
        events: Vec<Event>,
        domain: Arc<Domain>,
    ) -> Result<Self, TrackerCorruptionError> {
        let sender_id = sender_id.into();
        let state = DialogueState::replay(&events, &domain).map_err(|(index, err)| {
            TrackerCorruptionError {
                sender_id: sender_id.clone(),
                index,
                reason: err.to_string(),
            }
        })?;
        let session_start = session_start(&events);
        Ok(Self {
            sender_id,
            domain,
            events: Arc::new(events),
            state,
            session_start,
        })
    }

    /// Append one event, persisting it before it becomes visible
    pub async fn append<S: TrackerStore + ?Sized>(
        &mut self,
        event: Event,
        store: &S,
    ) -> Result<&DialogueState, TrackerError> {
        self.append_all(vec![event], store).await?;
        Ok(&self.state)
    }

    /// Append a batch atomically: the fold runs on a copy, the batch is
    /// persisted, and only then are events and state committed.
    pub async fn append_all<S: TrackerStore + ?Sized>(
        &mut self,
        events: Vec<Event>,
        store: &S,
    ) -> Result<(), TrackerError> {
        if events.is_empty() {
            return Ok(());
        }
        let mut next = self.state.clone();
        for event in &events {
            next.apply(event, &self.domain)
                .map_err(ConfigurationError::from)?;
        }
        store.append(&self.sender_id, &events).await?;

        let base = self.events.len();
        if let Some(offset) = events.iter().rposition(Event::is_session_boundary) {
            self.session_start = base + offset + 1;
        }
        Arc::make_mut(&mut self.events).extend(events);
        self.state = next;
        Ok(())
    }

    pub fn current_state(&self) -> TrackerSnapshot {
        TrackerSnapshot {
            sender_id: self.sender_id.clone(),
            slots: self.state.slots.clone(),
            active_form: self.state.active_form.clone(),
            latest_message: self.state.latest_message.clone(),
            latest_action_name: self.state.latest_action.clone(),
            latest_action_failed: self.state.latest_action_failed,
            followup_action: self.state.followup_action.clone(),
            paused: self.state.paused,
            recent_actions: self.state.recent_actions.iter().cloned().collect(),
            generation: self.state.generation,
            events: Arc::clone(&self.events),
            session_start: self.session_start,
        }
    }

    /// Current value of a declared slot
    #[cfg(test)]
    pub fn slot(&self, name: &str) -> Result<&Value, ConfigurationError> {
        self.state
            .slots
            .get(name)
            .ok_or_else(|| ConfigurationError::UnknownSlot(name.to_string()))
    }

    pub fn is_paused(&self) -> bool {
        self.state.paused
    }

    pub fn generation(&self) -> u64 {
        self.state.generation
    }

    #[cfg(test)]
    pub fn events(&self) -> &[Event] {
        &self.events
    }
}

fn session_start(events: &[Event]) -> usize {
    events
        .iter()
        .rposition(Event::is_session_boundary)
        .map_or(0, |i| i + 1)
}
