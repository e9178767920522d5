//! Engine error taxonomy
//!
//! Configuration and corruption errors are hard failures that reach the
//! caller. Execution-layer failures (`ActionExecutionError`, `ValidationError`)
//! are recoverable and get folded into the tracker as events instead.

use crate::tracker::{StoreError, TrackerError};
use serde_json::Value;
use std::path::PathBuf;
use thiserror::Error;

/// A domain, policy or action registry reference that does not resolve.
///
/// Raised at load time; never caught per turn.
#[derive(Debug, Error)]
pub enum ConfigurationError {
    #[error("Unknown slot: {0}")]
    UnknownSlot(String),
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    #[error("Unknown form: {0}")]
    UnknownForm(String),
    #[error("Unknown intent: {0}")]
    UnknownIntent(String),
    #[error("Invalid configuration: {0}")]
    Invalid(String),
    #[error("Failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

/// A slot value rejected while filling a form.
#[derive(Debug, Clone, Error, PartialEq)]
#[error("Value {value} rejected for slot '{slot}': {reason}")]
pub struct ValidationError {
    pub slot: String,
    pub value: Value,
    pub reason: String,
}

impl ValidationError {
    pub fn new(slot: impl Into<String>, value: Value, reason: impl Into<String>) -> Self {
        Self {
            slot: slot.into(),
            value,
            reason: reason.into(),
        }
    }
}

/// Replaying a stored event log produced an inconsistent state.
#[derive(Debug, Error)]
#[error("Tracker for '{sender_id}' is corrupt at event {index}: {reason}")]
pub struct TrackerCorruptionError {
    pub sender_id: String,
    pub index: usize,
    pub reason: String,
}

/// Errors that escape a turn to the caller.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error(transparent)]
    Configuration(#[from] ConfigurationError),
    #[error(transparent)]
    TrackerCorruption(#[from] TrackerCorruptionError),
    #[error("Tracker store failure: {0}")]
    Store(#[from] StoreError),
}

pub type EngineResult<T> = Result<T, EngineError>;

impl From<TrackerError> for EngineError {
    fn from(err: TrackerError) -> Self {
        match err {
            TrackerError::Configuration(e) => EngineError::Configuration(e),
            TrackerError::Store(e) => EngineError::Store(e),
        }
    }
}
