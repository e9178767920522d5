//! Policy decision component
//!
//! Several sub-policies look at the same tracker snapshot and each may propose
//! a next action with a confidence. The ensemble filters the proposals,
//! arbitrates between them and guarantees an answer by falling back to a
//! configured action.

mod config;
mod ensemble;
mod fallback;
mod featurizer;
mod form;
mod mapping;
mod memoization;

pub use config::{PolicyConfig, Story};
#[cfg(test)]
pub use config::StoryStep;
pub use ensemble::PolicyEnsemble;
pub use fallback::FallbackPolicy;
pub use form::FormPolicy;
pub use mapping::MappingPolicy;
pub use memoization::MemoizationPolicy;

use crate::domain::Domain;
use crate::tracker::TrackerSnapshot;
use serde::Serialize;
use thiserror::Error;

/// Policy kinds, declared in ascending tie-break order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyKind {
    Fallback,
    Statistical,
    Rule,
    Form,
}

impl PolicyKind {
    /// Tie-break priority used when the configuration does not override it
    pub fn default_priority(self) -> u32 {
        match self {
            PolicyKind::Form => 4,
            PolicyKind::Rule => 3,
            PolicyKind::Statistical => 2,
            PolicyKind::Fallback => 1,
        }
    }
}

/// A sub-policy's suggestion for the next action
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Proposal {
    pub action: String,
    pub confidence: f64,
}

impl Proposal {
    pub fn new(action: impl Into<String>, confidence: f64) -> Self {
        Self {
            action: action.into(),
            confidence,
        }
    }

    /// Full-confidence proposal
    pub fn certain(action: impl Into<String>) -> Self {
        Self::new(action, 1.0)
    }
}

/// The ensemble's decision
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub action: String,
    pub confidence: f64,
    /// Name of the winning policy, `fallback` when the threshold rule fired
    pub policy: String,
}

#[derive(Debug, Error)]
pub enum PolicyError {
    #[error("Cannot featurize tracker: {0}")]
    Featurization(String),
    #[error("Policy proposed unknown action '{0}'")]
    UnknownAction(String),
    #[error("Policy failure: {0}")]
    Internal(String),
}

/// One sub-policy of the ensemble
///
/// Policies are pure functions of the snapshot: no I/O, no interior state
/// that changes between calls.
pub trait Policy: Send + Sync {
    fn name(&self) -> &str;

    fn kind(&self) -> PolicyKind;

    /// Propose the next action, or `None` to abstain
    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError>;
}

impl<T: Policy + ?Sized> Policy for std::sync::Arc<T> {
    fn name(&self) -> &str {
        (**self).name()
    }

    fn kind(&self) -> PolicyKind {
        (**self).kind()
    }

    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        (**self).predict(tracker, domain)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_order_matches_tie_break_order() {
        assert!(PolicyKind::Form > PolicyKind::Rule);
        assert!(PolicyKind::Rule > PolicyKind::Statistical);
        assert!(PolicyKind::Statistical > PolicyKind::Fallback);
        assert!(PolicyKind::Form.default_priority() > PolicyKind::Rule.default_priority());
    }
}
