//! Lifecycle of one action execution

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptState {
    Pending,
    InFlight,
    /// Effects committed to the tracker
    Applied,
    /// Failure recorded in place of the effects
    Failed,
    /// The conversation restarted underneath; result discarded
    Stale,
}

impl AttemptState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Applied | Self::Failed | Self::Stale)
    }
}

/// One execution of an action against the tracker generation it was
/// predicted for
#[derive(Debug, Clone)]
pub struct ExecutionAttempt {
    action_name: String,
    generation: u64,
    state: AttemptState,
}

impl ExecutionAttempt {
    pub fn new(action_name: impl Into<String>, generation: u64) -> Self {
        Self {
            action_name: action_name.into(),
            generation,
            state: AttemptState::Pending,
        }
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn state(&self) -> AttemptState {
        self.state
    }

    /// Pending -> InFlight
    pub fn start(&mut self) {
        debug_assert_eq!(self.state, AttemptState::Pending);
        self.transition(AttemptState::InFlight);
    }

    /// InFlight -> Applied | Failed | Stale. The outcome only counts when
    /// the tracker is still at the generation the attempt started from.
    pub fn finish(&mut self, current_generation: u64, succeeded: bool) -> AttemptState {
        debug_assert_eq!(self.state, AttemptState::InFlight);
        let next = if current_generation != self.generation {
            AttemptState::Stale
        } else if succeeded {
            AttemptState::Applied
        } else {
            AttemptState::Failed
        };
        self.transition(next);
        next
    }

    fn transition(&mut self, next: AttemptState) {
        tracing::debug!(
            action = %self.action_name,
            from = ?self.state,
            to = ?next,
            generation = self.generation,
            "Execution attempt transition"
        );
        self.state = next;
    }
}
