use super::{Policy, PolicyError, PolicyKind, Proposal};
use crate::domain::{Domain, ACTION_LISTEN};
use crate::tracker::{Event, TrackerSnapshot};

/// Steps in when the NLU is unsure or an action failed to execute.
#[derive(Debug, Clone)]
pub struct FallbackPolicy {
    fallback_action: String,
    nlu_threshold: f64,
}

impl FallbackPolicy {
    pub fn new(fallback_action: impl Into<String>, nlu_threshold: f64) -> Self {
        Self {
            fallback_action: fallback_action.into(),
            nlu_threshold,
        }
    }
}

impl Policy for FallbackPolicy {
    fn name(&self) -> &str {
        "fallback"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Fallback
    }

    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        _domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        if let Some(Event::ActionExecutionFailed { action_name, .. }) = tracker.latest_event() {
            // A failing fallback must not be retried forever
            if *action_name == self.fallback_action {
                return Ok(Some(Proposal::certain(ACTION_LISTEN)));
            }
            return Ok(Some(Proposal::certain(self.fallback_action.clone())));
        }

        if tracker.awaiting_reaction() {
            let confidence = tracker
                .latest_message
                .as_ref()
                .map_or(0.0, |m| m.intent_confidence());
            if confidence < self.nlu_threshold {
                tracing::debug!(
                    confidence,
                    threshold = self.nlu_threshold,
                    "NLU confidence below threshold"
                );
                return Ok(Some(Proposal::certain(self.fallback_action.clone())));
            }
            return Ok(None);
        }

        if tracker.latest_action_name.as_deref() == Some(self.fallback_action.as_str()) {
            return Ok(Some(Proposal::certain(ACTION_LISTEN)));
        }
        Ok(None)
    }
}
