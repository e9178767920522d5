use super::{Policy, PolicyError, PolicyKind, Proposal};
use crate::domain::{Domain, ACTION_LISTEN};
use crate::tracker::{Event, TrackerSnapshot};

/// Runs the action an intent is declared to trigger, then listens.
#[derive(Debug, Default, Clone)]
pub struct MappingPolicy;

impl MappingPolicy {
    pub fn new() -> Self {
        Self
    }
}

impl Policy for MappingPolicy {
    fn name(&self) -> &str {
        "mapping"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Rule
    }

    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        if tracker.latest_action_failed {
            return Ok(None);
        }
        let Some(trigger) = tracker.latest_intent().and_then(|i| domain.trigger_for(i)) else {
            return Ok(None);
        };

        // Actions executed since the user last spoke
        let session = tracker.session_events();
        let since_user = session
            .iter()
            .rposition(|e| matches!(e, Event::UserUttered(_)))
            .map_or(session, |i| &session[i + 1..]);
        let mut executed = since_user.iter().filter_map(|e| match e {
            Event::ActionExecuted { name, .. } => Some(name.as_str()),
            _ => None,
        });

        if !executed.clone().any(|name| name == trigger) {
            Ok(Some(Proposal::certain(trigger)))
        } else if executed.next_back() == Some(trigger) {
            Ok(Some(Proposal::certain(ACTION_LISTEN)))
        } else {
            Ok(None)
        }
    }
}
