use super::{Policy, PolicyError, PolicyKind, Proposal};
use crate::domain::{Domain, ACTION_LISTEN};
use crate::tracker::TrackerSnapshot;

/// Keeps an active form in control of the conversation.
///
/// While a form is active and has not rejected the last input, the form runs
/// once per user message and the bot then listens. A form that just completed
/// (and its submit action, if any) is followed by listening as well.
#[derive(Debug, Default, Clone)]
pub struct FormPolicy;

impl FormPolicy {
    pub fn new() -> Self {
        Self
    }

    fn just_completed(tracker: &TrackerSnapshot, domain: &Domain) -> bool {
        let mut recent = tracker.recent_actions.iter().rev();
        let Some(last) = recent.next() else {
            return false;
        };
        if domain.form(last).is_some() {
            return true;
        }
        recent.next().and_then(|prev| domain.form(prev)).is_some_and(|form| {
            form.submit_action.as_deref() == Some(last.as_str())
        })
    }
}

impl Policy for FormPolicy {
    fn name(&self) -> &str {
        "form"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Form
    }

    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        if tracker.latest_action_failed {
            return Ok(None);
        }

        let Some(form) = &tracker.active_form else {
            if !tracker.awaiting_reaction() && Self::just_completed(tracker, domain) {
                return Ok(Some(Proposal::certain(ACTION_LISTEN)));
            }
            return Ok(None);
        };

        if form.rejected {
            return Ok(None);
        }
        if tracker.awaiting_reaction() {
            Ok(Some(Proposal::certain(form.name.clone())))
        } else if tracker.latest_action_name.as_deref() == Some(form.name.as_str()) {
            Ok(Some(Proposal::certain(ACTION_LISTEN)))
        } else {
            Ok(Some(Proposal::certain(form.name.clone())))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{snapshot_of, test_domain};
    use crate::tracker::{Event, UserMessage};
    use serde_json::json;

    fn activated() -> Vec<Event> {
        vec![
            Event::UserUttered(UserMessage::with_intent("request_restaurant", 1.0)),
            Event::action("restaurant_form"),
            Event::FormActivated {
                name: "restaurant_form".to_string(),
            },
            Event::slot("requested_slot", json!("cuisine")),
        ]
    }

    #[test]
    fn abstains_without_active_form() {
        let domain = test_domain();
        let snapshot = snapshot_of(
            &domain,
            vec![Event::UserUttered(UserMessage::with_intent("greet", 1.0))],
        );
        assert_eq!(FormPolicy.predict(&snapshot, &domain).unwrap(), None);
    }

    #[test]
    fn listens_after_the_form_ran_then_runs_it_on_the_next_message() {
        let domain = test_domain();
        let mut events = activated();
        let snapshot = snapshot_of(&domain, events.clone());
        assert_eq!(
            FormPolicy.predict(&snapshot, &domain).unwrap(),
            Some(Proposal::certain(ACTION_LISTEN))
        );

        events.push(Event::action(ACTION_LISTEN));
        events.push(Event::UserUttered(
            UserMessage::with_intent("inform", 1.0).with_entity("cuisine", json!("thai")),
        ));
        let snapshot = snapshot_of(&domain, events);
        assert_eq!(
            FormPolicy.predict(&snapshot, &domain).unwrap(),
            Some(Proposal::certain("restaurant_form"))
        );
    }

    #[test]
    fn yields_control_after_rejection_or_failure() {
        let domain = test_domain();
        let mut events = activated();
        events.push(Event::ActionExecutionRejected {
            action_name: "restaurant_form".to_string(),
            slot: Some("cuisine".to_string()),
        });
        let snapshot = snapshot_of(&domain, events.clone());
        assert_eq!(FormPolicy.predict(&snapshot, &domain).unwrap(), None);

        events.push(Event::ActionExecutionFailed {
            action_name: "restaurant_form".to_string(),
            message: "Failed to validate slot cuisine".to_string(),
            status: Some(400),
            slot: Some("cuisine".to_string()),
        });
        let snapshot = snapshot_of(&domain, events);
        assert_eq!(FormPolicy.predict(&snapshot, &domain).unwrap(), None);
    }

    #[test]
    fn listens_once_the_form_completed() {
        let domain = test_domain();
        let mut events = activated();
        events.extend([
            Event::action(ACTION_LISTEN),
            Event::UserUttered(UserMessage::with_intent("inform", 1.0)),
            Event::action("restaurant_form"),
            Event::slot("requested_slot", serde_json::Value::Null),
            Event::FormDeactivated,
        ]);
        let snapshot = snapshot_of(&domain, events);
        assert_eq!(
            FormPolicy.predict(&snapshot, &domain).unwrap(),
            Some(Proposal::certain(ACTION_LISTEN))
        );
    }
}
