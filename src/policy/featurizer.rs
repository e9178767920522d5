//! Turns tracker histories into windows of feature sets

use crate::domain::Domain;
use crate::tracker::{DialogueState, Event, FoldError};
use std::collections::BTreeSet;

/// Features describing the dialogue at one prediction point
pub type FeatureState = BTreeSet<String>;

/// Featurizes the state before every executed action, keeping the last
/// `max_history` states as the lookup window.
#[derive(Debug, Clone, Copy)]
pub struct TrackerFeaturizer {
    max_history: usize,
}

impl TrackerFeaturizer {
    pub fn new(max_history: usize) -> Self {
        Self {
            max_history: max_history.max(1),
        }
    }

    /// Features of a single folded state
    pub fn state_features(state: &DialogueState, domain: &Domain) -> FeatureState {
        let mut features = FeatureState::new();
        if let Some(message) = &state.latest_message {
            if let Some(intent) = message.intent_name() {
                features.insert(format!("intent_{intent}"));
            }
            for entity in &message.entities {
                features.insert(format!("entity_{}", entity.entity));
            }
        }
        if let Some(action) = &state.latest_action {
            features.insert(format!("prev_{action}"));
        }
        if state.latest_action_failed {
            features.insert("prev_failed".to_string());
        }
        if let Some(form) = &state.active_form {
            features.insert(format!("active_form_{}", form.name));
        }
        for (name, value) in &state.slots {
            if let Some(slot) = domain.slot(name) {
                features.extend(slot.features(name, value));
            }
        }
        features
    }

    /// `(window, action)` pairs for every action executed in `events`
    pub fn training_windows(
        &self,
        events: &[Event],
        domain: &Domain,
    ) -> Result<Vec<(Vec<FeatureState>, String)>, FoldError> {
        let mut windows = Vec::new();
        self.walk(events, domain, |window, action| {
            windows.push((window.to_vec(), action.to_string()));
        })?;
        Ok(windows)
    }

    /// Window ending at the current state of `events`
    pub fn prediction_window(
        &self,
        events: &[Event],
        domain: &Domain,
    ) -> Result<Vec<FeatureState>, FoldError> {
        let (mut states, state) = self.walk(events, domain, |_, _| {})?;
        states.push(Self::state_features(&state, domain));
        Ok(self.tail(states))
    }

    fn tail(&self, mut states: Vec<FeatureState>) -> Vec<FeatureState> {
        let skip = states.len().saturating_sub(self.max_history);
        states.drain(..skip);
        states
    }

    /// Replay `events`, calling `on_action` with the window preceding each
    /// executed action. Session boundaries start a fresh history.
    fn walk(
        &self,
        events: &[Event],
        domain: &Domain,
        mut on_action: impl FnMut(&[FeatureState], &str),
    ) -> Result<(Vec<FeatureState>, DialogueState), FoldError> {
        let mut state = DialogueState::initial(domain);
        let mut states: Vec<FeatureState> = Vec::new();
        for event in events {
            if let Event::ActionExecuted { name, .. } = event {
                states.push(Self::state_features(&state, domain));
                let start = states.len().saturating_sub(self.max_history);
                on_action(&states[start..], name);
            }
            state.apply(event, domain)?;
            if event.is_session_boundary() {
                states.clear();
            }
        }
        Ok((states, state))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ACTION_LISTEN;
    use crate::testing::test_domain;
    use crate::tracker::UserMessage;
    use serde_json::json;

    fn set(items: &[&str]) -> FeatureState {
        items.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn state_features_cover_message_action_form_and_slots() {
        let domain = test_domain();
        let events = vec![
            Event::UserUttered(
                UserMessage::with_intent("inform", 1.0).with_entity("cuisine", json!("thai")),
            ),
            Event::action("restaurant_form"),
            Event::FormActivated {
                name: "restaurant_form".to_string(),
            },
            Event::slot("cuisine", json!("thai")),
        ];
        let state = DialogueState::replay(&events, &domain).unwrap();
        let features = TrackerFeaturizer::state_features(&state, &domain);
        assert_eq!(
            features,
            set(&[
                "intent_inform",
                "entity_cuisine",
                "prev_restaurant_form",
                "active_form_restaurant_form",
                "slot_cuisine",
            ])
        );
    }

    #[test]
    fn training_windows_are_bounded_by_max_history() {
        let domain = test_domain();
        let events = vec![
            Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
            Event::action("utter_greet"),
            Event::action(ACTION_LISTEN),
            Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
            Event::action("utter_greet"),
        ];
        let windows = TrackerFeaturizer::new(2)
            .training_windows(&events, &domain)
            .unwrap();
        assert_eq!(windows.len(), 3);
        assert_eq!(windows[0].0, vec![set(&["intent_greet"])]);
        assert_eq!(windows[2].0.len(), 2);
        assert_eq!(windows[2].1, "utter_greet");
    }

    #[test]
    fn prediction_window_matches_training_window_of_same_history() {
        let domain = test_domain();
        let featurizer = TrackerFeaturizer::new(3);
        let history = vec![
            Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
            Event::action("utter_greet"),
        ];
        let trained = featurizer.training_windows(&history, &domain).unwrap();
        let predicted = featurizer
            .prediction_window(&history[..1], &domain)
            .unwrap();
        assert_eq!(trained[0].0, predicted);
    }

    #[test]
    fn restart_starts_a_fresh_window() {
        let domain = test_domain();
        let events = vec![
            Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
            Event::action("utter_greet"),
            Event::Restarted,
            Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
        ];
        let window = TrackerFeaturizer::new(5)
            .prediction_window(&events, &domain)
            .unwrap();
        assert_eq!(window, vec![set(&["intent_greet"])]);
    }
}
