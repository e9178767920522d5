//! Property-based tests for the event fold
//!
//! Replay must be deterministic and prefix-reusable for any event sequence.

use super::*;
use crate::testing::test_domain;
use proptest::prelude::*;
use serde_json::json;

// ============================================================================
// Arbitrary Generators
// ============================================================================

fn arb_slot_value() -> impl Strategy<Value = Value> {
    prop_oneof![
        Just(Value::Null),
        "[a-z]{1,8}".prop_map(Value::String),
        (1i64..20).prop_map(|n| json!(n)),
    ]
}

fn arb_user_message() -> impl Strategy<Value = UserMessage> {
    (
        prop_oneof![Just("greet"), Just("inform"), Just("request_restaurant")],
        0.0f64..=1.0,
        proptest::option::of("[a-z]{1,8}"),
    )
        .prop_map(|(intent, confidence, cuisine)| {
            let message = UserMessage::with_intent(intent, confidence);
            match cuisine {
                Some(c) => message.with_entity("cuisine", Value::String(c)),
                None => message,
            }
        })
}

fn arb_event() -> impl Strategy<Value = Event> {
    prop_oneof![
        arb_user_message().prop_map(Event::UserUttered),
        prop_oneof![
            Just("action_listen"),
            Just("utter_greet"),
            Just("restaurant_form")
        ]
        .prop_map(Event::action),
        (
            prop_oneof![Just("cuisine"), Just("num_people")],
            arb_slot_value()
        )
            .prop_map(|(name, value)| Event::slot(name, value)),
        Just(Event::FormActivated {
            name: "restaurant_form".to_string()
        }),
        Just(Event::FormDeactivated),
        Just(Event::ActionExecutionFailed {
            action_name: "restaurant_form".to_string(),
            message: "boom".to_string(),
            status: Some(400),
            slot: None,
        }),
        Just(Event::ActionExecutionRejected {
            action_name: "restaurant_form".to_string(),
            slot: Some("cuisine".to_string()),
        }),
        Just(Event::Restarted),
        Just(Event::SessionEnded),
        Just(Event::ConversationPaused),
        Just(Event::ConversationResumed),
        Just(Event::AllSlotsReset),
        Just(Event::utter("hello")),
    ]
}

fn arb_events() -> impl Strategy<Value = Vec<Event>> {
    proptest::collection::vec(arb_event(), 0..40)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #[test]
    fn replay_is_deterministic(events in arb_events()) {
        let domain = test_domain();
        let first = DialogueState::replay(&events, &domain).unwrap();
        let second = DialogueState::replay(&events, &domain).unwrap();
        prop_assert_eq!(first, second);
    }

    #[test]
    fn snapshots_from_replay_are_identical(events in arb_events()) {
        let domain = Arc::new(test_domain());
        let a = DialogueStateTracker::from_events("p", events.clone(), domain.clone()).unwrap();
        let b = DialogueStateTracker::from_events("p", events, domain).unwrap();
        prop_assert_eq!(a.current_state(), b.current_state());
    }

    #[test]
    fn replay_is_a_prefix_computation(events in arb_events(), split in 0usize..40) {
        let domain = test_domain();
        let k = split.min(events.len());
        let mut prefix = DialogueState::replay(&events[..k], &domain).unwrap();
        for event in &events[k..] {
            prefix = prefix.fold(event, &domain).unwrap();
        }
        prop_assert_eq!(prefix, DialogueState::replay(&events, &domain).unwrap());
    }

    #[test]
    fn generation_counts_session_boundaries(events in arb_events()) {
        let domain = test_domain();
        let state = DialogueState::replay(&events, &domain).unwrap();
        let boundaries = events.iter().filter(|e| e.is_session_boundary()).count() as u64;
        prop_assert_eq!(state.generation, boundaries);
    }

    #[test]
    fn recent_actions_never_exceed_capacity(events in arb_events()) {
        let domain = test_domain();
        let state = DialogueState::replay(&events, &domain).unwrap();
        prop_assert!(state.recent_actions.len() <= domain.session().action_history_size);
    }
}
