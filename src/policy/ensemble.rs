//! Arbitration between sub-policies

use super::config::{PolicyConfig, PolicyEntry};
use super::{
    FallbackPolicy, FormPolicy, MappingPolicy, MemoizationPolicy, Policy, PolicyError, Prediction,
    Proposal,
};
use crate::domain::{Domain, ACTION_LISTEN};
use crate::error::ConfigurationError;
use crate::tracker::TrackerSnapshot;
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::sync::Arc;

/// Name reported when the threshold rule picks the fallback action
pub const THRESHOLD_FALLBACK: &str = "fallback";

struct Registered {
    policy: Arc<dyn Policy>,
    priority: u32,
}

struct Candidate<'a> {
    proposal: Proposal,
    policy: &'a str,
    priority: u32,
    index: usize,
}

impl Candidate<'_> {
    /// Higher confidence, then higher priority, then earlier registration
    fn rank(&self, other: &Self) -> Ordering {
        self.proposal
            .confidence
            .total_cmp(&other.proposal.confidence)
            .then(self.priority.cmp(&other.priority))
            .then(other.index.cmp(&self.index))
    }
}

/// Ordered set of policies plus the rules that turn their proposals into one
/// decision
pub struct PolicyEnsemble {
    policies: Vec<Registered>,
    fallback_action: String,
    core_threshold: f64,
    form_overrides: BTreeSet<String>,
}

impl PolicyEnsemble {
    pub fn new(fallback_action: impl Into<String>, core_threshold: f64) -> Self {
        Self {
            policies: Vec::new(),
            fallback_action: fallback_action.into(),
            core_threshold,
            form_overrides: PolicyConfig::default().form_overrides.into_iter().collect(),
        }
    }

    /// Replace the actions admissible while a form is active
    pub fn with_form_overrides<I, S>(mut self, overrides: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.form_overrides = overrides.into_iter().map(Into::into).collect();
        self
    }

    /// Register a policy with its kind's default priority
    pub fn register(&mut self, policy: Arc<dyn Policy>) {
        let priority = policy.kind().default_priority();
        self.register_with_priority(policy, priority);
    }

    pub fn register_with_priority(&mut self, policy: Arc<dyn Policy>, priority: u32) {
        tracing::debug!(policy = policy.name(), priority, "Registered policy");
        self.policies.push(Registered { policy, priority });
    }

    /// Build the ensemble described by a policy file
    pub fn from_config(config: &PolicyConfig, domain: &Domain) -> Result<Self, ConfigurationError> {
        domain.require_action(&config.fallback_action)?;
        for action in &config.form_overrides {
            domain.require_action(action)?;
        }
        if !(0.0..=1.0).contains(&config.core_threshold) {
            return Err(ConfigurationError::Invalid(format!(
                "core_threshold {} is outside [0, 1]",
                config.core_threshold
            )));
        }

        let mut ensemble = Self::new(config.fallback_action.clone(), config.core_threshold)
            .with_form_overrides(config.form_overrides.iter().cloned());

        for entry in &config.policies {
            let (policy, priority): (Arc<dyn Policy>, Option<u32>) = match entry {
                PolicyEntry::Form { priority } => (Arc::new(FormPolicy::new()), *priority),
                PolicyEntry::Mapping { priority } => (Arc::new(MappingPolicy::new()), *priority),
                PolicyEntry::Memoization {
                    priority,
                    max_history,
                } => (
                    Arc::new(MemoizationPolicy::from_stories(
                        max_history.unwrap_or(config.max_history),
                        &config.stories,
                        domain,
                    )?),
                    *priority,
                ),
                PolicyEntry::Fallback { priority } => (
                    Arc::new(FallbackPolicy::new(
                        config.fallback_action.clone(),
                        config.nlu_threshold,
                    )),
                    *priority,
                ),
            };
            match priority {
                Some(priority) => ensemble.register_with_priority(policy, priority),
                None => ensemble.register(policy),
            }
        }
        Ok(ensemble)
    }

    pub fn fallback_action(&self) -> &str {
        &self.fallback_action
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }

    /// Actions a policy may propose while `form` is active
    fn admissible_during_form(&self, form: &str, action: &str) -> bool {
        action == form || action == ACTION_LISTEN || self.form_overrides.contains(action)
    }

    /// Decide the next action. Never fails: erroring policies abstain and the
    /// fallback action covers everything else.
    pub fn predict_next_action(&self, tracker: &TrackerSnapshot, domain: &Domain) -> Prediction {
        let constraining_form = tracker
            .active_form
            .as_ref()
            .filter(|form| !form.rejected)
            .map(|form| form.name.as_str());

        let mut best: Option<Candidate<'_>> = None;
        for (index, registered) in self.policies.iter().enumerate() {
            let name = registered.policy.name();
            let proposal = match registered.policy.predict(tracker, domain) {
                Ok(Some(p)) if !domain.is_known_action(&p.action) => {
                    tracing::warn!(
                        policy = name,
                        error = %PolicyError::UnknownAction(p.action),
                        "Policy failed, treating as abstain"
                    );
                    continue;
                }
                Ok(Some(p)) => p,
                Ok(None) => continue,
                Err(e) => {
                    tracing::warn!(policy = name, error = %e, "Policy failed, treating as abstain");
                    continue;
                }
            };

            if let Some(form) = constraining_form {
                if !self.admissible_during_form(form, &proposal.action) {
                    tracing::debug!(
                        policy = name,
                        action = %proposal.action,
                        form,
                        "Discarding proposal outside the active form"
                    );
                    continue;
                }
            }

            let candidate = Candidate {
                proposal,
                policy: name,
                priority: registered.priority,
                index,
            };
            if best.as_ref().map_or(true, |b| candidate.rank(b).is_gt()) {
                best = Some(candidate);
            }
        }

        match best {
            Some(winner) if winner.proposal.confidence >= self.core_threshold => {
                tracing::debug!(
                    sender_id = %tracker.sender_id,
                    action = %winner.proposal.action,
                    policy = winner.policy,
                    confidence = winner.proposal.confidence,
                    "Predicted next action"
                );
                Prediction {
                    action: winner.proposal.action,
                    confidence: winner.proposal.confidence,
                    policy: winner.policy.to_string(),
                }
            }
            other => {
                tracing::debug!(
                    sender_id = %tracker.sender_id,
                    best_confidence = other.map(|c| c.proposal.confidence),
                    threshold = self.core_threshold,
                    "No proposal reached the core threshold, falling back"
                );
                Prediction {
                    action: self.fallback_action.clone(),
                    confidence: 1.0,
                    policy: THRESHOLD_FALLBACK.to_string(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{ACTION_DEFAULT_FALLBACK, ACTION_RESTART};
    use crate::policy::PolicyKind;
    use crate::testing::{snapshot_of, test_domain, FailingPolicy, FixedPolicy};
    use crate::tracker::{Event, UserMessage};
    use serde_json::json;

    fn greet_snapshot(domain: &Domain) -> TrackerSnapshot {
        snapshot_of(
            domain,
            vec![Event::UserUttered(UserMessage::with_intent("greet", 1.0))],
        )
    }

    fn ensemble() -> PolicyEnsemble {
        PolicyEnsemble::new(ACTION_DEFAULT_FALLBACK, 0.3)
    }

    #[test]
    fn all_abstaining_falls_back() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::abstaining("quiet", PolicyKind::Rule)));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.action, ACTION_DEFAULT_FALLBACK);
        assert!((prediction.confidence - 1.0).abs() < f64::EPSILON);
        assert_eq!(prediction.policy, THRESHOLD_FALLBACK);
    }

    #[test]
    fn proposals_below_threshold_fall_back() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "unsure",
            PolicyKind::Statistical,
            "utter_greet",
            0.2,
        )));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.action, ACTION_DEFAULT_FALLBACK);
    }

    #[test]
    fn highest_confidence_wins() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "form",
            PolicyKind::Form,
            "utter_chitchat",
            0.6,
        )));
        ensemble.register(Arc::new(FixedPolicy::new(
            "stats",
            PolicyKind::Statistical,
            "utter_greet",
            0.9,
        )));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.action, "utter_greet");
        assert_eq!(prediction.policy, "stats");
    }

    #[test]
    fn ties_break_by_kind_then_registration_order() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "stats",
            PolicyKind::Statistical,
            "utter_chitchat",
            0.8,
        )));
        ensemble.register(Arc::new(FixedPolicy::new(
            "rule",
            PolicyKind::Rule,
            "utter_greet",
            0.8,
        )));
        ensemble.register(Arc::new(FixedPolicy::new(
            "rule2",
            PolicyKind::Rule,
            "utter_default",
            0.8,
        )));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.policy, "rule");
    }

    #[test]
    fn configured_priority_overrides_kind_order() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "rule",
            PolicyKind::Rule,
            "utter_greet",
            0.8,
        )));
        ensemble.register_with_priority(
            Arc::new(FixedPolicy::new(
                "stats",
                PolicyKind::Statistical,
                "utter_chitchat",
                0.8,
            )),
            10,
        );
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.policy, "stats");
    }

    #[test]
    fn failing_policy_is_treated_as_abstaining() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FailingPolicy));
        ensemble.register(Arc::new(FixedPolicy::new(
            "stats",
            PolicyKind::Statistical,
            "utter_greet",
            0.5,
        )));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.action, "utter_greet");
    }

    #[test]
    fn unknown_action_proposal_is_ignored() {
        let domain = test_domain();
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "confused",
            PolicyKind::Rule,
            "utter_nothing",
            1.0,
        )));
        let prediction = ensemble.predict_next_action(&greet_snapshot(&domain), &domain);
        assert_eq!(prediction.action, ACTION_DEFAULT_FALLBACK);
    }

    #[test]
    fn active_form_discards_proposals_outside_allowed_set() {
        let domain = test_domain();
        let snapshot = snapshot_of(
            &domain,
            vec![
                Event::FormActivated {
                    name: "restaurant_form".to_string(),
                },
                Event::slot("requested_slot", json!("cuisine")),
                Event::UserUttered(UserMessage::with_intent("greet", 1.0)),
            ],
        );
        let mut ensemble = ensemble();
        ensemble.register(Arc::new(FixedPolicy::new(
            "stats",
            PolicyKind::Statistical,
            "utter_greet",
            1.0,
        )));
        ensemble.register(Arc::new(FixedPolicy::new(
            "restart",
            PolicyKind::Fallback,
            ACTION_RESTART,
            0.5,
        )));
        let prediction = ensemble.predict_next_action(&snapshot, &domain);
        assert_eq!(prediction.action, ACTION_RESTART);
    }

    #[test]
    fn from_config_registers_defaults_and_validates_fallback() {
        let domain = test_domain();
        let ensemble = PolicyEnsemble::from_config(&PolicyConfig::default(), &domain).unwrap();
        assert_eq!(ensemble.len(), 4);

        let config = PolicyConfig {
            fallback_action: "utter_nothing".to_string(),
            ..PolicyConfig::default()
        };
        assert!(matches!(
            PolicyEnsemble::from_config(&config, &domain),
            Err(ConfigurationError::UnknownAction(_))
        ));
    }
}
