use super::featurizer::{FeatureState, TrackerFeaturizer};
use super::{Policy, PolicyError, PolicyKind, Proposal, Story};
use crate::domain::Domain;
use crate::error::ConfigurationError;
use crate::tracker::TrackerSnapshot;
use std::collections::HashMap;

/// Replays example conversations verbatim.
///
/// Every window of featurized states seen in a story maps to the action that
/// followed it. Windows that led to different actions in different stories
/// are ambiguous and dropped.
#[derive(Debug, Clone)]
pub struct MemoizationPolicy {
    featurizer: TrackerFeaturizer,
    lookup: HashMap<Vec<FeatureState>, String>,
}

impl MemoizationPolicy {
    /// Build the lookup from stories
    pub fn from_stories(
        max_history: usize,
        stories: &[Story],
        domain: &Domain,
    ) -> Result<Self, ConfigurationError> {
        let featurizer = TrackerFeaturizer::new(max_history);
        let mut seen: HashMap<Vec<FeatureState>, Option<String>> = HashMap::new();
        for story in stories {
            let events = story.to_events(domain)?;
            let windows = featurizer.training_windows(&events, domain).map_err(|e| {
                ConfigurationError::Invalid(format!("story '{}': {e}", story.name))
            })?;
            for (window, action) in windows {
                seen.entry(window)
                    .and_modify(|known| {
                        if known.as_deref() != Some(action.as_str()) {
                            *known = None;
                        }
                    })
                    .or_insert(Some(action));
            }
        }

        let ambiguous = seen.values().filter(|v| v.is_none()).count();
        if ambiguous > 0 {
            tracing::warn!(ambiguous, "Dropping story windows that lead to conflicting actions");
        }
        let lookup: HashMap<_, _> = seen
            .into_iter()
            .filter_map(|(window, action)| Some((window, action?)))
            .collect();
        tracing::debug!(windows = lookup.len(), max_history, "Memoized stories");
        Ok(Self { featurizer, lookup })
    }
}

impl Policy for MemoizationPolicy {
    fn name(&self) -> &str {
        "memoization"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Statistical
    }

    fn predict(
        &self,
        tracker: &TrackerSnapshot,
        domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        if self.lookup.is_empty() {
            return Ok(None);
        }
        let window = self
            .featurizer
            .prediction_window(&tracker.events, domain)
            .map_err(|e| PolicyError::Featurization(e.to_string()))?;
        Ok(self.lookup.get(&window).map(Proposal::certain))
    }
}
