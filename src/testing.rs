//! Shared fixtures and mocks for unit tests
//!
//! These mocks let the turn loop and executor run without real I/O.

use crate::action::{
    ActionClient, ActionContext, ActionExecutionError, ActionOutput, ActionRequest,
    ActionResponse, LocalAction,
};
use crate::domain::Domain;
use crate::policy::{Policy, PolicyError, PolicyKind, Proposal};
use crate::tracker::{
    DialogueStateTracker, Event, StoreError, StoreResult, TrackerSnapshot, TrackerStore,
};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::Notify;

/// Restaurant-booking domain used across the test suite
pub const TEST_DOMAIN: &str = r#"
entities = ["cuisine", "number"]
actions = ["validate_cuisine"]

[intents.greet]
[intents.inform]
[intents.request_restaurant]
triggers = "restaurant_form"
[intents.chitchat]
triggers = "utter_chitchat"
[intents.restart]
triggers = "action_restart"
[intents.stop]
triggers = "action_deactivate_form"

[slots.cuisine]
type = "text"

[slots.num_people]
type = "float"
min_value = 1.0
mappings = [{ type = "from_entity", entity = "number" }]

[templates]
utter_greet = [{ text = "Hey! How are you?" }]
utter_default = [{ text = "Sorry, I didn't get that." }]
utter_ask_cuisine = [{ text = "what cuisine?" }]
utter_ask_num_people = [{ text = "how many people?" }]
utter_chitchat = [{ text = "I'm a bot, but thanks for asking." }]
utter_submit = [{ text = "All done! {cuisine} for {num_people}" }]
utter_confirm = [{ text = "{cuisine} it is" }]

[forms.restaurant_form]
required_slots = ["cuisine", "num_people"]
submit_action = "utter_submit"
"#;

pub fn test_domain() -> Domain {
    Domain::from_toml_str(TEST_DOMAIN).unwrap()
}

/// Same domain, but the form runs on the remote action server
pub fn remote_form_domain() -> Domain {
    let raw = TEST_DOMAIN.replacen(
        r#"actions = ["validate_cuisine"]"#,
        r#"actions = ["validate_cuisine", "restaurant_form"]"#,
        1,
    );
    Domain::from_toml_str(&raw).unwrap()
}

pub fn snapshot_of(domain: &Domain, events: Vec<Event>) -> TrackerSnapshot {
    DialogueStateTracker::from_events("test", events, Arc::new(domain.clone()))
        .unwrap()
        .current_state()
}

// ============================================================================
// Policies
// ============================================================================

/// Always proposes the same action, or nothing
pub struct FixedPolicy {
    name: String,
    kind: PolicyKind,
    proposal: Option<Proposal>,
}

impl FixedPolicy {
    pub fn new(name: &str, kind: PolicyKind, action: &str, confidence: f64) -> Self {
        Self {
            name: name.to_string(),
            kind,
            proposal: Some(Proposal::new(action, confidence)),
        }
    }

    pub fn abstaining(name: &str, kind: PolicyKind) -> Self {
        Self {
            name: name.to_string(),
            kind,
            proposal: None,
        }
    }
}

impl Policy for FixedPolicy {
    fn name(&self) -> &str {
        &self.name
    }

    fn kind(&self) -> PolicyKind {
        self.kind
    }

    fn predict(
        &self,
        _tracker: &TrackerSnapshot,
        _domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        Ok(self.proposal.clone())
    }
}

pub struct FailingPolicy;

impl Policy for FailingPolicy {
    fn name(&self) -> &str {
        "failing"
    }

    fn kind(&self) -> PolicyKind {
        PolicyKind::Rule
    }

    fn predict(
        &self,
        _tracker: &TrackerSnapshot,
        _domain: &Domain,
    ) -> Result<Option<Proposal>, PolicyError> {
        Err(PolicyError::Internal("policy exploded".to_string()))
    }
}

// ============================================================================
// Tracker store
// ============================================================================

/// Store whose writes always fail
pub struct FailingTrackerStore;

#[async_trait]
impl TrackerStore for FailingTrackerStore {
    async fn append(&self, _sender_id: &str, _events: &[Event]) -> StoreResult<()> {
        Err(StoreError::Unavailable("disk on fire".to_string()))
    }

    async fn load(&self, _sender_id: &str) -> StoreResult<Vec<Event>> {
        Ok(Vec::new())
    }

    async fn sender_ids(&self) -> StoreResult<Vec<String>> {
        Ok(Vec::new())
    }
}

// ============================================================================
// Mock action client
// ============================================================================

/// Action server that replays queued results in order
#[derive(Default)]
pub struct MockActionClient {
    responses: Mutex<VecDeque<Result<ActionResponse, ActionExecutionError>>>,
    /// Record of all requests made
    pub requests: Mutex<Vec<ActionRequest>>,
}

impl MockActionClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn queue_response(&self, response: ActionResponse) {
        self.responses.lock().unwrap().push_back(Ok(response));
    }

    pub fn queue_error(&self, error: ActionExecutionError) {
        self.responses.lock().unwrap().push_back(Err(error));
    }

    pub fn recorded_requests(&self) -> Vec<ActionRequest> {
        self.requests.lock().unwrap().clone()
    }

    fn next(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError> {
        self.responses
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or_else(|| {
                Err(ActionExecutionError::connection(
                    request.next_action.clone(),
                    "No mock response queued",
                ))
            })
    }
}

#[async_trait]
impl ActionClient for MockActionClient {
    async fn run(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError> {
        self.requests.lock().unwrap().push(request.clone());
        self.next(request)
    }

    fn endpoint(&self) -> &str {
        "mock://actions"
    }
}

// ============================================================================
// Delayed mocks (for cancellation testing)
// ============================================================================

/// Mock action server with a fixed response delay
pub struct DelayedActionClient {
    inner: MockActionClient,
    delay: Duration,
    /// Notified when a request starts (for test synchronization)
    pub request_started: Arc<Notify>,
}

impl DelayedActionClient {
    pub fn new(delay: Duration) -> Self {
        Self {
            inner: MockActionClient::new(),
            delay,
            request_started: Arc::new(Notify::new()),
        }
    }

    pub fn queue_response(&self, response: ActionResponse) {
        self.inner.queue_response(response);
    }
}

#[async_trait]
impl ActionClient for DelayedActionClient {
    async fn run(&self, request: &ActionRequest) -> Result<ActionResponse, ActionExecutionError> {
        self.inner.requests.lock().unwrap().push(request.clone());
        self.request_started.notify_one();
        tokio::time::sleep(self.delay).await;
        self.inner.next(request)
    }

    fn endpoint(&self) -> &str {
        "mock://slow-actions"
    }
}

/// Local action that blocks until released and ignores cancellation
pub struct GatedAction {
    name: String,
    pub started: Arc<Notify>,
    pub release: Arc<Notify>,
}

impl GatedAction {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            started: Arc::new(Notify::new()),
            release: Arc::new(Notify::new()),
        }
    }
}

#[async_trait]
impl LocalAction for GatedAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        self.started.notify_one();
        self.release.notified().await;
        Ok(ActionOutput::new(vec![Event::utter("too late")]))
    }
}
