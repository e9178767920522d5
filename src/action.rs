//! Action executor
//!
//! Resolves an action name to either an in-process implementation or the
//! remote action server, runs it and returns the events it produced. Remote
//! replies are validated against the domain before anything reaches a tracker.

mod attempt;
mod builtin;
mod error;
mod remote;

pub use attempt::{AttemptState, ExecutionAttempt};
pub use error::{ActionExecutionError, FailureKind};
#[cfg(test)]
pub use remote::ActionRequest;
pub use remote::{ActionClient, ActionResponse, ResponseSpec, WebhookClient};

use crate::domain::Domain;
use crate::form::FormAction;
use crate::tracker::{Event, TrackerSnapshot};
use async_trait::async_trait;
use builtin::{
    ActionDeactivateForm, ActionDefaultFallback, ActionListen, ActionRestart, ActionSessionEnd,
    TemplateAction,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_ACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Events produced by one action run, in application order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ActionOutput {
    pub events: Vec<Event>,
}

impl ActionOutput {
    pub fn new(events: Vec<Event>) -> Self {
        Self { events }
    }

    pub fn empty() -> Self {
        Self::default()
    }

    #[cfg(test)]
    pub fn bot_texts(&self) -> Vec<&str> {
        self.events
            .iter()
            .filter_map(|e| match e {
                Event::BotUttered { text, .. } => text.as_deref(),
                _ => None,
            })
            .collect()
    }
}

/// What a local action sees while it runs
pub struct ActionContext<'a> {
    pub tracker: &'a TrackerSnapshot,
    pub domain: &'a Domain,
    /// For actions that delegate to other actions (form validation)
    pub executor: &'a ActionExecutor,
    pub cancel: &'a CancellationToken,
}

/// An action implemented in-process
#[async_trait]
pub trait LocalAction: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError>;
}

/// Where an action name resolves to
#[derive(Clone)]
pub enum Action {
    Local(Arc<dyn LocalAction>),
    Remote,
}

/// Registry of runnable actions plus the remote transport
pub struct ActionExecutor {
    domain: Arc<Domain>,
    local: HashMap<String, Arc<dyn LocalAction>>,
    client: Option<Arc<dyn ActionClient>>,
    timeout: Duration,
}

impl ActionExecutor {
    /// Register the built-ins, one template action per response template and
    /// one form action per form that is not served remotely.
    pub fn new(domain: Arc<Domain>, client: Option<Arc<dyn ActionClient>>) -> Self {
        let mut local: HashMap<String, Arc<dyn LocalAction>> = HashMap::new();
        let builtins: [Arc<dyn LocalAction>; 5] = [
            Arc::new(ActionListen),
            Arc::new(ActionRestart),
            Arc::new(ActionDefaultFallback),
            Arc::new(ActionDeactivateForm),
            Arc::new(ActionSessionEnd),
        ];
        for action in builtins {
            local.insert(action.name().to_string(), action);
        }
        for name in domain.templates().names() {
            local.insert(name.to_string(), Arc::new(TemplateAction::new(name)));
        }
        for name in domain.forms().keys() {
            if !domain.is_remote_action(name) {
                local.insert(name.clone(), Arc::new(FormAction::new(name.clone())));
            }
        }
        Self {
            domain,
            local,
            client,
            timeout: DEFAULT_ACTION_TIMEOUT,
        }
    }

    /// Deadline applied to every remote call
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Register or replace an in-process action
    #[cfg(test)]
    pub fn with_local_action(mut self, action: Arc<dyn LocalAction>) -> Self {
        self.local.insert(action.name().to_string(), action);
        self
    }

    /// Remote bindings win so a form can be delegated to the action server
    pub fn resolve(&self, name: &str) -> Result<Action, ActionExecutionError> {
        if self.domain.is_remote_action(name) {
            return Ok(Action::Remote);
        }
        self.local
            .get(name)
            .cloned()
            .map(Action::Local)
            .ok_or_else(|| ActionExecutionError::unknown_action(name))
    }

    /// Run `name` against `tracker`
    pub async fn execute(
        &self,
        name: &str,
        tracker: &TrackerSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ActionOutput, ActionExecutionError> {
        if cancel.is_cancelled() {
            return Err(ActionExecutionError::cancelled(name));
        }
        match self.resolve(name)? {
            Action::Local(action) => {
                let ctx = ActionContext {
                    tracker,
                    domain: &self.domain,
                    executor: self,
                    cancel,
                };
                action.run(&ctx).await
            }
            Action::Remote => self.execute_remote(name, tracker, cancel).await,
        }
    }

    async fn execute_remote(
        &self,
        name: &str,
        tracker: &TrackerSnapshot,
        cancel: &CancellationToken,
    ) -> Result<ActionOutput, ActionExecutionError> {
        let client = self.client.as_ref().ok_or_else(|| {
            ActionExecutionError::new(
                name,
                FailureKind::NotConfigured,
                "no action endpoint configured",
            )
        })?;
        let request = remote::ActionRequest::new(name, tracker, &self.domain);
        tracing::debug!(action = name, endpoint = client.endpoint(), "Calling action server");

        let response = tokio::select! {
            biased;
            () = cancel.cancelled() => {
                tracing::info!(action = name, "Remote action cancelled");
                return Err(ActionExecutionError::cancelled(name));
            }
            result = tokio::time::timeout(self.timeout, client.run(&request)) => {
                result.map_err(|_| {
                    ActionExecutionError::timeout(
                        name,
                        format!("no response within {}ms", self.timeout.as_millis()),
                    )
                })??
            }
        };

        self.remote_output(name, response, tracker)
    }

    /// Validate a remote reply and turn it into events. Responses are uttered
    /// first, rendered against the slots as they will be after the reply's
    /// own slot events.
    fn remote_output(
        &self,
        name: &str,
        response: ActionResponse,
        tracker: &TrackerSnapshot,
    ) -> Result<ActionOutput, ActionExecutionError> {
        let mut events = Vec::with_capacity(response.events.len());
        for raw in response.events {
            let event = Event::from_wire(raw)
                .map_err(|reason| ActionExecutionError::malformed(name, reason))?;
            self.check_event(name, &event)?;
            events.push(event);
        }

        let mut slots = tracker.slots.clone();
        for event in &events {
            if let Event::SlotSet { name, value } = event {
                slots.insert(name.clone(), value.clone());
            }
        }

        let mut output = Vec::with_capacity(response.responses.len() + events.len());
        for reply in response.responses {
            output.push(self.render_response(name, reply, &slots)?);
        }
        output.extend(events);
        Ok(ActionOutput::new(output))
    }

    fn check_event(&self, action: &str, event: &Event) -> Result<(), ActionExecutionError> {
        let problem = match event {
            Event::SlotSet { name, .. } if self.domain.slot(name).is_none() => {
                Some(format!("unknown slot '{name}'"))
            }
            Event::FormActivated { name } if self.domain.form(name).is_none() => {
                Some(format!("unknown form '{name}'"))
            }
            Event::FollowupAction { name } if !self.domain.is_known_action(name) => {
                Some(format!("unknown follow-up action '{name}'"))
            }
            _ => None,
        };
        match problem {
            Some(reason) => {
                let err = ActionExecutionError::malformed(action, format!("rejected event: {reason}"));
                Err(match event {
                    Event::SlotSet { name, .. } => err.with_slot(name.clone()),
                    _ => err,
                })
            }
            None => Ok(()),
        }
    }

    fn render_response(
        &self,
        action: &str,
        reply: ResponseSpec,
        slots: &std::collections::BTreeMap<String, serde_json::Value>,
    ) -> Result<Event, ActionExecutionError> {
        match reply.template {
            Some(template) => {
                let rendered = self
                    .domain
                    .templates()
                    .render(&template, slots, &reply.params)
                    .ok_or_else(|| {
                        ActionExecutionError::malformed(
                            action,
                            format!("response names unknown template '{template}'"),
                        )
                    })?;
                Ok(Event::BotUttered {
                    text: reply.text.or(rendered.text),
                    template: Some(template),
                    data: rendered.data,
                })
            }
            None if reply.text.is_some() => Ok(Event::BotUttered {
                text: reply.text,
                template: None,
                data: None,
            }),
            None => Err(ActionExecutionError::malformed(
                action,
                "response has neither template nor text",
            )),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{remote_form_domain, snapshot_of, test_domain, MockActionClient};
    use crate::tracker::UserMessage;
    use serde_json::json;

    fn remote_executor(client: Arc<MockActionClient>) -> ActionExecutor {
        ActionExecutor::new(Arc::new(remote_form_domain()), Some(client))
    }

    fn snapshot() -> TrackerSnapshot {
        snapshot_of(
            &remote_form_domain(),
            vec![Event::UserUttered(UserMessage::with_intent(
                "request_restaurant",
                1.0,
            ))],
        )
    }

    #[test]
    fn resolves_builtins_templates_forms_and_remote() {
        let executor = ActionExecutor::new(Arc::new(test_domain()), None);
        assert!(matches!(executor.resolve("action_listen"), Ok(Action::Local(_))));
        assert!(matches!(executor.resolve("utter_greet"), Ok(Action::Local(_))));
        assert!(matches!(executor.resolve("restaurant_form"), Ok(Action::Local(_))));
        assert!(matches!(executor.resolve("validate_cuisine"), Ok(Action::Remote)));
        let err = executor.resolve("utter_nothing").err().unwrap();
        assert_eq!(err.kind, FailureKind::UnknownAction);
    }

    #[tokio::test]
    async fn remote_reply_becomes_bot_utterances_then_events() {
        let client = Arc::new(MockActionClient::new());
        client.queue_response(ActionResponse {
            events: vec![
                json!({"event": "form", "name": "restaurant_form"}),
                json!({"event": "slot", "name": "requested_slot", "value": "cuisine"}),
            ],
            responses: vec![ResponseSpec::template("utter_ask_cuisine")],
        });
        let executor = remote_executor(client.clone());

        let output = executor
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(output.bot_texts(), vec!["what cuisine?"]);
        assert_eq!(
            output.events[1],
            Event::FormActivated {
                name: "restaurant_form".to_string()
            }
        );
        let requests = client.recorded_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].next_action, "restaurant_form");
        assert_eq!(requests[0].tracker.events.len(), 1);
    }

    #[tokio::test]
    async fn empty_reply_is_a_no_op() {
        let client = Arc::new(MockActionClient::new());
        client.queue_response(ActionResponse::default());
        let output = remote_executor(client)
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(output.events.is_empty());
    }

    #[tokio::test]
    async fn reply_naming_undeclared_slot_is_rejected() {
        let client = Arc::new(MockActionClient::new());
        client.queue_response(ActionResponse {
            events: vec![json!({"event": "slot", "name": "ghost", "value": 1})],
            responses: Vec::new(),
        });
        let err = remote_executor(client)
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
        assert_eq!(err.slot.as_deref(), Some("ghost"));
    }

    #[tokio::test]
    async fn reply_with_unknown_event_kind_is_rejected() {
        let client = Arc::new(MockActionClient::new());
        client.queue_response(ActionResponse {
            events: vec![json!({"event": "teleport"})],
            responses: Vec::new(),
        });
        let err = remote_executor(client)
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Malformed);
    }

    #[tokio::test]
    async fn remote_without_endpoint_is_not_configured() {
        let executor = ActionExecutor::new(Arc::new(remote_form_domain()), None);
        let err = executor
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::NotConfigured);
    }

    #[tokio::test]
    async fn slow_remote_call_times_out() {
        let client = Arc::new(crate::testing::DelayedActionClient::new(Duration::from_secs(5)));
        let executor = ActionExecutor::new(Arc::new(remote_form_domain()), Some(client))
            .with_timeout(Duration::from_millis(20));
        let err = executor
            .execute("restaurant_form", &snapshot(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Timeout);
    }

    #[tokio::test]
    async fn cancellation_aborts_the_call() {
        let client = Arc::new(crate::testing::DelayedActionClient::new(Duration::from_secs(5)));
        let started = client.request_started.clone();
        let executor = remote_executor_with(client);
        let cancel = CancellationToken::new();
        let snapshot = snapshot();

        let call = executor.execute("restaurant_form", &snapshot, &cancel);
        let canceller = async {
            started.notified().await;
            cancel.cancel();
        };
        let (result, ()) = tokio::join!(call, canceller);
        assert_eq!(result.unwrap_err().kind, FailureKind::Cancelled);
    }

    fn remote_executor_with(client: Arc<crate::testing::DelayedActionClient>) -> ActionExecutor {
        ActionExecutor::new(Arc::new(remote_form_domain()), Some(client))
    }
}
