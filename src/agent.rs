//! Message processor
//!
//! Drives one conversation turn: record the user message, then alternate
//! between asking the policy ensemble for the next action and executing it,
//! until the bot decides to listen. Turns of the same conversation are
//! serialized; different conversations run independently.

use crate::action::{ActionExecutionError, ActionExecutor, AttemptState, ExecutionAttempt};
use crate::domain::{Domain, ACTION_LISTEN, ACTION_RESTART};
use crate::error::{EngineError, EngineResult};
use crate::interpreter::Interpreter;
use crate::policy::{PolicyEnsemble, Prediction};
use crate::tracker::{
    DialogueStateTracker, Event, TrackerError, TrackerSnapshot, TrackerStore, UserMessage,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;

pub const DEFAULT_MAX_PREDICTIONS: usize = 10;
pub const DEFAULT_LOOP_LIMIT: usize = 3;

/// Policy name recorded for actions scheduled as follow-ups
const FOLLOWUP_POLICY: &str = "followup";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AgentConfig {
    /// Upper bound on actions per turn
    pub max_predictions: usize,
    /// Consecutive repeats of one action before listening is forced; 0 disables
    pub loop_limit: usize,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            max_predictions: DEFAULT_MAX_PREDICTIONS,
            loop_limit: DEFAULT_LOOP_LIMIT,
        }
    }
}

/// A message for the user produced during a turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BotMessage {
    pub recipient_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl BotMessage {
    fn from_event(recipient_id: &str, event: &Event) -> Option<Self> {
        match event {
            Event::BotUttered {
                text,
                template,
                data,
            } => Some(Self {
                recipient_id: recipient_id.to_string(),
                text: text.clone(),
                template: template.clone(),
                data: data.clone(),
            }),
            _ => None,
        }
    }
}

struct Conversation {
    /// Held for a whole turn
    turn: Mutex<()>,
    /// Held only to snapshot or commit, never across an action run
    tracker: Mutex<DialogueStateTracker>,
    /// Cancels the action currently running for this conversation
    in_flight: StdMutex<Option<CancellationToken>>,
}

impl Conversation {
    fn set_in_flight(&self, token: Option<CancellationToken>) {
        if let Ok(mut slot) = self.in_flight.lock() {
            *slot = token;
        }
    }

    fn cancel_in_flight(&self) -> bool {
        let token = self.in_flight.lock().ok().and_then(|mut slot| slot.take());
        match token {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

/// The engine's entry point
pub struct Agent {
    domain: Arc<Domain>,
    ensemble: PolicyEnsemble,
    executor: ActionExecutor,
    store: Arc<dyn TrackerStore>,
    interpreter: Arc<dyn Interpreter>,
    config: AgentConfig,
    conversations: RwLock<HashMap<String, Arc<Conversation>>>,
}

impl Agent {
    pub fn new(
        domain: Arc<Domain>,
        ensemble: PolicyEnsemble,
        executor: ActionExecutor,
        store: Arc<dyn TrackerStore>,
        interpreter: Arc<dyn Interpreter>,
    ) -> Self {
        Self {
            domain,
            ensemble,
            executor,
            store,
            interpreter,
            config: AgentConfig::default(),
            conversations: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_config(mut self, config: AgentConfig) -> Self {
        self.config = config;
        self
    }

    /// Fetch the conversation, replaying its stored events on first use
    async fn conversation(&self, sender_id: &str) -> EngineResult<Arc<Conversation>> {
        if let Some(conversation) = self.conversations.read().await.get(sender_id) {
            return Ok(conversation.clone());
        }

        let events = self.store.load(sender_id).await?;
        let replayed = events.len();
        let tracker = DialogueStateTracker::from_events(sender_id, events, self.domain.clone())?;
        if replayed > 0 {
            tracing::info!(sender_id = %sender_id, events = replayed, "Tracker restored from store");
        }

        let mut conversations = self.conversations.write().await;
        let conversation = conversations
            .entry(sender_id.to_string())
            .or_insert_with(|| {
                Arc::new(Conversation {
                    turn: Mutex::new(()),
                    tracker: Mutex::new(tracker),
                    in_flight: StdMutex::new(None),
                })
            })
            .clone();
        Ok(conversation)
    }

    /// Interpret raw text and run a turn
    pub async fn handle_text(&self, sender_id: &str, text: &str) -> EngineResult<Vec<BotMessage>> {
        let message = self.interpreter.parse(text).await;
        self.handle_message(sender_id, message).await
    }

    /// Run a turn for an already interpreted message
    pub async fn handle_message(
        &self,
        sender_id: &str,
        message: UserMessage,
    ) -> EngineResult<Vec<BotMessage>> {
        let conversation = self.conversation(sender_id).await?;
        let _turn = conversation.turn.lock().await;

        tracing::info!(
            sender_id = %sender_id,
            intent = message.intent_name().unwrap_or("none"),
            "Handling user message"
        );
        {
            let mut tracker = conversation.tracker.lock().await;
            tracker
                .append(Event::UserUttered(message), self.store.as_ref())
                .await?;
            if tracker.is_paused() {
                tracing::info!(sender_id = %sender_id, "Conversation paused, not predicting");
                return Ok(Vec::new());
            }
        }

        let mut messages = Vec::new();
        for _ in 0..self.config.max_predictions {
            let snapshot = conversation.tracker.lock().await.current_state();
            let prediction = self.next_action(&snapshot);

            if prediction.action == ACTION_LISTEN {
                drop(snapshot);
                self.append(&conversation, listen_event(&prediction)).await?;
                return Ok(messages);
            }

            match self.run_action(&conversation, snapshot, &prediction).await? {
                Step::Continue(produced) => messages.extend(produced),
                Step::EndTurn(produced) => {
                    messages.extend(produced);
                    return Ok(messages);
                }
            }
        }

        tracing::warn!(
            sender_id = %sender_id,
            max_predictions = self.config.max_predictions,
            "Prediction budget exhausted, listening"
        );
        self.append(&conversation, Event::action(ACTION_LISTEN)).await?;
        Ok(messages)
    }

    /// Pending follow-up first, then the ensemble, then the loop breaker
    fn next_action(&self, snapshot: &TrackerSnapshot) -> Prediction {
        let prediction = match &snapshot.followup_action {
            Some(action) => Prediction {
                action: action.clone(),
                confidence: 1.0,
                policy: FOLLOWUP_POLICY.to_string(),
            },
            None => self.ensemble.predict_next_action(snapshot, &self.domain),
        };

        if prediction.action != ACTION_LISTEN && self.is_loop(snapshot, &prediction.action) {
            tracing::warn!(
                sender_id = %snapshot.sender_id,
                action = %prediction.action,
                loop_limit = self.config.loop_limit,
                "Action repeated too often, forcing listen"
            );
            return Prediction {
                action: ACTION_LISTEN.to_string(),
                ..prediction
            };
        }
        prediction
    }

    fn is_loop(&self, snapshot: &TrackerSnapshot, action: &str) -> bool {
        let limit = self.config.loop_limit;
        limit > 0
            && snapshot.recent_actions.len() >= limit
            && snapshot.recent_actions.iter().rev().take(limit).all(|a| a == action)
    }

    /// Execute one predicted action and commit its outcome
    async fn run_action(
        &self,
        conversation: &Conversation,
        snapshot: TrackerSnapshot,
        prediction: &Prediction,
    ) -> EngineResult<Step> {
        let action = prediction.action.as_str();
        let sender_id = snapshot.sender_id.clone();
        tracing::info!(
            sender_id = %sender_id,
            action = %action,
            policy = %prediction.policy,
            confidence = prediction.confidence,
            "Executing action"
        );

        let cancel = CancellationToken::new();
        conversation.set_in_flight(Some(cancel.clone()));
        let mut attempt = ExecutionAttempt::new(action, snapshot.generation);
        attempt.start();
        let result = self.executor.execute(action, &snapshot, &cancel).await;
        conversation.set_in_flight(None);
        // Last reader of the shared history; the commit extends it in place
        drop(snapshot);

        let mut tracker = conversation.tracker.lock().await;
        let state = attempt.finish(tracker.generation(), result.is_ok());
        debug_assert!(attempt.state().is_terminal());
        match (state, result) {
            (AttemptState::Stale, _) => {
                tracing::info!(
                    sender_id = %sender_id,
                    action = %attempt.action_name(),
                    "Conversation restarted during execution, discarding result"
                );
                Ok(Step::EndTurn(Vec::new()))
            }
            (_, Ok(output)) => {
                let mut events = Vec::with_capacity(output.events.len() + 1);
                events.push(Event::ActionExecuted {
                    name: action.to_string(),
                    policy: Some(prediction.policy.clone()),
                    confidence: Some(prediction.confidence),
                });
                events.extend(output.events);
                let produced: Vec<BotMessage> = events
                    .iter()
                    .filter_map(|e| BotMessage::from_event(&sender_id, e))
                    .collect();

                match tracker.append_all(events, self.store.as_ref()).await {
                    Ok(()) => {}
                    Err(TrackerError::Configuration(e)) => {
                        let failure = ActionExecutionError::malformed(action, e.to_string());
                        tracing::warn!(sender_id = %sender_id, error = %failure, "Action output rejected");
                        tracker.append(failure.to_event(), self.store.as_ref()).await?;
                        return Ok(Step::Continue(Vec::new()));
                    }
                    Err(TrackerError::Store(e)) => return Err(EngineError::Store(e)),
                }

                if action == ACTION_RESTART {
                    Ok(Step::EndTurn(produced))
                } else {
                    Ok(Step::Continue(produced))
                }
            }
            (_, Err(err)) => {
                tracing::warn!(
                    sender_id = %sender_id,
                    action = %action,
                    kind = %err.kind,
                    status = ?err.status,
                    slot = ?err.slot,
                    error = %err.message,
                    "Action execution failed"
                );
                tracker.append(err.to_event(), self.store.as_ref()).await?;
                Ok(Step::Continue(Vec::new()))
            }
        }
    }

    async fn append(&self, conversation: &Conversation, event: Event) -> EngineResult<()> {
        conversation
            .tracker
            .lock()
            .await
            .append(event, self.store.as_ref())
            .await?;
        Ok(())
    }

    /// Restart a conversation out of band: cancel whatever is running and
    /// record the restart without waiting for the current turn.
    pub async fn restart(&self, sender_id: &str) -> EngineResult<()> {
        let conversation = self.conversation(sender_id).await?;
        if conversation.cancel_in_flight() {
            tracing::info!(sender_id = %sender_id, "Cancelled in-flight action");
        }
        self.append(&conversation, Event::Restarted).await?;
        tracing::info!(sender_id = %sender_id, "Conversation restarted");
        Ok(())
    }

    /// Current view of a conversation
    pub async fn tracker(&self, sender_id: &str) -> EngineResult<TrackerSnapshot> {
        let conversation = self.conversation(sender_id).await?;
        let snapshot = conversation.tracker.lock().await.current_state();
        Ok(snapshot)
    }
}

enum Step {
    Continue(Vec<BotMessage>),
    EndTurn(Vec<BotMessage>),
}

fn listen_event(prediction: &Prediction) -> Event {
    Event::ActionExecuted {
        name: ACTION_LISTEN.to_string(),
        policy: Some(prediction.policy.clone()),
        confidence: Some(prediction.confidence),
    }
}
