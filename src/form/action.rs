//! In-process form action

use super::FormController;
use crate::action::{ActionContext, ActionExecutionError, ActionOutput, LocalAction};
use crate::domain::{FormConfig, SlotMapping, REQUESTED_SLOT};
use crate::tracker::{Event, UserMessage};
use async_trait::async_trait;
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Outcome of validating one candidate value
enum Verdict {
    Accepted(Value),
    Rejected,
}

/// Runs a declared form: activates it, fills slots from user messages and
/// asks for whatever is still missing.
pub struct FormAction {
    name: String,
}

impl FormAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    /// Candidate values from the latest message. The requested slot may use
    /// every mapping; other pending slots only pick up entities.
    fn extract(
        ctx: &ActionContext<'_>,
        message: &UserMessage,
        pending: &[String],
        requested: Option<&str>,
    ) -> Vec<(String, Value)> {
        let mut order: Vec<&String> = pending.iter().collect();
        if let Some(pos) = requested.and_then(|r| order.iter().position(|s| *s == r)) {
            let slot = order.remove(pos);
            order.insert(0, slot);
        }

        let mut candidates = Vec::new();
        for slot_name in order {
            let Some(slot) = ctx.domain.slot(slot_name) else {
                continue;
            };
            let is_requested = requested == Some(slot_name.as_str());
            let value = slot
                .effective_mappings()
                .iter()
                .filter(|m| is_requested || matches!(m, SlotMapping::FromEntity { .. }))
                .find_map(|m| m.extract(slot_name, message))
                .filter(|v| !v.is_null());
            if let Some(value) = value {
                candidates.push((slot_name.clone(), value));
            }
        }
        candidates
    }

    /// Run the slot's validation action, if declared, on a tracker where the
    /// candidate is already set. The action rejects by resetting the slot.
    async fn validate_remote(
        ctx: &ActionContext<'_>,
        config: &FormConfig,
        slot: &str,
        value: Value,
        utterances: &mut Vec<Event>,
    ) -> Result<Verdict, ActionExecutionError> {
        let Some(validator) = config.validation.get(slot) else {
            return Ok(Verdict::Accepted(value));
        };
        let candidate = ctx.tracker.with_slot(slot, value.clone());
        let output = ctx
            .executor
            .execute(validator, &candidate, ctx.cancel)
            .await
            .map_err(|e| e.with_slot(slot))?;

        let mut verdict = Verdict::Accepted(value);
        for event in output.events {
            match event {
                Event::SlotSet { name, value } if name == slot => {
                    verdict = if value.is_null() {
                        Verdict::Rejected
                    } else {
                        Verdict::Accepted(value)
                    };
                }
                bot @ Event::BotUttered { .. } => utterances.push(bot),
                _ => {}
            }
        }
        Ok(verdict)
    }

    fn ask(
        &self,
        ctx: &ActionContext<'_>,
        slot: &str,
        slots: &BTreeMap<String, Value>,
    ) -> Result<Event, ActionExecutionError> {
        let template = format!("utter_ask_{slot}");
        let rendered = ctx
            .domain
            .templates()
            .render(&template, slots, &Map::new())
            .ok_or_else(|| {
                ActionExecutionError::local(&self.name, format!("missing template '{template}'"))
                    .with_slot(slot)
            })?;
        Ok(Event::BotUttered {
            text: rendered.text,
            template: Some(template),
            data: rendered.data,
        })
    }
}

#[async_trait]
impl LocalAction for FormAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        let config = ctx.domain.form(&self.name).ok_or_else(|| {
            ActionExecutionError::local(&self.name, format!("form '{}' is not declared", self.name))
        })?;
        let to_local = |e: crate::error::ConfigurationError| {
            ActionExecutionError::local(&self.name, e.to_string())
        };

        let mut slots = ctx.tracker.slots.clone();
        let mut controller = FormController::new(ctx.domain);
        let mut events = Vec::new();

        let already_active = ctx.tracker.active_form_name() == Some(self.name.as_str());
        let requested = if already_active {
            controller.resume(&self.name, &slots).map_err(to_local)?;
            slots
                .get(REQUESTED_SLOT)
                .and_then(Value::as_str)
                .map(String::from)
        } else {
            events.extend(controller.activate(&self.name, &slots).map_err(to_local)?);
            tracing::info!(form = %self.name, sender_id = %ctx.tracker.sender_id, "Form activated");
            None
        };

        let candidates = match &ctx.tracker.latest_message {
            Some(message) => Self::extract(
                ctx,
                message,
                controller.pending_slots(),
                requested.as_deref(),
            ),
            None => Vec::new(),
        };

        let mut utterances = Vec::new();
        let mut filled_requested = false;
        for (slot, value) in candidates {
            let value = match controller.validate(&slot, value) {
                Ok(value) => value,
                Err(err) => {
                    tracing::info!(form = %self.name, error = %err, "Slot value rejected");
                    continue;
                }
            };
            match Self::validate_remote(ctx, config, &slot, value, &mut utterances).await? {
                Verdict::Accepted(value) => match controller.receive_slot(&slot, value) {
                    Ok(event) => {
                        if let Event::SlotSet { name, value } = &event {
                            slots.insert(name.clone(), value.clone());
                        }
                        filled_requested |= requested.as_deref() == Some(slot.as_str());
                        events.push(event);
                    }
                    Err(err) => {
                        tracing::info!(form = %self.name, error = %err, "Slot value rejected");
                    }
                },
                Verdict::Rejected => {
                    tracing::info!(form = %self.name, slot = %slot, "Validation action rejected value");
                }
            }
        }
        events.extend(utterances);

        if let Some(requested) = requested.filter(|_| !filled_requested) {
            tracing::info!(form = %self.name, slot = %requested, "Form could not fill the requested slot");
            events.push(Event::ActionExecutionRejected {
                action_name: self.name.clone(),
                slot: Some(requested),
            });
            return Ok(ActionOutput::new(events));
        }

        if !controller.is_complete() {
            if let Some(next) = controller.request_next_slot().map(String::from) {
                events.push(Event::slot(REQUESTED_SLOT, Value::String(next.clone())));
                events.push(self.ask(ctx, &next, &slots)?);
            }
            return Ok(ActionOutput::new(events));
        }

        events.extend(controller.deactivate());
        if let Some(submit) = &config.submit_action {
            events.push(Event::FollowupAction {
                name: submit.clone(),
            });
        }
        tracing::info!(form = %self.name, sender_id = %ctx.tracker.sender_id, "Form completed");
        Ok(ActionOutput::new(events))
    }
}
