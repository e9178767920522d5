//! Actions every domain gets for free

use super::{ActionContext, ActionExecutionError, ActionOutput, LocalAction};
use crate::domain::{
    ACTION_DEACTIVATE_FORM, ACTION_DEFAULT_FALLBACK, ACTION_LISTEN, ACTION_RESTART,
    ACTION_SESSION_END, REQUESTED_SLOT, UTTER_DEFAULT,
};
use crate::tracker::Event;
use async_trait::async_trait;
use serde_json::{Map, Value};

/// Marks the end of the bot's turn. Produces no events of its own.
pub struct ActionListen;

#[async_trait]
impl LocalAction for ActionListen {
    fn name(&self) -> &str {
        ACTION_LISTEN
    }

    async fn run(&self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        Ok(ActionOutput::empty())
    }
}

/// Resets the conversation
pub struct ActionRestart;

#[async_trait]
impl LocalAction for ActionRestart {
    fn name(&self) -> &str {
        ACTION_RESTART
    }

    async fn run(&self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        Ok(ActionOutput::new(vec![Event::Restarted]))
    }
}

/// Apologizes with `utter_default` when the domain defines it
pub struct ActionDefaultFallback;

#[async_trait]
impl LocalAction for ActionDefaultFallback {
    fn name(&self) -> &str {
        ACTION_DEFAULT_FALLBACK
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        if !ctx.domain.templates().contains(UTTER_DEFAULT) {
            return Ok(ActionOutput::empty());
        }
        TemplateAction::new(UTTER_DEFAULT).run(ctx).await
    }
}

/// Abandons the active form
pub struct ActionDeactivateForm;

#[async_trait]
impl LocalAction for ActionDeactivateForm {
    fn name(&self) -> &str {
        ACTION_DEACTIVATE_FORM
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        let mut events = vec![Event::FormDeactivated];
        if ctx.domain.slot(REQUESTED_SLOT).is_some() {
            events.push(Event::slot(REQUESTED_SLOT, Value::Null));
        }
        Ok(ActionOutput::new(events))
    }
}

/// Ends the session; slots carry over per the domain's session settings
pub struct ActionSessionEnd;

#[async_trait]
impl LocalAction for ActionSessionEnd {
    fn name(&self) -> &str {
        ACTION_SESSION_END
    }

    async fn run(&self, _ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        Ok(ActionOutput::new(vec![Event::SessionEnded]))
    }
}

/// Utters the response template with the same name
pub struct TemplateAction {
    name: String,
}

impl TemplateAction {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

#[async_trait]
impl LocalAction for TemplateAction {
    fn name(&self) -> &str {
        &self.name
    }

    async fn run(&self, ctx: &ActionContext<'_>) -> Result<ActionOutput, ActionExecutionError> {
        let rendered = ctx
            .domain
            .templates()
            .render(&self.name, &ctx.tracker.slots, &Map::new())
            .ok_or_else(|| {
                ActionExecutionError::local(&self.name, format!("template '{}' has no variants", self.name))
            })?;
        Ok(ActionOutput::new(vec![Event::BotUttered {
            text: rendered.text,
            template: Some(self.name.clone()),
            data: rendered.data,
        }]))
    }
}
