//! Form / slot-filling controller
//!
//! A form owns a list of required slots and keeps asking for the missing ones
//! until every slot holds a valid value. The controller is the synchronous
//! core; `FormAction` drives it from the action executor.

mod action;

pub use action::FormAction;

use crate::domain::{Domain, FormConfig, REQUESTED_SLOT};
use crate::error::{ConfigurationError, ValidationError};
use crate::tracker::Event;
use serde_json::Value;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormState {
    Inactive,
    Active {
        form: String,
        /// Required slots still missing, in declaration order
        pending_slots: Vec<String>,
    },
}

/// State machine over one form
#[derive(Debug, Clone)]
pub struct FormController<'a> {
    domain: &'a Domain,
    state: FormState,
}

impl<'a> FormController<'a> {
    pub fn new(domain: &'a Domain) -> Self {
        Self {
            domain,
            state: FormState::Inactive,
        }
    }

    #[cfg(test)]
    pub fn state(&self) -> &FormState {
        &self.state
    }

    fn config(&self, form: &str) -> Result<&'a FormConfig, ConfigurationError> {
        self.domain
            .form(form)
            .ok_or_else(|| ConfigurationError::UnknownForm(form.to_string()))
    }

    fn active_config(&self) -> Option<&'a FormConfig> {
        match &self.state {
            FormState::Active { form, .. } => self.domain.form(form),
            FormState::Inactive => None,
        }
    }

    /// Start `form`. Required slots that already hold a value are not pending.
    pub fn activate(
        &mut self,
        form: &str,
        slots: &BTreeMap<String, Value>,
    ) -> Result<Vec<Event>, ConfigurationError> {
        self.resume(form, slots)?;
        Ok(vec![Event::FormActivated {
            name: form.to_string(),
        }])
    }

    /// Rebuild the active state of a form that is already running
    pub fn resume(
        &mut self,
        form: &str,
        slots: &BTreeMap<String, Value>,
    ) -> Result<(), ConfigurationError> {
        let config = self.config(form)?;
        let pending_slots = config
            .required_slots
            .iter()
            .filter(|slot| slots.get(*slot).map_or(true, Value::is_null))
            .cloned()
            .collect();
        self.state = FormState::Active {
            form: form.to_string(),
            pending_slots,
        };
        Ok(())
    }

    pub fn pending_slots(&self) -> &[String] {
        match &self.state {
            FormState::Active { pending_slots, .. } => pending_slots,
            FormState::Inactive => &[],
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(&self.state, FormState::Active { pending_slots, .. } if pending_slots.is_empty())
    }

    /// Slot to ask for next: declaration order for ordered forms, otherwise
    /// ascending priority with unprioritized slots last
    pub fn request_next_slot(&self) -> Option<&str> {
        let config = self.active_config()?;
        let pending = self.pending_slots();
        if config.ordered {
            return pending.first().map(String::as_str);
        }
        pending
            .iter()
            .min_by_key(|slot| config.priority.get(*slot).copied().unwrap_or(i32::MAX))
            .map(String::as_str)
    }

    /// Type-check a candidate value, returning it in canonical form
    pub fn validate(&self, slot: &str, value: Value) -> Result<Value, ValidationError> {
        let declared = self
            .domain
            .slot(slot)
            .ok_or_else(|| ValidationError::new(slot, value.clone(), "slot is not declared"))?;
        declared
            .validate_value(&value)
            .map_err(|reason| ValidationError::new(slot, value.clone(), reason))?;
        Ok(declared.coerce(value))
    }

    /// Accept a value for a pending slot
    pub fn receive_slot(&mut self, slot: &str, value: Value) -> Result<Event, ValidationError> {
        let value = self.validate(slot, value)?;
        if let FormState::Active { pending_slots, .. } = &mut self.state {
            pending_slots.retain(|s| s != slot);
        }
        Ok(Event::slot(slot, value))
    }

    /// Stop the form, clearing the requested slot
    pub fn deactivate(&mut self) -> Vec<Event> {
        self.state = FormState::Inactive;
        vec![Event::slot(REQUESTED_SLOT, Value::Null), Event::FormDeactivated]
    }
}
