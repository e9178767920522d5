//! Response templates
//!
//! Plain lookup with `{name}` substitution. Anything fancier belongs to an
//! external NLG service.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// One variant of a response template
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Template {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

/// A template rendered for delivery
#[derive(Debug, Clone, PartialEq)]
pub struct RenderedTemplate {
    pub text: Option<String>,
    pub data: Option<Value>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TemplateStore {
    templates: BTreeMap<String, Vec<Template>>,
}

impl TemplateStore {
    #[cfg(test)]
    pub fn new(templates: BTreeMap<String, Vec<Template>>) -> Self {
        Self { templates }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.templates.get(name).is_some_and(|v| !v.is_empty())
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    /// Render the first variant of `name`, filling `{key}` placeholders from
    /// `params` first and `slots` second.
    pub fn render(
        &self,
        name: &str,
        slots: &BTreeMap<String, Value>,
        params: &Map<String, Value>,
    ) -> Option<RenderedTemplate> {
        let template = self.templates.get(name)?.first()?;
        Some(RenderedTemplate {
            text: template
                .text
                .as_deref()
                .map(|text| fill_placeholders(text, slots, params)),
            data: template.data.clone(),
        })
    }
}

fn display_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Null => "None".to_string(),
        other => other.to_string(),
    }
}

/// Single left-to-right pass: substituted values are never rescanned, and
/// unknown placeholders are kept verbatim.
fn fill_placeholders(text: &str, slots: &BTreeMap<String, Value>, params: &Map<String, Value>) -> String {
    let mut out = String::with_capacity(text.len());
    let mut rest = text;
    while let Some(open) = rest.find('{') {
        out.push_str(&rest[..open]);
        let after = &rest[open + 1..];
        let Some(close) = after.find('}') else {
            out.push('{');
            rest = after;
            break;
        };
        let key = &after[..close];
        if key.contains('{') {
            out.push('{');
            rest = after;
            continue;
        }
        match params.get(key).or_else(|| slots.get(key)) {
            Some(value) => out.push_str(&display_value(value)),
            None => {
                out.push('{');
                out.push_str(key);
                out.push('}');
            }
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    out
}
