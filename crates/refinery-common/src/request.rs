use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Free-form domain parameters attached to a request (pairs, timeframe, timerange).
///
/// Values are kept as raw JSON so callers may send strings, numbers or lists.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct DomainParameters(pub BTreeMap<String, Value>);

impl DomainParameters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<Value>) {
        self.0.insert(key.into(), value.into());
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// A parameter rendered as a string. Numbers and booleans are stringified;
    /// lists and objects are not.
    pub fn get_str(&self, key: &str) -> Option<String> {
        match self.0.get(key)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            Value::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    /// A parameter as a list of strings. A single string is split on commas.
    pub fn get_list(&self, key: &str) -> Vec<String> {
        match self.0.get(key) {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect(),
            Some(Value::String(s)) => s
                .split(',')
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
            _ => Vec::new(),
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }
}

fn default_true() -> bool {
    true
}

/// Submit or resume request shared by the HTTP, WebSocket and CLI surfaces.
///
/// The snake_case aliases accept the field names used by older clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitRequest {
    #[serde(alias = "strategy_idea")]
    pub requirement: String,
    #[serde(default, alias = "max_iterations")]
    pub max_iterations: Option<u32>,
    #[serde(default, alias = "session_id", alias = "thread_id")]
    pub session_id: Option<String>,
    #[serde(default = "default_true", alias = "is_new_session", alias = "is_new_conversation")]
    pub is_new_session: bool,
    #[serde(default, alias = "domain_parameters")]
    pub domain_parameters: DomainParameters,
}

impl SubmitRequest {
    pub fn new(requirement: impl Into<String>) -> Self {
        Self {
            requirement: requirement.into(),
            max_iterations: None,
            session_id: None,
            is_new_session: true,
            domain_parameters: DomainParameters::default(),
        }
    }

    /// True when the caller asked to continue a stored session.
    pub fn is_resume(&self) -> bool {
        self.session_id.is_some() && !self.is_new_session
    }
}
