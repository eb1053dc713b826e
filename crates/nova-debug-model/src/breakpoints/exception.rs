use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{to_json_value, BaseBreakpoint, Persisted};
use crate::protocol::ExceptionBreakpointsFilter;
use crate::session::SessionId;

/// An exception filter offered by one or more adapters.
///
/// Filters are contributed per session. When no session is focused, the filters of the
/// "fallback" session are the ones shown.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionBreakpoint {
    #[serde(flatten)]
    pub base: BaseBreakpoint,
    pub filter: String,
    pub label: String,
    #[serde(default)]
    pub supports_condition: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition_description: Option<String>,
    #[serde(default)]
    fallback: bool,
    #[serde(skip)]
    supported_sessions: HashSet<SessionId>,
}

impl ExceptionBreakpoint {
    pub fn from_filter(filter: &ExceptionBreakpointsFilter, enabled: bool, fallback: bool) -> Self {
        Self {
            base: BaseBreakpoint::new(None, enabled),
            filter: filter.filter.clone(),
            label: filter.label.clone(),
            supports_condition: filter.supports_condition.unwrap_or(false),
            description: filter.description.clone(),
            condition_description: filter.condition_description.clone(),
            fallback,
            supported_sessions: HashSet::new(),
        }
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
    }

    pub fn to_json(&self) -> Value {
        to_json_value(self)
    }

    pub fn id(&self) -> &str {
        self.base.id()
    }

    /// Same filter as declared by an adapter, compared on every user-visible field.
    pub fn matches(&self, filter: &ExceptionBreakpointsFilter) -> bool {
        self.filter == filter.filter
            && self.label == filter.label
            && self.supports_condition == filter.supports_condition.unwrap_or(false)
            && self.condition_description == filter.condition_description
            && self.description == filter.description
    }

    pub fn set_supported_session(&mut self, session_id: &SessionId, supported: bool) {
        if supported {
            self.supported_sessions.insert(session_id.clone());
        } else {
            self.supported_sessions.remove(session_id);
        }
    }

    pub fn set_fallback(&mut self, fallback: bool) {
        self.fallback = fallback;
    }

    pub fn is_fallback(&self) -> bool {
        self.fallback
    }

    pub fn is_supported_session(&self, session_id: Option<&SessionId>) -> bool {
        match session_id {
            Some(id) => self.supported_sessions.contains(id),
            None => self.fallback,
        }
    }
}

impl Persisted for ExceptionBreakpoint {
    fn persisted_id(&self) -> &str {
        self.id()
    }

    fn keep_runtime_state(&mut self, previous: Self) {
        self.base.keep_session_state(previous.base);
        self.supported_sessions = previous.supported_sessions;
    }
}
