use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::{to_json_value, BaseBreakpoint, BreakpointSessionData, Persisted};
use crate::session::SessionId;
use crate::source::basename;

/// Options for creating a source line breakpoint.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakpointOptions {
    pub id: Option<String>,
    pub line_number: i64,
    pub column: Option<i64>,
    pub enabled: Option<bool>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub log_message: Option<String>,
    pub mode: Option<String>,
    pub mode_label: Option<String>,
    pub triggered_by: Option<String>,
}

/// Partial update applied by `DebugModel::update_breakpoints`. `None` leaves a field
/// untouched; the nested options clear it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakpointUpdate {
    pub line_number: Option<i64>,
    pub column: Option<Option<i64>>,
    pub condition: Option<Option<String>>,
    pub hit_condition: Option<Option<String>>,
    pub log_message: Option<Option<String>>,
    pub mode: Option<Option<String>>,
    pub mode_label: Option<Option<String>>,
    pub triggered_by: Option<Option<String>>,
}

/// A breakpoint set on a source line.
///
/// The location the user set is kept as-is; once an adapter verifies the breakpoint
/// the verified location is shown instead.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Breakpoint {
    #[serde(flatten)]
    pub base: BaseBreakpoint,
    #[serde(rename = "uri")]
    original_uri: Url,
    #[serde(rename = "lineNumber")]
    original_line: i64,
    #[serde(rename = "column", default, skip_serializing_if = "Option::is_none")]
    original_column: Option<i64>,
    #[serde(rename = "endLineNumber", default, skip_serializing_if = "Option::is_none")]
    original_end_line: Option<i64>,
    #[serde(rename = "endColumn", default, skip_serializing_if = "Option::is_none")]
    original_end_column: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    adapter_data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub triggered_by: Option<String>,
    #[serde(skip)]
    sessions_did_trigger: HashSet<SessionId>,
}

impl Breakpoint {
    pub fn new(uri: Url, options: BreakpointOptions) -> Self {
        let mut base = BaseBreakpoint::new(options.id, options.enabled.unwrap_or(true));
        base.condition = options.condition;
        base.hit_condition = options.hit_condition;
        base.log_message = options.log_message;
        base.mode = options.mode;
        base.mode_label = options.mode_label;

        Self {
            base,
            original_uri: uri,
            original_line: options.line_number,
            original_column: options.column,
            original_end_line: None,
            original_end_column: None,
            adapter_data: None,
            triggered_by: options.triggered_by,
            sessions_did_trigger: HashSet::new(),
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

    pub fn original_uri(&self) -> &Url {
        &self.original_uri
    }

    fn verified_data(&self) -> Option<&BreakpointSessionData> {
        self.base.data().filter(|data| data.verified())
    }

    pub fn verified(&self) -> bool {
        self.base.verified()
    }

    pub fn uri(&self) -> Url {
        self.verified_data()
            .and_then(|data| data.breakpoint.source.as_ref())
            .and_then(|source| source.path.as_deref())
            .and_then(|path| Url::from_file_path(path).ok())
            .unwrap_or_else(|| self.original_uri.clone())
    }

    pub fn line_number(&self) -> i64 {
        self.verified_data()
            .and_then(|data| data.breakpoint.line)
            .unwrap_or(self.original_line)
    }

    pub fn column(&self) -> Option<i64> {
        match self.verified_data() {
            Some(data) if data.breakpoint.column.is_some() => data.breakpoint.column,
            _ => self.original_column,
        }
    }

    pub fn end_line_number(&self) -> Option<i64> {
        match self.verified_data() {
            Some(data) => data.breakpoint.end_line,
            None => self.original_end_line,
        }
    }

    pub fn end_column(&self) -> Option<i64> {
        match self.verified_data() {
            Some(data) => data.breakpoint.end_column,
            None => self.original_end_column,
        }
    }

    /// The location as set by the user, independent of any session.
    pub fn session_agnostic_data(&self) -> (i64, Option<i64>) {
        (self.original_line, self.original_column)
    }

    pub fn adapter_data(&self) -> Option<&Value> {
        self.base
            .data()
            .and_then(|data| data.breakpoint.source.as_ref())
            .and_then(|source| source.adapter_data.as_ref())
            .or(self.adapter_data.as_ref())
    }

    /// Waiting for its triggering breakpoint; no adapter has reported on it yet.
    pub fn pending(&self) -> bool {
        self.base.data().is_none() && self.triggered_by.is_some()
    }

    pub fn supported(&self) -> bool {
        let Some(data) = self.base.data() else {
            return true;
        };
        if self.base.log_message.is_some() && !data.supports_log_points {
            return false;
        }
        if self.base.condition.is_some() && !data.supports_conditional_breakpoints {
            return false;
        }
        if self.base.hit_condition.is_some() && !data.supports_hit_conditional_breakpoints {
            return false;
        }
        true
    }

    pub fn set_session_data(&mut self, session_id: &SessionId, data: Option<BreakpointSessionData>) {
        self.base.set_session_data(session_id, data);
        if self.adapter_data.is_none() {
            self.adapter_data = self.adapter_data().cloned();
        }
    }

    pub fn set_session_did_trigger(&mut self, session_id: &SessionId, did_trigger: bool) {
        if did_trigger {
            self.sessions_did_trigger.insert(session_id.clone());
        } else {
            self.sessions_did_trigger.remove(session_id);
        }
    }

    pub fn session_did_trigger(&self, session_id: &SessionId) -> bool {
        self.sessions_did_trigger.contains(session_id)
    }

    pub fn update(&mut self, update: BreakpointUpdate) {
        if let Some(line) = update.line_number {
            self.original_line = line;
        }
        if let Some(column) = update.column {
            self.original_column = column;
        }
        if let Some(condition) = update.condition {
            self.base.condition = condition;
        }
        if let Some(hit_condition) = update.hit_condition {
            self.base.hit_condition = hit_condition;
        }
        if let Some(log_message) = update.log_message {
            self.base.log_message = log_message;
        }
        if let Some(mode) = update.mode {
            self.base.mode = mode;
        }
        if let Some(mode_label) = update.mode_label {
            self.base.mode_label = mode_label;
        }
        if let Some(triggered_by) = update.triggered_by {
            self.triggered_by = triggered_by;
        }
    }

    pub fn label(&self) -> String {
        format!("{} {}", uri_display_name(&self.uri()), self.line_number())
    }
}

/// Last path segment of a uri, or its authority when the path has none.
pub(crate) fn uri_display_name(uri: &Url) -> String {
    let name = basename(uri.path());
    if !name.is_empty() {
        return name.to_string();
    }
    uri.host_str().unwrap_or_else(|| uri.as_str()).to_string()
}

impl Persisted for Breakpoint {
    fn persisted_id(&self) -> &str {
        self.id()
    }

    fn keep_runtime_state(&mut self, previous: Self) {
        self.base.keep_session_state(previous.base);
        self.sessions_did_trigger = previous.sessions_did_trigger;
        if self.adapter_data.is_none() {
            self.adapter_data = previous.adapter_data;
        }
    }
}
