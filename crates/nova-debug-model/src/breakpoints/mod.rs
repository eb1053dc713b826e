//! Breakpoint kinds and their per-session verification state.
//!
//! Every kind embeds a [`BaseBreakpoint`] (identity, enablement, condition fields and
//! the session-id keyed verification reports) and adds its own identity and request
//! shaping on top. [`AnyBreakpoint`] is the closed sum over the kinds.

mod data;
mod exception;
mod function;
mod instruction;
mod line;
mod modes;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::protocol::{self, Capabilities};
use crate::session::SessionId;

pub use data::{DataBreakpoint, DataBreakpointOptions, DataBreakpointSource, DataBreakpointUpdate};
pub use exception::ExceptionBreakpoint;
pub use function::{FunctionBreakpoint, FunctionBreakpointUpdate};
pub use instruction::{InstructionBreakpoint, InstructionBreakpointOptions};
pub use line::{Breakpoint, BreakpointOptions, BreakpointUpdate};
pub(crate) use line::uri_display_name;
pub use modes::{BreakpointModeRegistry, RegisteredBreakpointMode};

pub fn new_breakpoint_id() -> String {
    uuid::Uuid::new_v4().to_string()
}

fn default_enabled() -> bool {
    true
}

/// Breakpoint kinds that are restored from storage.
pub(crate) trait Persisted {
    fn persisted_id(&self) -> &str;

    /// Take over what sessions reported on `previous`, the in-memory entry with the
    /// same id. Persisted fields stay as stored.
    fn keep_runtime_state(&mut self, previous: Self);
}

/// Enable/disable surface shared by every breakpoint kind.
pub trait Enablement {
    fn id(&self) -> &str;
    fn is_enabled(&self) -> bool;
    fn set_enabled(&mut self, enabled: bool);
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BreakpointKind {
    Source,
    Function,
    Data,
    Exception,
    Instruction,
}

/// One adapter's report for a breakpoint, annotated with the capabilities of the
/// session that produced it.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakpointSessionData {
    pub breakpoint: protocol::Breakpoint,
    pub supports_conditional_breakpoints: bool,
    pub supports_hit_conditional_breakpoints: bool,
    pub supports_log_points: bool,
    pub supports_function_breakpoints: bool,
    pub supports_data_breakpoints: bool,
    pub supports_instruction_breakpoints: bool,
}

impl BreakpointSessionData {
    pub fn new(breakpoint: protocol::Breakpoint, capabilities: &Capabilities) -> Self {
        Self {
            breakpoint,
            supports_conditional_breakpoints: capabilities.supports_conditional_breakpoints,
            supports_hit_conditional_breakpoints: capabilities
                .supports_hit_conditional_breakpoints,
            supports_log_points: capabilities.supports_log_points,
            supports_function_breakpoints: capabilities.supports_function_breakpoints,
            supports_data_breakpoints: capabilities.supports_data_breakpoints,
            supports_instruction_breakpoints: capabilities.supports_instruction_breakpoints,
        }
    }

    pub fn verified(&self) -> bool {
        self.breakpoint.verified
    }

    fn location(&self) -> (Option<i64>, Option<i64>) {
        (self.breakpoint.line, self.breakpoint.column)
    }
}

/// State common to all breakpoint kinds.
///
/// The serialized form is the persisted shape (`id`, `enabled`, `condition`,
/// `hitCondition`, `logMessage`, `mode`, `modeLabel`); session reports are runtime only.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BaseBreakpoint {
    #[serde(default = "new_breakpoint_id")]
    id: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub hit_condition: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mode_label: Option<String>,
    #[serde(skip)]
    session_data: IndexMap<SessionId, BreakpointSessionData>,
    #[serde(skip)]
    data: Option<BreakpointSessionData>,
}

impl BaseBreakpoint {
    pub fn new(id: Option<String>, enabled: bool) -> Self {
        Self {
            id: id.unwrap_or_else(new_breakpoint_id),
            enabled,
            condition: None,
            hit_condition: None,
            log_message: None,
            mode: None,
            mode_label: None,
            session_data: IndexMap::new(),
            data: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    /// Merge (`Some`) or drop (`None`) one session's report and recompute the
    /// effective view.
    ///
    /// Among verified reports, entries agreeing on `(line, column)` collapse into one;
    /// the first distinct location in session registration order wins. Without any
    /// verified report the first report is used.
    pub fn set_session_data(&mut self, session_id: &SessionId, data: Option<BreakpointSessionData>) {
        match data {
            Some(data) => {
                self.session_data.insert(session_id.clone(), data);
            }
            None => {
                self.session_data.shift_remove(session_id);
            }
        }

        let mut verified: Vec<&BreakpointSessionData> = Vec::new();
        for data in self.session_data.values().filter(|d| d.verified()) {
            if !verified.iter().any(|seen| seen.location() == data.location()) {
                verified.push(data);
            }
        }

        self.data = verified
            .first()
            .copied()
            .or_else(|| self.session_data.values().next())
            .cloned();
    }

    pub(crate) fn keep_session_state(&mut self, previous: BaseBreakpoint) {
        self.session_data = previous.session_data;
        self.data = previous.data;
    }

    /// The report currently driving verification state, if any session reported.
    pub fn data(&self) -> Option<&BreakpointSessionData> {
        self.data.as_ref()
    }

    pub fn session_data(&self, session_id: &SessionId) -> Option<&BreakpointSessionData> {
        self.session_data.get(session_id)
    }

    pub fn session_ids(&self) -> impl Iterator<Item = &SessionId> + '_ {
        self.session_data.keys()
    }

    pub fn verified(&self) -> bool {
        self.data.as_ref().is_some_and(|data| data.verified())
    }

    pub fn message(&self) -> Option<&str> {
        self.data
            .as_ref()
            .and_then(|data| data.breakpoint.message.as_deref())
    }

    pub fn get_id_from_adapter(&self, session_id: &SessionId) -> Option<i64> {
        self.session_data
            .get(session_id)
            .and_then(|data| data.breakpoint.id)
    }

    /// The session-specific report projected back into protocol shape.
    pub fn get_debug_protocol_breakpoint(&self, session_id: &SessionId) -> Option<protocol::Breakpoint> {
        self.session_data
            .get(session_id)
            .map(|data| data.breakpoint.clone())
    }
}

impl Enablement for BaseBreakpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }
}

/// Borrowed view over any breakpoint kind.
#[derive(Clone, Copy, Debug)]
pub enum AnyBreakpoint<'a> {
    Source(&'a Breakpoint),
    Function(&'a FunctionBreakpoint),
    Data(&'a DataBreakpoint),
    Exception(&'a ExceptionBreakpoint),
    Instruction(&'a InstructionBreakpoint),
}

impl<'a> AnyBreakpoint<'a> {
    pub fn kind(&self) -> BreakpointKind {
        match self {
            Self::Source(_) => BreakpointKind::Source,
            Self::Function(_) => BreakpointKind::Function,
            Self::Data(_) => BreakpointKind::Data,
            Self::Exception(_) => BreakpointKind::Exception,
            Self::Instruction(_) => BreakpointKind::Instruction,
        }
    }

    pub fn base(&self) -> &'a BaseBreakpoint {
        match self {
            Self::Source(bp) => &bp.base,
            Self::Function(bp) => &bp.base,
            Self::Data(bp) => &bp.base,
            Self::Exception(bp) => &bp.base,
            Self::Instruction(bp) => &bp.base,
        }
    }

    pub fn id(&self) -> &'a str {
        self.base().id()
    }

    /// Whether the adapters that reported on this breakpoint can honour all of its
    /// settings.
    pub fn supported(&self) -> bool {
        match self {
            Self::Source(bp) => bp.supported(),
            Self::Function(bp) => bp.supported(),
            Self::Data(bp) => bp.supported(),
            Self::Exception(_) => true,
            Self::Instruction(bp) => bp.supported(),
        }
    }

    /// Short user-facing description.
    pub fn label(&self) -> String {
        match self {
            Self::Source(bp) => bp.label(),
            Self::Function(bp) => bp.name.clone(),
            Self::Data(bp) => bp.description.clone(),
            Self::Exception(bp) => bp.label.clone(),
            Self::Instruction(bp) => bp.instruction_reference.clone(),
        }
    }

    /// Message shown next to the breakpoint: the adapter's message, or an explanation
    /// of which setting the adapter cannot honour.
    pub fn message(&self) -> Option<String> {
        if let Some(message) = self.base().message() {
            return Some(message.to_string());
        }
        if self.supported() {
            return None;
        }
        let reason = match self {
            Self::Source(bp) if bp.base.log_message.is_some() => "Logpoints not supported by this debug type",
            Self::Source(bp) if bp.base.hit_condition.is_some() => {
                "Hit conditional breakpoints not supported by this debug type"
            }
            Self::Source(_) => "Conditional breakpoints not supported by this debug type",
            Self::Function(_) => "Function breakpoints are not supported by this debug type",
            Self::Data(_) => "Data breakpoints are not supported by this debug type",
            Self::Exception(_) => return None,
            Self::Instruction(_) => "Instruction breakpoints are not supported by this debug type",
        };
        Some(reason.to_string())
    }

    pub fn to_json(&self) -> serde_json::Value {
        match self {
            Self::Source(bp) => bp.to_json(),
            Self::Function(bp) => bp.to_json(),
            Self::Data(bp) => bp.to_json(),
            Self::Exception(bp) => bp.to_json(),
            Self::Instruction(bp) => bp.to_json(),
        }
    }
}

/// Serialize a breakpoint to its persisted shape. Serialization of these plain
/// structs cannot fail, so a failure degrades to `null`.
pub(crate) fn to_json_value<T: Serialize>(value: &T) -> serde_json::Value {
    serde_json::to_value(value).unwrap_or(serde_json::Value::Null)
}
