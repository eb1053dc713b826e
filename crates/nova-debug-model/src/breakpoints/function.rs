use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{to_json_value, BaseBreakpoint, Persisted};
use crate::protocol::FunctionBreakpointRequest;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct FunctionBreakpointUpdate {
    pub name: Option<String>,
    pub condition: Option<Option<String>>,
    pub hit_condition: Option<Option<String>>,
}

/// Breakpoint on entry to a function, by name.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FunctionBreakpoint {
    #[serde(flatten)]
    pub base: BaseBreakpoint,
    pub name: String,
}

impl FunctionBreakpoint {
    pub fn new(name: impl Into<String>, id: Option<String>) -> Self {
        Self {
            base: BaseBreakpoint::new(id, true),
            name: name.into(),
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

    pub fn supported(&self) -> bool {
        self.base
            .data()
            .map_or(true, |data| data.supports_function_breakpoints)
    }

    pub fn update(&mut self, update: FunctionBreakpointUpdate) {
        if let Some(name) = update.name {
            self.name = name;
        }
        if let Some(condition) = update.condition {
            self.base.condition = condition;
        }
        if let Some(hit_condition) = update.hit_condition {
            self.base.hit_condition = hit_condition;
        }
    }

    pub fn to_dap(&self) -> FunctionBreakpointRequest {
        FunctionBreakpointRequest {
            name: self.name.clone(),
            condition: self.base.condition.clone(),
            hit_condition: self.base.hit_condition.clone(),
        }
    }
}

impl Persisted for FunctionBreakpoint {
    fn persisted_id(&self) -> &str {
        self.id()
    }

    fn keep_runtime_state(&mut self, previous: Self) {
        self.base.keep_session_state(previous.base);
    }
}
