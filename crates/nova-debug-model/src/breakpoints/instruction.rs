use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{to_json_value, BaseBreakpoint};
use crate::protocol::InstructionBreakpointRequest;

#[derive(Clone, Debug, Default, PartialEq)]
pub struct InstructionBreakpointOptions {
    pub id: Option<String>,
    pub instruction_reference: String,
    pub offset: i64,
    pub address: Option<u64>,
    pub can_persist: bool,
    pub enabled: Option<bool>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub mode: Option<String>,
    pub mode_label: Option<String>,
}

/// Breakpoint on a machine instruction, addressed as a memory reference plus offset.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InstructionBreakpoint {
    #[serde(flatten)]
    pub base: BaseBreakpoint,
    pub instruction_reference: String,
    #[serde(default)]
    pub offset: i64,
    #[serde(skip)]
    pub address: Option<u64>,
    #[serde(skip)]
    pub can_persist: bool,
}

impl InstructionBreakpoint {
    pub fn new(options: InstructionBreakpointOptions) -> Self {
        let mut base = BaseBreakpoint::new(options.id, options.enabled.unwrap_or(true));
        base.condition = options.condition;
        base.hit_condition = options.hit_condition;
        base.mode = options.mode;
        base.mode_label = options.mode_label;
        Self {
            base,
            instruction_reference: options.instruction_reference,
            offset: options.offset,
            address: options.address,
            can_persist: options.can_persist,
        }
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        let mut bp: Self = serde_json::from_value(value)?;
        bp.can_persist = true;
        Ok(bp)
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
            .map_or(true, |data| data.supports_instruction_breakpoints)
    }

    pub fn to_dap(&self) -> InstructionBreakpointRequest {
        InstructionBreakpointRequest {
            instruction_reference: self.instruction_reference.clone(),
            offset: Some(self.offset),
            condition: self.base.condition.clone(),
            hit_condition: self.base.hit_condition.clone(),
            mode: self.base.mode.clone(),
        }
    }

    /// `reference` of `None` matches every instruction breakpoint; an `offset` narrows
    /// a reference match to one exact location.
    pub fn matches(&self, reference: Option<&str>, offset: Option<i64>) -> bool {
        match reference {
            None => true,
            Some(reference) => {
                self.instruction_reference == reference
                    && offset.map_or(true, |offset| self.offset == offset)
            }
        }
    }
}
