use indexmap::IndexMap;

use crate::protocol::{BreakpointMode, BreakpointModeApplicability};

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RegisteredBreakpointMode {
    pub mode: String,
    pub label: String,
    pub description: Option<String>,
    pub applies_to: Vec<BreakpointModeApplicability>,
    /// Debug type that first contributed this `(mode, label)` pair.
    pub first_from_debug_type: String,
}

/// Breakpoint modes contributed by debug types, merged by `(mode, label)`.
#[derive(Clone, Debug, Default)]
pub struct BreakpointModeRegistry {
    modes: IndexMap<String, RegisteredBreakpointMode>,
}

impl BreakpointModeRegistry {
    pub fn register(&mut self, debug_type: &str, modes: &[BreakpointMode]) {
        for mode in modes {
            let key = format!("{}/{}", mode.mode, mode.label);
            if let Some(existing) = self.modes.get_mut(&key) {
                for target in &mode.applies_to {
                    if !existing.applies_to.contains(target) {
                        existing.applies_to.push(*target);
                    }
                }
                continue;
            }

            // Same label from a different mode: suffix both with their debug type.
            let duplicate = self
                .modes
                .values_mut()
                .find(|registered| registered.label == mode.label);
            let label = match duplicate {
                Some(duplicate) => {
                    duplicate.label =
                        format!("{} ({})", duplicate.label, duplicate.first_from_debug_type);
                    format!("{} ({debug_type})", mode.label)
                }
                None => mode.label.clone(),
            };

            self.modes.insert(
                key,
                RegisteredBreakpointMode {
                    mode: mode.mode.clone(),
                    label,
                    description: mode.description.clone(),
                    applies_to: mode.applies_to.clone(),
                    first_from_debug_type: debug_type.to_string(),
                },
            );
        }
    }

    pub fn modes_for(&self, kind: BreakpointModeApplicability) -> Vec<RegisteredBreakpointMode> {
        self.modes
            .values()
            .filter(|mode| mode.applies_to.contains(&kind))
            .cloned()
            .collect()
    }
}
