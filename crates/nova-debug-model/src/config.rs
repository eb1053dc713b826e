use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Default number of indexed children fetched per page before virtual range nodes are
/// synthesized.
pub const DEFAULT_VARIABLES_PAGE_SIZE: i64 = 100;

/// Smallest page size that still lets chunks grow.
pub const MIN_VARIABLES_PAGE_SIZE: i64 = 2;

/// Delay before the deep part of a two-phase call stack fetch is issued.
pub const DEFAULT_CALL_STACK_DEBOUNCE_MS: u64 = 420;

/// Frames requested by the debounced deep fetch (the top frame is already known).
pub const DEFAULT_DEEP_CALL_STACK_LEVELS: i64 = 19;

/// Frames requested when the caller does not ask for a specific number.
pub const DEFAULT_CALL_STACK_LEVELS: i64 = 20;

const TARGET: &str = "nova.debug_model";

/// Policy knobs of the debugger model.
///
/// Loaded from the `[debug_model]`-style TOML table of the editor configuration, or
/// built with [`DebugModelConfig::default`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct DebugModelConfig {
    /// Base page size used when chunking large indexed containers.
    pub variables_page_size: i64,
    /// Debounce window (milliseconds) for the deep call stack fetch.
    pub call_stack_debounce_ms: u64,
    /// Number of frames fetched by the deep call stack fetch.
    pub deep_call_stack_levels: i64,
    /// Number of frames fetched when no explicit level count is given.
    pub default_call_stack_levels: i64,
}

impl Default for DebugModelConfig {
    fn default() -> Self {
        Self {
            variables_page_size: DEFAULT_VARIABLES_PAGE_SIZE,
            call_stack_debounce_ms: DEFAULT_CALL_STACK_DEBOUNCE_MS,
            deep_call_stack_levels: DEFAULT_DEEP_CALL_STACK_LEVELS,
            default_call_stack_levels: DEFAULT_CALL_STACK_LEVELS,
        }
    }
}

impl DebugModelConfig {
    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::load_from_str(&text)
    }

    pub fn load_from_str(text: &str) -> Result<Self, ConfigError> {
        let config: DebugModelConfig = toml::from_str(text)?;
        Ok(config.validate())
    }

    /// Replace values the model cannot work with by their defaults.
    pub fn validate(mut self) -> Self {
        if self.variables_page_size < MIN_VARIABLES_PAGE_SIZE {
            tracing::warn!(
                target: TARGET,
                page_size = self.variables_page_size,
                "variables page size must be at least 2; using default"
            );
            self.variables_page_size = DEFAULT_VARIABLES_PAGE_SIZE;
        }
        if self.deep_call_stack_levels < 1 {
            tracing::warn!(
                target: TARGET,
                levels = self.deep_call_stack_levels,
                "deep call stack levels must be positive; using default"
            );
            self.deep_call_stack_levels = DEFAULT_DEEP_CALL_STACK_LEVELS;
        }
        if self.default_call_stack_levels < 1 {
            tracing::warn!(
                target: TARGET,
                levels = self.default_call_stack_levels,
                "default call stack levels must be positive; using default"
            );
            self.default_call_stack_levels = DEFAULT_CALL_STACK_LEVELS;
        }
        self
    }

    pub fn call_stack_debounce(&self) -> Duration {
        Duration::from_millis(self.call_stack_debounce_ms)
    }
}
