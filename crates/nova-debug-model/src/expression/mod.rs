//! Evaluated values: watch/REPL expressions, variables and scopes.
//!
//! Everything that can have children shares an [`ExpressionContainer`], which pages
//! children in from the adapter on first access and memoizes them until its variables
//! reference is reassigned.

mod container;
mod diff_cache;
mod scope;
mod variable;
mod visualized;
mod watch;

use serde::{Deserialize, Serialize};

use crate::config::{DEFAULT_VARIABLES_PAGE_SIZE, MIN_VARIABLES_PAGE_SIZE};
use crate::protocol::Capabilities;

pub use container::{ContainerOptions, ExpressionContainer};
pub use diff_cache::DiffCache;
pub use scope::Scope;
pub(crate) use scope::string_hash;
pub use variable::Variable;
pub use visualized::{TreeVisualizer, VisualizationTreeItem, VisualizedExpression};
pub use watch::Expression;

/// Value shown for expressions that could not be evaluated.
pub const DEFAULT_VALUE: &str = "not available";

pub(crate) const START_SESSION_FIRST: &str = "Please start a debug session to evaluate expressions";

/// The `context` argument of a DAP `evaluate` request.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EvaluateContext {
    Watch,
    Repl,
    Hover,
    Clipboard,
    Variables,
}

impl EvaluateContext {
    pub fn as_str(&self) -> &'static str {
        match self {
            EvaluateContext::Watch => "watch",
            EvaluateContext::Repl => "repl",
            EvaluateContext::Hover => "hover",
            EvaluateContext::Clipboard => "clipboard",
            EvaluateContext::Variables => "variables",
        }
    }

    /// Context used when copying a value: adapters that do not advertise clipboard
    /// support get the plain `variables` context.
    pub fn for_clipboard(capabilities: &Capabilities) -> Self {
        if capabilities.supports_clipboard_context {
            EvaluateContext::Clipboard
        } else {
            EvaluateContext::Variables
        }
    }
}

/// Model-wide settings every container is created with.
#[derive(Clone, Debug)]
pub struct ContainerEnv {
    pub diff_cache: DiffCache,
    page_size: i64,
}

impl ContainerEnv {
    /// `page_size` is raised to [`MIN_VARIABLES_PAGE_SIZE`] when smaller.
    pub fn new(diff_cache: DiffCache, page_size: i64) -> Self {
        Self {
            diff_cache,
            page_size: page_size.max(MIN_VARIABLES_PAGE_SIZE),
        }
    }

    /// Base page size for chunking indexed children.
    pub fn page_size(&self) -> i64 {
        self.page_size
    }
}

impl Default for ContainerEnv {
    fn default() -> Self {
        Self::new(DiffCache::default(), DEFAULT_VARIABLES_PAGE_SIZE)
    }
}
