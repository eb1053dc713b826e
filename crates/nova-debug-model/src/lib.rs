//! Client-side debugger state model for Nova.
//!
//! This crate keeps what the editor knows about running debug sessions:
//! - Breakpoints of every kind, with the verification state each session reported.
//! - Threads and their incrementally fetched call stacks.
//! - Watch expressions, variables and scopes, paged in lazily from the adapter.
//! - Raw memory access through memory references.
//!
//! The adapter itself sits behind the [`DebugSession`] trait; [`mock::MockDebugSession`]
//! is an in-memory implementation for tests.

pub mod breakpoints;
pub mod config;
pub mod error;
pub mod expression;
pub mod memory;
pub mod mock;
pub mod model;
pub mod protocol;
pub mod session;
pub mod source;
pub mod stack;

pub use crate::config::DebugModelConfig;
pub use crate::error::{ConfigError, SessionError, SessionResult};
pub use crate::expression::{DiffCache, EvaluateContext, Expression, Scope, Variable};
pub use crate::memory::{MemoryInvalidationEvent, MemoryRange, MemoryRegion};
pub use crate::model::{
    BreakpointFilter, BreakpointsChangeEvent, CallStackRefresh, DebugModel, DebugModelEvent,
    ModelSession, RawModelUpdate, StoredDebugState,
};
pub use crate::session::{DebugSession, SessionId};
pub use crate::stack::{StackFrame, StoppedDetails, Thread};
