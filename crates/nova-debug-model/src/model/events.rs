use crate::session::SessionId;

/// Breakpoint ids affected by a change. `session_only` changes only touched
/// adapter-reported verification state, never user settings.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BreakpointsChangeEvent {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    pub changed: Vec<String>,
    pub session_only: bool,
}

impl BreakpointsChangeEvent {
    pub fn added(ids: Vec<String>) -> Self {
        Self {
            added: ids,
            ..Self::default()
        }
    }

    pub fn removed(ids: Vec<String>) -> Self {
        Self {
            removed: ids,
            ..Self::default()
        }
    }

    pub fn changed(ids: Vec<String>) -> Self {
        Self {
            changed: ids,
            ..Self::default()
        }
    }

    pub fn session_only() -> Self {
        Self {
            session_only: true,
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DebugModelEvent {
    BreakpointsChanged(BreakpointsChangeEvent),
    /// Sessions, threads or frames changed; `None` when not tied to one session.
    CallStackChanged(Option<SessionId>),
    /// The watch list changed; carries the id of the single affected expression.
    WatchExpressionsChanged(Option<String>),
    WatchExpressionValueChanged(String),
}
