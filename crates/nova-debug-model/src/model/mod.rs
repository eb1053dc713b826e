//! The root aggregate: sessions, breakpoint collections and watch expressions.
//!
//! [`DebugModel`] is shared behind an `Arc` and mutated through `&self`; every mutation
//! is announced on the [`DebugModelEvent`] broadcast channel.

mod call_stack_refresh;
mod events;
mod session;
mod storage;

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot, watch};
use tokio::task::JoinHandle;
use url::Url;

use crate::breakpoints::{
    uri_display_name, AnyBreakpoint, BaseBreakpoint, Breakpoint, BreakpointModeRegistry,
    BreakpointOptions, BreakpointSessionData, BreakpointUpdate, DataBreakpoint,
    DataBreakpointOptions, DataBreakpointUpdate, ExceptionBreakpoint, FunctionBreakpoint,
    FunctionBreakpointUpdate, InstructionBreakpoint, InstructionBreakpointOptions,
    RegisteredBreakpointMode,
};
use crate::config::DebugModelConfig;
use crate::expression::{ContainerEnv, DiffCache, Expression};
use crate::protocol::{self, BreakpointMode, BreakpointModeApplicability, Capabilities};
use crate::session::{DebugSession, SessionId};
use crate::stack::Thread;

pub use call_stack_refresh::CallStackRefresh;
pub use events::{BreakpointsChangeEvent, DebugModelEvent};
pub use session::{ModelSession, RawModelUpdate};
pub use storage::{StoredDebugState, StoredWatchExpression};

use call_stack_refresh::DeepFetchScheduler;
use storage::{decode_entries, reconcile};

const TARGET: &str = "nova.debug_model";

const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Query for [`DebugModel::get_breakpoints`]; unset fields match everything.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BreakpointFilter {
    /// Effective (verified) location.
    pub uri: Option<Url>,
    /// Location the user set.
    pub original_uri: Option<Url>,
    pub line_number: Option<i64>,
    pub column: Option<i64>,
    pub enabled_only: bool,
    pub triggered_only: bool,
}

#[derive(Default)]
struct ModelState {
    sessions: Vec<Arc<ModelSession>>,
    breakpoints: Vec<Breakpoint>,
    breakpoints_activated: bool,
    function_breakpoints: Vec<FunctionBreakpoint>,
    exception_breakpoints: Vec<ExceptionBreakpoint>,
    data_breakpoints: Vec<DataBreakpoint>,
    instruction_breakpoints: Vec<InstructionBreakpoint>,
    watch_expressions: Vec<Arc<Expression>>,
    breakpoint_modes: BreakpointModeRegistry,
}

impl ModelState {
    fn find_breakpoint(&self, id: &str) -> Option<AnyBreakpoint<'_>> {
        if let Some(bp) = self.breakpoints.iter().find(|bp| bp.id() == id) {
            return Some(AnyBreakpoint::Source(bp));
        }
        if let Some(bp) = self.function_breakpoints.iter().find(|bp| bp.id() == id) {
            return Some(AnyBreakpoint::Function(bp));
        }
        if let Some(bp) = self.data_breakpoints.iter().find(|bp| bp.id() == id) {
            return Some(AnyBreakpoint::Data(bp));
        }
        if let Some(bp) = self.exception_breakpoints.iter().find(|bp| bp.id() == id) {
            return Some(AnyBreakpoint::Exception(bp));
        }
        self.instruction_breakpoints
            .iter()
            .find(|bp| bp.id() == id)
            .map(AnyBreakpoint::Instruction)
    }

    /// The shared state of breakpoint `id`, and whether its kind reports enablement
    /// changes (exception filters do not).
    fn find_base_mut(&mut self, id: &str) -> Option<(&mut BaseBreakpoint, bool)> {
        if let Some(bp) = self.breakpoints.iter_mut().find(|bp| bp.id() == id) {
            return Some((&mut bp.base, true));
        }
        if let Some(bp) = self.function_breakpoints.iter_mut().find(|bp| bp.id() == id) {
            return Some((&mut bp.base, true));
        }
        if let Some(bp) = self.data_breakpoints.iter_mut().find(|bp| bp.id() == id) {
            return Some((&mut bp.base, true));
        }
        if let Some(bp) = self.exception_breakpoints.iter_mut().find(|bp| bp.id() == id) {
            return Some((&mut bp.base, false));
        }
        self.instruction_breakpoints
            .iter_mut()
            .find(|bp| bp.id() == id)
            .map(|bp| (&mut bp.base, true))
    }

    fn active_sessions(&self, include_inactive: bool) -> Vec<Arc<ModelSession>> {
        self.sessions
            .iter()
            .filter(|session| include_inactive || session.is_active())
            .cloned()
            .collect()
    }
}

/// Client-side state of all debug sessions.
pub struct DebugModel {
    config: DebugModelConfig,
    env: ContainerEnv,
    events: broadcast::Sender<DebugModelEvent>,
    deep_fetches: DeepFetchScheduler,
    state: Mutex<ModelState>,
}

impl std::fmt::Debug for DebugModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("DebugModel")
            .field("sessions", &state.sessions.len())
            .field("breakpoints", &state.breakpoints.len())
            .field("watch_expressions", &state.watch_expressions.len())
            .finish_non_exhaustive()
    }
}

impl Default for DebugModel {
    fn default() -> Self {
        Self::new(DebugModelConfig::default())
    }
}

impl DebugModel {
    pub fn new(config: DebugModelConfig) -> Self {
        let config = config.validate();
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let env = ContainerEnv::new(DiffCache::new(), config.variables_page_size);
        let deep_fetches = DeepFetchScheduler::new(
            config.call_stack_debounce(),
            config.deep_call_stack_levels,
            events.clone(),
        );
        Self {
            config,
            env,
            events,
            deep_fetches,
            state: Mutex::new(ModelState {
                breakpoints_activated: true,
                ..ModelState::default()
            }),
        }
    }

    pub fn config(&self) -> &DebugModelConfig {
        &self.config
    }

    pub fn diff_cache(&self) -> &DiffCache {
        &self.env.diff_cache
    }

    /// Settings for containers created outside the model (REPL, hover).
    pub fn container_env(&self) -> &ContainerEnv {
        &self.env
    }

    pub fn subscribe(&self) -> broadcast::Receiver<DebugModelEvent> {
        self.events.subscribe()
    }

    fn fire(&self, event: DebugModelEvent) {
        // No receivers is fine.
        let _ = self.events.send(event);
    }

    fn fire_breakpoints(&self, event: BreakpointsChangeEvent) {
        self.fire(DebugModelEvent::BreakpointsChanged(event));
    }

    // ---- sessions -------------------------------------------------------------------

    /// Register `session`, replacing a session with the same id and any inactive
    /// session of the same launch configuration. Child sessions are placed after their
    /// parent and earlier siblings.
    pub fn add_session(&self, session: Arc<dyn DebugSession>) -> Arc<ModelSession> {
        let id = session.id();
        let configuration_name = session.configuration_name();
        let added = Arc::new(ModelSession::new(session, self.env.clone()));

        {
            let mut state = self.state.lock();
            state.sessions.retain(|existing| {
                existing.id() != id
                    && (existing.is_active() || existing.configuration_name() != configuration_name)
            });

            let mut suffix = 1;
            while state
                .sessions
                .iter()
                .any(|existing| existing.label() == added.label())
            {
                suffix += 1;
                added.set_label(format!("{configuration_name} {suffix}"));
            }

            let index = added.parent_id().and_then(|parent| {
                state.sessions.iter().rposition(|existing| {
                    existing.parent_id().as_ref() == Some(&parent) || existing.id() == parent
                })
            });
            match index {
                Some(index) => state.sessions.insert(index + 1, added.clone()),
                None => state.sessions.push(added.clone()),
            }
        }

        tracing::debug!(target: TARGET, session = %id, label = %added.label(), "session added");
        self.fire(DebugModelEvent::CallStackChanged(None));
        added
    }

    pub fn get_session(&self, id: &SessionId, include_inactive: bool) -> Option<Arc<ModelSession>> {
        self.state
            .lock()
            .active_sessions(include_inactive)
            .into_iter()
            .find(|session| &session.id() == id)
    }

    pub fn get_sessions(&self, include_inactive: bool) -> Vec<Arc<ModelSession>> {
        self.state.lock().active_sessions(include_inactive)
    }

    /// Apply a thread list and optional stop reported by a session.
    pub fn raw_update(&self, update: RawModelUpdate) {
        let Some(session) = self.get_session(&update.session_id, true) else {
            tracing::debug!(target: TARGET, session = %update.session_id, "update for unknown session");
            return;
        };
        session.raw_update(&update);
        self.fire(DebugModelEvent::CallStackChanged(None));
    }

    /// Reset the stop state of one thread (`reference`) or all threads of a session.
    /// Every pending deep call stack fetch is cancelled and its waiters are resolved.
    pub fn clear_threads(&self, session_id: &SessionId, remove_threads: bool, reference: Option<i64>) {
        self.deep_fetches.cancel_all();
        let Some(session) = self.get_session(session_id, true) else {
            return;
        };
        session.clear_threads(remove_threads, reference);
        self.fire(DebugModelEvent::CallStackChanged(None));
    }

    /// Fetch `levels` more frames, unless the adapter already reported that no frames
    /// remain. Without `levels` the configured default is fetched.
    pub async fn fetch_call_stack(&self, thread: &Thread, levels: Option<i64>) {
        match levels.filter(|levels| *levels > 0) {
            Some(levels) => {
                let remaining = thread
                    .stopped_details()
                    .and_then(|details| details.total_frames)
                    .map(|total| total - thread.call_stack().len() as i64);
                if remaining.map_or(true, |remaining| remaining > 0) {
                    thread.fetch_call_stack(levels).await;
                }
            }
            None => {
                thread
                    .fetch_call_stack(self.config.default_call_stack_levels)
                    .await;
            }
        }
        self.fire(DebugModelEvent::CallStackChanged(Some(thread.session_id())));
    }

    /// Refresh a freshly stopped thread's call stack.
    ///
    /// Adapters supporting delayed stack loading first get a one-frame request; the
    /// rest of the stack is fetched by a debounced deep fetch shared by all refreshes
    /// of the thread. Other adapters get a single full request. Must be called inside
    /// a tokio runtime.
    pub fn refresh_top_of_call_stack(&self, thread: &Arc<Thread>, fetch_full_stack: bool) -> CallStackRefresh {
        let (top_tx, top_rx) = oneshot::channel();
        let (whole_tx, whole_rx) = oneshot::channel();
        let thread = Arc::clone(thread);
        let events = self.events.clone();

        if thread
            .session()
            .capabilities()
            .supports_delayed_stack_trace_loading
        {
            let deep_fetches = self.deep_fetches.clone();
            tokio::spawn(async move {
                thread.fetch_call_stack(1).await;
                let _ = top_tx.send(());
                if fetch_full_stack {
                    let done = deep_fetches.schedule(Arc::clone(&thread));
                    let _ = events.send(DebugModelEvent::CallStackChanged(Some(thread.session_id())));
                    let _ = done.await;
                } else {
                    let _ = events.send(DebugModelEvent::CallStackChanged(Some(thread.session_id())));
                }
                let _ = whole_tx.send(());
            });
        } else {
            let levels = self.config.default_call_stack_levels;
            tokio::spawn(async move {
                thread.fetch_call_stack(levels).await;
                let _ = top_tx.send(());
                let _ = whole_tx.send(());
            });
        }

        CallStackRefresh::from_receivers(top_rx, whole_rx)
    }

    /// Mark the source with `uri` unavailable in every session.
    pub fn source_is_not_available(&self, uri: &str) {
        for session in self.get_sessions(true) {
            session.sources().mark_unavailable(uri);
        }
        self.fire(DebugModelEvent::CallStackChanged(None));
    }

    // ---- source breakpoints ---------------------------------------------------------

    pub fn are_breakpoints_activated(&self) -> bool {
        self.state.lock().breakpoints_activated
    }

    pub fn set_breakpoints_activated(&self, activated: bool) {
        self.state.lock().breakpoints_activated = activated;
        self.fire_breakpoints(BreakpointsChangeEvent::default());
    }

    /// Add source breakpoints for `uri`. Adding re-activates breakpoints globally.
    pub fn add_breakpoints(&self, uri: &Url, raw: Vec<BreakpointOptions>, fire: bool) -> Vec<Breakpoint> {
        let added: Vec<Breakpoint> = raw
            .into_iter()
            .map(|options| Breakpoint::new(uri.clone(), options))
            .collect();
        {
            let mut state = self.state.lock();
            state.breakpoints.extend(added.iter().cloned());
            state.breakpoints_activated = true;
            sort_and_dedup(&mut state.breakpoints);
        }
        if fire {
            self.fire_breakpoints(BreakpointsChangeEvent::added(
                added.iter().map(|bp| bp.id().to_string()).collect(),
            ));
        }
        added
    }

    pub fn remove_breakpoints(&self, ids: &[String]) {
        let removed: Vec<String> = {
            let mut state = self.state.lock();
            let (removed, kept) = std::mem::take(&mut state.breakpoints)
                .into_iter()
                .partition::<Vec<_>, _>(|bp| ids.iter().any(|id| id == bp.id()));
            state.breakpoints = kept;
            removed.iter().map(|bp| bp.id().to_string()).collect()
        };
        self.fire_breakpoints(BreakpointsChangeEvent::removed(removed));
    }

    /// Apply updates keyed by breakpoint id; unknown ids are ignored.
    pub fn update_breakpoints(&self, mut updates: HashMap<String, BreakpointUpdate>) {
        let changed = {
            let mut state = self.state.lock();
            let mut changed = Vec::new();
            for bp in &mut state.breakpoints {
                if let Some(update) = updates.remove(bp.id()) {
                    bp.update(update);
                    changed.push(bp.id().to_string());
                }
            }
            sort_and_dedup(&mut state.breakpoints);
            changed
        };
        self.fire_breakpoints(BreakpointsChangeEvent::changed(changed));
    }

    pub fn get_breakpoints(&self, filter: &BreakpointFilter) -> Vec<Breakpoint> {
        let state = self.state.lock();
        state
            .breakpoints
            .iter()
            .filter(|bp| {
                if filter.uri.as_ref().is_some_and(|uri| &bp.uri() != uri) {
                    return false;
                }
                if filter
                    .original_uri
                    .as_ref()
                    .is_some_and(|uri| bp.original_uri() != uri)
                {
                    return false;
                }
                if filter.line_number.is_some_and(|line| bp.line_number() != line) {
                    return false;
                }
                if filter.column.is_some_and(|column| bp.column() != Some(column)) {
                    return false;
                }
                if filter.enabled_only && (!state.breakpoints_activated || !bp.base.enabled) {
                    return false;
                }
                if filter.triggered_only && bp.triggered_by.is_none() {
                    return false;
                }
                true
            })
            .cloned()
            .collect()
    }

    /// Record that `breakpoint_id` was hit in `session_id`, releasing breakpoints it
    /// triggers.
    pub fn set_breakpoint_did_trigger(&self, breakpoint_id: &str, session_id: &SessionId, did_trigger: bool) {
        let found = {
            let mut state = self.state.lock();
            match state.breakpoints.iter_mut().find(|bp| bp.id() == breakpoint_id) {
                Some(bp) => {
                    bp.set_session_did_trigger(session_id, did_trigger);
                    true
                }
                None => false,
            }
        };
        if found {
            self.fire_breakpoints(BreakpointsChangeEvent {
                changed: vec![breakpoint_id.to_string()],
                session_only: true,
                ..BreakpointsChangeEvent::default()
            });
        }
    }

    // ---- fan-out --------------------------------------------------------------------

    /// Apply adapter reports of one session (keyed by breakpoint id) to every
    /// breakpoint collection. `None` drops the session's reports everywhere.
    pub fn set_breakpoint_session_data(
        &self,
        session_id: &SessionId,
        capabilities: &Capabilities,
        data: Option<&HashMap<String, protocol::Breakpoint>>,
    ) {
        {
            let mut state = self.state.lock();
            let report = |id: &str| -> Option<Option<BreakpointSessionData>> {
                match data {
                    None => Some(None),
                    Some(data) => data
                        .get(id)
                        .map(|raw| Some(BreakpointSessionData::new(raw.clone(), capabilities))),
                }
            };

            for bp in &mut state.breakpoints {
                if let Some(entry) = report(bp.id()) {
                    bp.set_session_data(session_id, entry);
                }
            }
            for bp in &mut state.function_breakpoints {
                if let Some(entry) = report(bp.id()) {
                    bp.base.set_session_data(session_id, entry);
                }
            }
            for bp in &mut state.data_breakpoints {
                if let Some(entry) = report(bp.id()) {
                    bp.base.set_session_data(session_id, entry);
                }
            }
            for bp in &mut state.exception_breakpoints {
                if let Some(entry) = report(bp.id()) {
                    bp.base.set_session_data(session_id, entry);
                }
            }
            for bp in &mut state.instruction_breakpoints {
                if let Some(entry) = report(bp.id()) {
                    bp.base.set_session_data(session_id, entry);
                }
            }
        }
        self.fire_breakpoints(BreakpointsChangeEvent::session_only());
    }

    /// The report `session_id` gave for breakpoint `breakpoint_id`, of any kind.
    pub fn get_debug_protocol_breakpoint(
        &self,
        breakpoint_id: &str,
        session_id: &SessionId,
    ) -> Option<protocol::Breakpoint> {
        let state = self.state.lock();
        state
            .find_breakpoint(breakpoint_id)
            .and_then(|bp| bp.base().get_debug_protocol_breakpoint(session_id))
    }

    /// User-facing message of breakpoint `breakpoint_id`, of any kind.
    pub fn breakpoint_message(&self, breakpoint_id: &str) -> Option<String> {
        let state = self.state.lock();
        state
            .find_breakpoint(breakpoint_id)
            .and_then(|bp| bp.message())
    }

    // ---- enablement -----------------------------------------------------------------

    /// Enable or disable one breakpoint of any kind. Enabling re-activates breakpoints
    /// globally. Returns whether the breakpoint exists.
    pub fn set_enablement(&self, breakpoint_id: &str, enable: bool) -> bool {
        let changed = {
            let mut state = self.state.lock();
            let Some((base, reports_change)) = state.find_base_mut(breakpoint_id) else {
                return false;
            };
            let changed = reports_change && base.enabled != enable;
            base.enabled = enable;
            if enable {
                state.breakpoints_activated = true;
            }
            changed
        };
        let changed = if changed {
            vec![breakpoint_id.to_string()]
        } else {
            Vec::new()
        };
        self.fire_breakpoints(BreakpointsChangeEvent::changed(changed));
        true
    }

    /// Enable or disable every source, function, data and instruction breakpoint.
    /// Exception filters are left alone.
    pub fn enable_or_disable_all_breakpoints(&self, enable: bool) {
        let changed = {
            let mut state = self.state.lock();
            let mut changed = Vec::new();
            let mut toggle = |base: &mut BaseBreakpoint| {
                if base.enabled != enable {
                    changed.push(base.id().to_string());
                }
                base.enabled = enable;
            };
            let ModelState {
                breakpoints,
                function_breakpoints,
                data_breakpoints,
                instruction_breakpoints,
                ..
            } = &mut *state;
            breakpoints.iter_mut().for_each(|bp| toggle(&mut bp.base));
            function_breakpoints.iter_mut().for_each(|bp| toggle(&mut bp.base));
            data_breakpoints.iter_mut().for_each(|bp| toggle(&mut bp.base));
            instruction_breakpoints
                .iter_mut()
                .for_each(|bp| toggle(&mut bp.base));
            if enable {
                state.breakpoints_activated = true;
            }
            changed
        };
        self.fire_breakpoints(BreakpointsChangeEvent::changed(changed));
    }

    // ---- function breakpoints -------------------------------------------------------

    pub fn get_function_breakpoints(&self) -> Vec<FunctionBreakpoint> {
        self.state.lock().function_breakpoints.clone()
    }

    pub fn add_function_breakpoint(&self, name: impl Into<String>, id: Option<String>) -> FunctionBreakpoint {
        let bp = FunctionBreakpoint::new(name, id);
        self.state.lock().function_breakpoints.push(bp.clone());
        self.fire_breakpoints(BreakpointsChangeEvent::added(vec![bp.id().to_string()]));
        bp
    }

    pub fn update_function_breakpoint(&self, id: &str, update: FunctionBreakpointUpdate) {
        let found = {
            let mut state = self.state.lock();
            match state.function_breakpoints.iter_mut().find(|bp| bp.id() == id) {
                Some(bp) => {
                    bp.update(update);
                    true
                }
                None => false,
            }
        };
        if found {
            self.fire_breakpoints(BreakpointsChangeEvent::changed(vec![id.to_string()]));
        }
    }

    /// Remove one function breakpoint, or all of them when `id` is `None`.
    pub fn remove_function_breakpoints(&self, id: Option<&str>) {
        let removed = {
            let mut state = self.state.lock();
            drain_matching(&mut state.function_breakpoints, |bp| {
                id.map_or(true, |id| bp.id() == id)
            })
            .iter()
            .map(|bp| bp.id().to_string())
            .collect()
        };
        self.fire_breakpoints(BreakpointsChangeEvent::removed(removed));
    }

    // ---- data breakpoints -----------------------------------------------------------

    pub fn get_data_breakpoints(&self) -> Vec<DataBreakpoint> {
        self.state.lock().data_breakpoints.clone()
    }

    pub fn add_data_breakpoint(&self, options: DataBreakpointOptions) -> DataBreakpoint {
        let bp = DataBreakpoint::new(options);
        self.state.lock().data_breakpoints.push(bp.clone());
        self.fire_breakpoints(BreakpointsChangeEvent::added(vec![bp.id().to_string()]));
        bp
    }

    pub fn update_data_breakpoint(&self, id: &str, update: DataBreakpointUpdate) {
        let found = {
            let mut state = self.state.lock();
            match state.data_breakpoints.iter_mut().find(|bp| bp.id() == id) {
                Some(bp) => {
                    bp.update(update);
                    true
                }
                None => false,
            }
        };
        if found {
            self.fire_breakpoints(BreakpointsChangeEvent::changed(vec![id.to_string()]));
        }
    }

    /// Remove one data breakpoint, or all of them when `id` is `None`.
    pub fn remove_data_breakpoints(&self, id: Option<&str>) {
        let removed = {
            let mut state = self.state.lock();
            drain_matching(&mut state.data_breakpoints, |bp| {
                id.map_or(true, |id| bp.id() == id)
            })
            .iter()
            .map(|bp| bp.id().to_string())
            .collect()
        };
        self.fire_breakpoints(BreakpointsChangeEvent::removed(removed));
    }

    // ---- instruction breakpoints ----------------------------------------------------

    pub fn get_instruction_breakpoints(&self) -> Vec<InstructionBreakpoint> {
        self.state.lock().instruction_breakpoints.clone()
    }

    pub fn add_instruction_breakpoint(&self, options: InstructionBreakpointOptions) -> InstructionBreakpoint {
        let bp = InstructionBreakpoint::new(options);
        self.state.lock().instruction_breakpoints.push(bp.clone());
        self.fire_breakpoints(BreakpointsChangeEvent::added(vec![bp.id().to_string()]));
        bp
    }

    /// Remove instruction breakpoints at `reference` (narrowed to `offset` when
    /// given), or all of them when `reference` is `None`.
    pub fn remove_instruction_breakpoints(&self, reference: Option<&str>, offset: Option<i64>) {
        let removed = {
            let mut state = self.state.lock();
            drain_matching(&mut state.instruction_breakpoints, |bp| {
                bp.matches(reference, offset)
            })
            .iter()
            .map(|bp| bp.id().to_string())
            .collect()
        };
        self.fire_breakpoints(BreakpointsChangeEvent::removed(removed));
    }

    // ---- exception breakpoints ------------------------------------------------------

    pub fn get_exception_breakpoints(&self) -> Vec<ExceptionBreakpoint> {
        self.state.lock().exception_breakpoints.clone()
    }

    /// Filters supported by `session_id`; without a session, the fallback filters.
    pub fn get_exception_breakpoints_for_session(&self, session_id: Option<&SessionId>) -> Vec<ExceptionBreakpoint> {
        self.state
            .lock()
            .exception_breakpoints
            .iter()
            .filter(|bp| bp.is_supported_session(session_id))
            .cloned()
            .collect()
    }

    /// Register the exception filters `session_id` offers, reusing existing
    /// breakpoints for filters already known.
    pub fn set_exception_breakpoints_for_session(
        &self,
        session_id: &SessionId,
        filters: &[protocol::ExceptionBreakpointsFilter],
    ) {
        let added = {
            let mut state = self.state.lock();
            let mut added = Vec::new();
            for filter in filters {
                let index = match state
                    .exception_breakpoints
                    .iter()
                    .rposition(|bp| bp.matches(filter))
                {
                    Some(index) => index,
                    None => {
                        let bp = ExceptionBreakpoint::from_filter(filter, filter.default.unwrap_or(false), false);
                        added.push(bp.id().to_string());
                        state.exception_breakpoints.push(bp);
                        state.exception_breakpoints.len() - 1
                    }
                };
                state.exception_breakpoints[index].set_supported_session(session_id, true);
            }
            added
        };
        if !added.is_empty() {
            self.fire_breakpoints(BreakpointsChangeEvent::default());
        }
    }

    pub fn remove_exception_breakpoints_for_session(&self, session_id: &SessionId) {
        for bp in &mut self.state.lock().exception_breakpoints {
            bp.set_supported_session(session_id, false);
        }
    }

    /// Make the filters of `session_id` the ones shown when no session is focused.
    pub fn set_exception_breakpoint_fallback_session(&self, session_id: &SessionId) {
        for bp in &mut self.state.lock().exception_breakpoints {
            let supported = bp.is_supported_session(Some(session_id));
            bp.set_fallback(supported);
        }
    }

    pub fn set_exception_breakpoint_condition(&self, id: &str, condition: Option<String>) {
        let found = {
            let mut state = self.state.lock();
            match state.exception_breakpoints.iter_mut().find(|bp| bp.id() == id) {
                Some(bp) => {
                    bp.base.condition = condition;
                    true
                }
                None => false,
            }
        };
        if found {
            self.fire_breakpoints(BreakpointsChangeEvent::changed(vec![id.to_string()]));
        }
    }

    // ---- breakpoint modes -----------------------------------------------------------

    pub fn register_breakpoint_modes(&self, debug_type: &str, modes: &[BreakpointMode]) {
        self.state.lock().breakpoint_modes.register(debug_type, modes);
        self.fire_breakpoints(BreakpointsChangeEvent::default());
    }

    pub fn get_breakpoint_modes(&self, kind: BreakpointModeApplicability) -> Vec<RegisteredBreakpointMode> {
        self.state.lock().breakpoint_modes.modes_for(kind)
    }

    // ---- watch expressions ----------------------------------------------------------

    pub fn get_watch_expressions(&self) -> Vec<Arc<Expression>> {
        self.state.lock().watch_expressions.clone()
    }

    pub fn add_watch_expression(&self, name: Option<&str>) -> Arc<Expression> {
        let expression = Arc::new(self.new_watch_expression(
            name.unwrap_or_default(),
            uuid::Uuid::new_v4().to_string(),
        ));
        self.state.lock().watch_expressions.push(expression.clone());
        self.fire(DebugModelEvent::WatchExpressionsChanged(Some(
            expression.id().to_string(),
        )));
        expression
    }

    pub fn rename_watch_expression(&self, id: &str, new_name: &str) {
        let found = self
            .state
            .lock()
            .watch_expressions
            .iter()
            .find(|expression| expression.id() == id)
            .cloned();
        if let Some(expression) = found {
            expression.set_name(new_name);
            self.fire(DebugModelEvent::WatchExpressionsChanged(Some(id.to_string())));
        }
    }

    /// Remove one watch expression, or all of them when `id` is `None`.
    pub fn remove_watch_expressions(&self, id: Option<&str>) {
        {
            let mut state = self.state.lock();
            match id {
                Some(id) => state.watch_expressions.retain(|expression| expression.id() != id),
                None => state.watch_expressions.clear(),
            }
        }
        self.fire(DebugModelEvent::WatchExpressionsChanged(None));
    }

    /// Move watch expression `id` to `position` (clamped to the end of the list).
    pub fn move_watch_expression(&self, id: &str, position: usize) {
        {
            let mut state = self.state.lock();
            let Some(index) = state
                .watch_expressions
                .iter()
                .position(|expression| expression.id() == id)
            else {
                return;
            };
            let expression = state.watch_expressions.remove(index);
            let position = position.min(state.watch_expressions.len());
            state.watch_expressions.insert(position, expression);
        }
        self.fire(DebugModelEvent::WatchExpressionsChanged(None));
    }

    fn new_watch_expression(&self, name: &str, id: String) -> Expression {
        Expression::with_id(name, id, self.env.clone(), Some(self.events.clone()))
    }

    // ---- storage --------------------------------------------------------------------

    /// Snapshot of everything persisted across restarts. Data breakpoints that cannot
    /// persist are left out.
    pub fn stored_state(&self) -> StoredDebugState {
        let state = self.state.lock();
        StoredDebugState {
            breakpoints: state.breakpoints.iter().map(Breakpoint::to_json).collect(),
            function_breakpoints: state
                .function_breakpoints
                .iter()
                .map(FunctionBreakpoint::to_json)
                .collect(),
            exception_breakpoints: state
                .exception_breakpoints
                .iter()
                .map(ExceptionBreakpoint::to_json)
                .collect(),
            data_breakpoints: state
                .data_breakpoints
                .iter()
                .filter(|bp| bp.can_persist)
                .map(DataBreakpoint::to_json)
                .collect(),
            watch_expressions: state
                .watch_expressions
                .iter()
                .map(|expression| StoredWatchExpression {
                    name: expression.name(),
                    id: expression.id().to_string(),
                })
                .collect(),
        }
    }

    /// Reconcile the persisted collections with `stored`, matching entries by id.
    ///
    /// Entries that stay keep what sessions reported on them (verification, triggers,
    /// supported sessions, resolved data ids) and watch expressions keep their last
    /// value. Entries missing from `stored` are dropped, except data breakpoints that
    /// never persist.
    pub fn apply_stored_state(&self, stored: &StoredDebugState) {
        let breakpoints: Vec<Breakpoint> = decode_entries("breakpoint", &stored.breakpoints);
        let function_breakpoints: Vec<FunctionBreakpoint> =
            decode_entries("function breakpoint", &stored.function_breakpoints);
        let exception_breakpoints: Vec<ExceptionBreakpoint> =
            decode_entries("exception breakpoint", &stored.exception_breakpoints);
        let data_breakpoints: Vec<DataBreakpoint> =
            decode_entries("data breakpoint", &stored.data_breakpoints);

        {
            let mut state = self.state.lock();
            let mut previous: HashMap<String, Arc<Expression>> = state
                .watch_expressions
                .drain(..)
                .map(|expression| (expression.id().to_string(), expression))
                .collect();
            let mut seen = HashSet::new();
            let watch_expressions = stored
                .watch_expressions
                .iter()
                .filter(|stored| seen.insert(stored.id.clone()))
                .map(|stored| match previous.remove(&stored.id) {
                    Some(existing) => {
                        existing.set_name(stored.name.clone());
                        existing
                    }
                    None => Arc::new(self.new_watch_expression(&stored.name, stored.id.clone())),
                })
                .collect();

            let mut breakpoints = reconcile(std::mem::take(&mut state.breakpoints), breakpoints);
            sort_and_dedup(&mut breakpoints);
            state.breakpoints = breakpoints;
            state.function_breakpoints =
                reconcile(std::mem::take(&mut state.function_breakpoints), function_breakpoints);
            state.exception_breakpoints =
                reconcile(std::mem::take(&mut state.exception_breakpoints), exception_breakpoints);

            let transient = drain_matching(&mut state.data_breakpoints, |bp| !bp.can_persist);
            let mut data_breakpoints =
                reconcile(std::mem::take(&mut state.data_breakpoints), data_breakpoints);
            data_breakpoints.retain(|bp| !transient.iter().any(|kept| kept.id() == bp.id()));
            data_breakpoints.extend(transient);
            state.data_breakpoints = data_breakpoints;

            state.watch_expressions = watch_expressions;
        }

        tracing::debug!(target: TARGET, "applied stored debug state");
        self.fire_breakpoints(BreakpointsChangeEvent::default());
        self.fire(DebugModelEvent::WatchExpressionsChanged(None));
    }

    /// Apply the current stored state and every later change published on `stored`.
    /// The task ends when the sender or the model is dropped.
    pub fn spawn_storage_sync(self: &Arc<Self>, mut stored: watch::Receiver<StoredDebugState>) -> JoinHandle<()> {
        let model: Weak<Self> = Arc::downgrade(self);
        tokio::spawn(async move {
            loop {
                let snapshot = stored.borrow_and_update().clone();
                let Some(model) = model.upgrade() else {
                    break;
                };
                model.apply_stored_state(&snapshot);
                drop(model);
                if stored.changed().await.is_err() {
                    break;
                }
            }
        })
    }
}

/// Remove and return the elements matching `predicate`, keeping the order of the rest.
fn drain_matching<T>(items: &mut Vec<T>, mut predicate: impl FnMut(&T) -> bool) -> Vec<T> {
    let (removed, kept) = std::mem::take(items)
        .into_iter()
        .partition(|item| predicate(item));
    *items = kept;
    removed
}

/// Order source breakpoints by file name, line and column, then drop entries at an
/// identical location, keeping the first.
pub(crate) fn sort_and_dedup(breakpoints: &mut Vec<Breakpoint>) {
    breakpoints.sort_by(compare_locations);
    let mut seen = HashSet::new();
    breakpoints.retain(|bp| {
        let column = bp.column().map(|c| c.to_string()).unwrap_or_default();
        seen.insert(format!("{}:{}:{}", bp.uri(), bp.line_number(), column))
    });
}

fn compare_locations(first: &Breakpoint, second: &Breakpoint) -> Ordering {
    let (first_uri, second_uri) = (first.uri(), second.uri());
    uri_display_name(&first_uri)
        .cmp(&uri_display_name(&second_uri))
        .then_with(|| first_uri.as_str().cmp(second_uri.as_str()))
        .then_with(|| first.line_number().cmp(&second.line_number()))
        .then_with(|| first.column().cmp(&second.column()))
}
