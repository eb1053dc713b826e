//! Threads and their incrementally fetched call stacks.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::OnceCell;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SessionResult};
use crate::expression::{string_hash, ContainerEnv, Scope};
use crate::protocol::{self, SteppingGranularity};
use crate::session::{DebugSession, SessionId};
use crate::source::{Source, SourceRange, SourceRegistry, UNKNOWN_SOURCE_LABEL};

const TARGET: &str = "nova.debug_model";

/// Stop reasons for which the top frame is shown even when the adapter deemphasizes it.
const TOP_FRAME_ALLOWED_STOP_REASONS: [&str; 3] = ["breakpoint", "step", "function breakpoint"];

/// Why and how a thread stopped, as reported by the `stopped` event.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoppedDetails {
    pub reason: Option<String>,
    pub description: Option<String>,
    pub thread_id: Option<i64>,
    pub text: Option<String>,
    pub total_frames: Option<i64>,
    pub preserve_focus_hint: bool,
    pub all_threads_stopped: bool,
    pub hit_breakpoint_ids: Vec<i64>,
    /// Set when fetching frames for this stop failed.
    #[serde(skip)]
    pub frames_error_message: Option<String>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ExceptionInfo {
    pub id: Option<String>,
    pub description: Option<String>,
    pub break_mode: Option<String>,
    pub details: Option<Value>,
}

/// One frame of a thread's call stack.
pub struct StackFrame {
    session: Arc<dyn DebugSession>,
    env: ContainerEnv,
    thread_id: i64,
    thread_key: String,
    frame_id: i64,
    source: Arc<Source>,
    name: String,
    presentation_hint: Option<String>,
    range: SourceRange,
    index: i64,
    can_restart: bool,
    instruction_pointer_reference: Option<String>,
    scopes: Mutex<Option<Arc<OnceCell<Vec<Arc<Scope>>>>>>,
}

impl fmt::Debug for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("StackFrame")
            .field("thread", &self.thread_key)
            .field("frame_id", &self.frame_id)
            .field("name", &self.name)
            .field("range", &self.range)
            .finish_non_exhaustive()
    }
}

impl StackFrame {
    pub fn id(&self) -> String {
        format!("stackframe:{}:{}:{}", self.thread_key, self.index, self.source.name())
    }

    pub fn frame_id(&self) -> i64 {
        self.frame_id
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn source(&self) -> &Arc<Source> {
        &self.source
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn presentation_hint(&self) -> Option<&str> {
        self.presentation_hint.as_deref()
    }

    pub fn range(&self) -> SourceRange {
        self.range
    }

    pub fn index(&self) -> i64 {
        self.index
    }

    pub fn can_restart(&self) -> bool {
        self.can_restart
    }

    pub fn instruction_pointer_reference(&self) -> Option<&str> {
        self.instruction_pointer_reference.as_deref()
    }

    pub fn is_deemphasized(&self) -> bool {
        self.source.presentation_hint().as_deref() == Some("deemphasize")
            || matches!(self.presentation_hint.as_deref(), Some("deemphasize" | "subtle"))
    }

    /// Scopes of this frame, requested once until [`StackFrame::forget_scopes`].
    pub async fn get_scopes(&self) -> Vec<Arc<Scope>> {
        let cell = self
            .scopes
            .lock()
            .get_or_insert_with(|| Arc::new(OnceCell::new()))
            .clone();
        cell.get_or_init(|| self.fetch_scopes()).await.clone()
    }

    async fn fetch_scopes(&self) -> Vec<Arc<Scope>> {
        let response = match self.session.scopes(self.frame_id, self.thread_id).await {
            Ok(Some(response)) => response,
            Ok(None) => return Vec::new(),
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    frame = self.frame_id,
                    error = %err,
                    "scopes request failed"
                );
                return vec![Arc::new(Scope::error(
                    self.session.clone(),
                    self.thread_id,
                    self.env.clone(),
                    err.to_string(),
                ))];
            }
        };

        // Ids derive from name and position so expansion state survives across stops.
        let mut used = HashSet::new();
        response
            .scopes
            .iter()
            .map(|raw| {
                let key = format!(
                    "{}:{}:{}",
                    raw.name,
                    raw.line.map(|l| l.to_string()).unwrap_or_default(),
                    raw.column.map(|c| c.to_string()).unwrap_or_default()
                );
                let mut hash = 0;
                loop {
                    hash = string_hash(&key, hash);
                    if used.insert(hash) {
                        break;
                    }
                }
                Arc::new(Scope::new(
                    self.session.clone(),
                    self.thread_id,
                    self.env.clone(),
                    hash,
                    raw,
                ))
            })
            .collect()
    }

    /// Non-expensive scopes, narrowed to the innermost ones containing `range` when
    /// the adapter reports scope ranges.
    pub async fn get_most_specific_scopes(&self, range: SourceRange) -> Vec<Arc<Scope>> {
        let non_expensive: Vec<Arc<Scope>> = self
            .get_scopes()
            .await
            .into_iter()
            .filter(|scope| !scope.expensive())
            .collect();
        if !non_expensive.iter().any(|scope| scope.range().is_some()) {
            return non_expensive;
        }

        let mut containing: Vec<Arc<Scope>> = non_expensive
            .iter()
            .filter(|scope| scope.range().is_some_and(|r| r.contains_range(&range)))
            .cloned()
            .collect();
        containing.sort_by_key(|scope| scope.range().map_or(0, |r| r.line_extent()));
        if containing.is_empty() {
            non_expensive
        } else {
            containing
        }
    }

    pub fn forget_scopes(&self) {
        *self.scopes.lock() = None;
    }

    pub async fn restart(&self) -> SessionResult<()> {
        self.session.restart_frame(self.frame_id, self.thread_id).await
    }

    pub fn equals(&self, other: &StackFrame) -> bool {
        self.name == other.name
            && self.thread_key == other.thread_key
            && self.frame_id == other.frame_id
            && Arc::ptr_eq(&self.source, &other.source)
            && self.range == other.range
    }
}

impl fmt::Display for StackFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let location = if self.source.in_memory() {
            self.source.name()
        } else {
            url::Url::parse(self.source.uri())
                .ok()
                .and_then(|url| url.to_file_path().ok())
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| self.source.uri().to_string())
        };
        if location == UNKNOWN_SOURCE_LABEL {
            return f.write_str(&self.name);
        }
        write!(f, "{} ({}:{})", self.name, location, self.range.start_line)
    }
}

struct ThreadState {
    name: String,
    stopped: bool,
    stopped_details: Option<StoppedDetails>,
    call_stack: Vec<Arc<StackFrame>>,
    stale_call_stack: Vec<Arc<StackFrame>>,
    call_stack_tokens: Vec<CancellationToken>,
    reached_end_of_call_stack: bool,
    last_stepping_granularity: Option<SteppingGranularity>,
}

/// A thread of one debug session.
///
/// Frames are fetched page by page while the thread is stopped. Clearing the call stack
/// keeps the old frames as a stale snapshot and cancels every outstanding fetch.
pub struct Thread {
    session: Arc<dyn DebugSession>,
    sources: Arc<SourceRegistry>,
    env: ContainerEnv,
    thread_id: i64,
    state: Mutex<ThreadState>,
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.state.lock();
        f.debug_struct("Thread")
            .field("key", &self.key())
            .field("name", &state.name)
            .field("stopped", &state.stopped)
            .field("frames", &state.call_stack.len())
            .finish_non_exhaustive()
    }
}

impl Thread {
    pub fn new(
        session: Arc<dyn DebugSession>,
        sources: Arc<SourceRegistry>,
        env: ContainerEnv,
        thread_id: i64,
        name: impl Into<String>,
    ) -> Self {
        Self {
            session,
            sources,
            env,
            thread_id,
            state: Mutex::new(ThreadState {
                name: name.into(),
                stopped: false,
                stopped_details: None,
                call_stack: Vec::new(),
                stale_call_stack: Vec::new(),
                call_stack_tokens: Vec::new(),
                reached_end_of_call_stack: false,
                last_stepping_granularity: None,
            }),
        }
    }

    /// `thread:<session>:<thread id>`
    pub fn key(&self) -> String {
        format!("thread:{}:{}", self.session.id(), self.thread_id)
    }

    pub fn thread_id(&self) -> i64 {
        self.thread_id
    }

    pub fn session(&self) -> &Arc<dyn DebugSession> {
        &self.session
    }

    pub fn session_id(&self) -> SessionId {
        self.session.id()
    }

    pub fn name(&self) -> String {
        self.state.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.state.lock().name = name.into();
    }

    pub fn stopped(&self) -> bool {
        self.state.lock().stopped
    }

    pub fn set_stopped(&self, stopped: bool) {
        self.state.lock().stopped = stopped;
    }

    pub fn stopped_details(&self) -> Option<StoppedDetails> {
        self.state.lock().stopped_details.clone()
    }

    pub fn set_stopped_details(&self, details: Option<StoppedDetails>) {
        self.state.lock().stopped_details = details;
    }

    pub fn reached_end_of_call_stack(&self) -> bool {
        self.state.lock().reached_end_of_call_stack
    }

    pub fn last_stepping_granularity(&self) -> Option<SteppingGranularity> {
        self.state.lock().last_stepping_granularity
    }

    pub fn call_stack(&self) -> Vec<Arc<StackFrame>> {
        self.state.lock().call_stack.clone()
    }

    pub fn stale_call_stack(&self) -> Vec<Arc<StackFrame>> {
        self.state.lock().stale_call_stack.clone()
    }

    /// Move the current frames to the stale snapshot and cancel all fetches in flight.
    pub fn clear_call_stack(&self) {
        let mut state = self.state.lock();
        if !state.call_stack.is_empty() {
            state.stale_call_stack = std::mem::take(&mut state.call_stack);
        }
        for token in state.call_stack_tokens.drain(..) {
            token.cancel();
        }
        state.reached_end_of_call_stack = false;
    }

    /// First frame worth focusing: one with an instruction pointer when stopped at
    /// instruction level, otherwise one with an available, non-deemphasized source.
    pub fn get_top_stack_frame(&self) -> Option<Arc<StackFrame>> {
        let state = self.state.lock();
        let reason = state
            .stopped_details
            .as_ref()
            .and_then(|details| details.reason.as_deref());
        let instruction_level = reason == Some("instruction breakpoint")
            || (reason == Some("step")
                && state.last_stepping_granularity == Some(SteppingGranularity::Instruction));
        let allowed = reason.is_some_and(|reason| TOP_FRAME_ALLOWED_STOP_REASONS.contains(&reason));

        state
            .call_stack
            .iter()
            .find(|frame| {
                (instruction_level && frame.instruction_pointer_reference.is_some())
                    || (frame.source.is_available() && (allowed || !frame.is_deemphasized()))
            })
            .cloned()
    }

    /// Fetch the next `levels` frames. Only runs while stopped; a fetch cancelled by
    /// [`Thread::clear_call_stack`] leaves the stack untouched.
    pub async fn fetch_call_stack(&self, levels: i64) {
        let (start, token) = {
            let mut state = self.state.lock();
            if !state.stopped {
                return;
            }
            let token = CancellationToken::new();
            state.call_stack_tokens.push(token.clone());
            (state.call_stack.len(), token)
        };

        let Some(frames) = self.get_call_stack_impl(start, levels, token).await else {
            return;
        };

        let mut state = self.state.lock();
        // Place frames exactly at the requested offset so overlapping fetches cannot
        // duplicate them.
        state.call_stack.truncate(start);
        state.reached_end_of_call_stack = (frames.len() as i64) < levels;
        state.call_stack.extend(frames);
        let total_frames = state
            .stopped_details
            .as_ref()
            .and_then(|details| details.total_frames);
        if total_frames == Some(state.call_stack.len() as i64) {
            state.reached_end_of_call_stack = true;
        }
    }

    async fn get_call_stack_impl(
        &self,
        start: usize,
        levels: i64,
        token: CancellationToken,
    ) -> Option<Vec<Arc<StackFrame>>> {
        let start_frame = start as i64;
        let response = self
            .session
            .stack_trace(self.thread_id, start_frame, levels, token.clone())
            .await;
        if token.is_cancelled() {
            tracing::trace!(target: TARGET, thread = self.thread_id, start, "stack trace cancelled");
            return None;
        }

        let response = match response {
            Ok(Some(response)) => response,
            Ok(None) => return Some(Vec::new()),
            Err(SessionError::Cancelled) => return None,
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    thread = self.thread_id,
                    error = %err,
                    "stack trace request failed"
                );
                if let Some(details) = self.state.lock().stopped_details.as_mut() {
                    details.frames_error_message = Some(err.to_string());
                }
                return Some(Vec::new());
            }
        };

        if let Some(total) = response.total_frames {
            if let Some(details) = self.state.lock().stopped_details.as_mut() {
                details.total_frames = Some(total);
            }
        }

        let session_id = self.session.id();
        let thread_key = self.key();
        let frames = response
            .stack_frames
            .into_iter()
            .enumerate()
            .map(|(offset, raw)| {
                let source = self.sources.get_or_insert(raw.source.as_ref(), &session_id);
                Arc::new(self.new_frame(raw, source, thread_key.clone(), start_frame + offset as i64))
            })
            .collect();
        Some(frames)
    }

    fn new_frame(
        &self,
        raw: protocol::StackFrame,
        source: Arc<Source>,
        thread_key: String,
        index: i64,
    ) -> StackFrame {
        StackFrame {
            session: self.session.clone(),
            env: self.env.clone(),
            thread_id: self.thread_id,
            thread_key,
            frame_id: raw.id,
            source,
            name: raw.name,
            presentation_hint: raw.presentation_hint,
            range: SourceRange::new(
                raw.line,
                raw.column,
                raw.end_line.unwrap_or(raw.line),
                raw.end_column.unwrap_or(raw.column),
            ),
            index,
            can_restart: raw.can_restart.unwrap_or(true),
            instruction_pointer_reference: raw.instruction_pointer_reference,
            scopes: Mutex::new(None),
        }
    }

    /// Exception details when stopped on an exception. Adapters without
    /// `exceptionInfo` get the stop text as description.
    pub async fn exception_info(&self) -> Option<ExceptionInfo> {
        let details = self.stopped_details()?;
        if details.reason.as_deref() != Some("exception") {
            return None;
        }
        if !self.session.capabilities().supports_exception_info_request {
            return Some(ExceptionInfo {
                id: None,
                description: details.text,
                break_mode: None,
                details: None,
            });
        }
        match self.session.exception_info(self.thread_id).await {
            Ok(response) => response.map(|info| ExceptionInfo {
                id: Some(info.exception_id),
                description: info.description,
                break_mode: info.break_mode,
                details: info.details,
            }),
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    thread = self.thread_id,
                    error = %err,
                    "exceptionInfo request failed"
                );
                None
            }
        }
    }

    pub fn state_label(&self) -> String {
        match self.stopped_details() {
            Some(details) => details.description.unwrap_or_else(|| match details.reason {
                Some(reason) => format!("Paused on {reason}"),
                None => "Paused".to_string(),
            }),
            None => "Running".to_string(),
        }
    }

    fn record_granularity(&self, granularity: Option<SteppingGranularity>) {
        self.state.lock().last_stepping_granularity = granularity;
    }

    pub async fn next(&self, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record_granularity(granularity);
        self.session.next(self.thread_id, granularity).await
    }

    pub async fn step_in(&self, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record_granularity(granularity);
        self.session.step_in(self.thread_id, granularity).await
    }

    pub async fn step_out(&self, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record_granularity(granularity);
        self.session.step_out(self.thread_id, granularity).await
    }

    pub async fn step_back(&self, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record_granularity(granularity);
        self.session.step_back(self.thread_id, granularity).await
    }

    pub async fn r#continue(&self) -> SessionResult<()> {
        self.session.r#continue(self.thread_id).await
    }

    pub async fn pause(&self) -> SessionResult<()> {
        self.session.pause(self.thread_id).await
    }

    pub async fn terminate(&self) -> SessionResult<()> {
        self.session.terminate_threads(&[self.thread_id]).await
    }
}
