//! Deterministic, in-memory debug session for tests.

use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SessionResult};
use crate::expression::EvaluateContext;
use crate::protocol::{
    Capabilities, DataBreakpointInfoResponse, EvaluateLocation, EvaluateResponse,
    ExceptionInfoResponse, ReadMemoryResponse, Scope, ScopesResponse, SetValueResponse, Source,
    StackFrame, StackTraceResponse, SteppingGranularity, Variable, VariablesFilter,
    VariablesResponse, WriteMemoryResponse,
};
use crate::session::{DebugSession, MemoryInvalidation, SessionId};

/// A request the mock received, in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum MockCall {
    Evaluate {
        expression: String,
        frame_id: Option<i64>,
        context: EvaluateContext,
    },
    Variables {
        reference: i64,
        filter: Option<VariablesFilter>,
        start: Option<i64>,
        count: Option<i64>,
    },
    StackTrace {
        thread_id: i64,
        start_frame: i64,
        levels: i64,
    },
    Scopes {
        frame_id: i64,
    },
    SetVariable {
        reference: i64,
        name: String,
        value: String,
    },
    SetExpression {
        frame_id: i64,
        expression: String,
        value: String,
    },
    ReadMemory {
        memory_reference: String,
        offset: i64,
        count: i64,
    },
    WriteMemory {
        memory_reference: String,
        offset: i64,
        data: String,
    },
    DataBytesBreakpointInfo {
        address: String,
        bytes: i64,
    },
    ExceptionInfo {
        thread_id: i64,
    },
    RestartFrame {
        frame_id: i64,
    },
    Step {
        kind: &'static str,
        thread_id: i64,
        granularity: Option<SteppingGranularity>,
    },
    Continue {
        thread_id: i64,
    },
    Pause {
        thread_id: i64,
    },
    TerminateThreads {
        thread_ids: Vec<i64>,
    },
}

#[derive(Default)]
struct MockStack {
    frames: Vec<StackFrame>,
    total_frames: Option<i64>,
}

#[derive(Default)]
struct MockState {
    capabilities: Capabilities,
    configuration_name: String,
    parent: Option<SessionId>,
    inactive: bool,
    auto_expand_lazy: bool,
    evaluations: HashMap<String, Result<EvaluateResponse, String>>,
    named_variables: HashMap<i64, Vec<Variable>>,
    indexed_variables: HashMap<i64, Vec<Variable>>,
    variable_errors: HashMap<i64, String>,
    stacks: HashMap<i64, MockStack>,
    stack_trace_delay: Option<Duration>,
    stack_trace_error: Option<String>,
    scopes: HashMap<i64, Vec<Scope>>,
    scope_errors: HashMap<i64, String>,
    set_variable_responses: HashMap<String, Result<SetValueResponse, String>>,
    set_expression_responses: HashMap<String, Result<SetValueResponse, String>>,
    memory: HashMap<String, Vec<u8>>,
    raw_reads: HashMap<String, ReadMemoryResponse>,
    data_ids: HashMap<String, String>,
    exception_info: HashMap<i64, ExceptionInfoResponse>,
    calls: Vec<MockCall>,
}

/// [`DebugSession`] answering from configured fixtures and recording every request.
pub struct MockDebugSession {
    id: SessionId,
    invalidations: broadcast::Sender<MemoryInvalidation>,
    state: Mutex<MockState>,
}

impl std::fmt::Debug for MockDebugSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockDebugSession")
            .field("id", &self.id)
            .finish_non_exhaustive()
    }
}

impl MockDebugSession {
    pub fn new(id: impl Into<String>) -> Self {
        let id = id.into();
        let (invalidations, _) = broadcast::channel(16);
        Self {
            state: Mutex::new(MockState {
                configuration_name: id.clone(),
                ..MockState::default()
            }),
            id: SessionId::new(id),
            invalidations,
        }
    }

    pub fn with_capabilities(self, capabilities: Capabilities) -> Self {
        self.state.lock().capabilities = capabilities;
        self
    }

    pub fn with_configuration_name(self, name: impl Into<String>) -> Self {
        self.state.lock().configuration_name = name.into();
        self
    }

    pub fn with_parent(self, parent: SessionId) -> Self {
        self.state.lock().parent = Some(parent);
        self
    }

    pub fn set_capabilities(&self, capabilities: Capabilities) {
        self.state.lock().capabilities = capabilities;
    }

    pub fn set_active(&self, active: bool) {
        self.state.lock().inactive = !active;
    }

    pub fn set_auto_expand_lazy_variables(&self, enabled: bool) {
        self.state.lock().auto_expand_lazy = enabled;
    }

    pub fn set_evaluation(&self, expression: impl Into<String>, result: Result<EvaluateResponse, String>) {
        self.state.lock().evaluations.insert(expression.into(), result);
    }

    /// Children returned for `reference` without a filter or with the `named` filter.
    pub fn set_named_variables(&self, reference: i64, variables: Vec<Variable>) {
        self.state.lock().named_variables.insert(reference, variables);
    }

    /// Indexed children of `reference`; requests are answered with the `start..start+count`
    /// slice.
    pub fn set_indexed_variables(&self, reference: i64, variables: Vec<Variable>) {
        self.state.lock().indexed_variables.insert(reference, variables);
    }

    /// `count` leaf children named `[0]`, `[1]`, ... for `reference`.
    pub fn generate_indexed_variables(&self, reference: i64, count: usize) {
        let variables = (0..count)
            .map(|index| variable(&format!("[{index}]"), &index.to_string(), 0))
            .collect();
        self.set_indexed_variables(reference, variables);
    }

    pub fn fail_variables(&self, reference: i64, message: impl Into<String>) {
        self.state.lock().variable_errors.insert(reference, message.into());
    }

    pub fn set_stack_frames(&self, thread_id: i64, frames: Vec<StackFrame>, total_frames: Option<i64>) {
        self.state.lock().stacks.insert(
            thread_id,
            MockStack {
                frames,
                total_frames,
            },
        );
    }

    /// Delay every `stackTrace` answer; a cancelled token ends the wait early.
    pub fn set_stack_trace_delay(&self, delay: Option<Duration>) {
        self.state.lock().stack_trace_delay = delay;
    }

    pub fn fail_stack_trace(&self, message: Option<String>) {
        self.state.lock().stack_trace_error = message;
    }

    pub fn set_scopes(&self, frame_id: i64, scopes: Vec<Scope>) {
        self.state.lock().scopes.insert(frame_id, scopes);
    }

    pub fn fail_scopes(&self, frame_id: i64, message: impl Into<String>) {
        self.state.lock().scope_errors.insert(frame_id, message.into());
    }

    /// Answer for `setVariable` of the variable called `name`.
    pub fn set_set_variable_response(&self, name: impl Into<String>, response: Result<SetValueResponse, String>) {
        self.state
            .lock()
            .set_variable_responses
            .insert(name.into(), response);
    }

    /// Answer for `setExpression` of `expression`.
    pub fn set_set_expression_response(
        &self,
        expression: impl Into<String>,
        response: Result<SetValueResponse, String>,
    ) {
        self.state
            .lock()
            .set_expression_responses
            .insert(expression.into(), response);
    }

    /// Readable bytes of `memory_reference`, starting at offset 0. Reads past the end
    /// report the rest as unreadable.
    pub fn set_memory(&self, memory_reference: impl Into<String>, bytes: Vec<u8>) {
        self.state.lock().memory.insert(memory_reference.into(), bytes);
    }

    pub fn memory(&self, memory_reference: &str) -> Option<Vec<u8>> {
        self.state.lock().memory.get(memory_reference).cloned()
    }

    /// Answer every read of `memory_reference` with `response` verbatim.
    pub fn set_raw_read(&self, memory_reference: impl Into<String>, response: ReadMemoryResponse) {
        self.state.lock().raw_reads.insert(memory_reference.into(), response);
    }

    /// Emit an adapter `memory` event.
    pub fn invalidate_memory(&self, memory_reference: impl Into<String>, offset: i64, count: i64) {
        let _ = self.invalidations.send(MemoryInvalidation {
            memory_reference: memory_reference.into(),
            offset,
            count,
        });
    }

    pub fn set_data_id(&self, address: impl Into<String>, data_id: impl Into<String>) {
        self.state.lock().data_ids.insert(address.into(), data_id.into());
    }

    pub fn set_exception_info(&self, thread_id: i64, info: ExceptionInfoResponse) {
        self.state.lock().exception_info.insert(thread_id, info);
    }

    pub fn calls(&self) -> Vec<MockCall> {
        self.state.lock().calls.clone()
    }

    pub fn stack_trace_calls(&self) -> Vec<(i64, i64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                MockCall::StackTrace {
                    start_frame, levels, ..
                } => Some((start_frame, levels)),
                _ => None,
            })
            .collect()
    }

    pub fn clear_calls(&self) {
        self.state.lock().calls.clear();
    }

    fn record(&self, call: MockCall) {
        self.state.lock().calls.push(call);
    }
}

#[async_trait]
impl DebugSession for MockDebugSession {
    fn id(&self) -> SessionId {
        self.id.clone()
    }

    fn configuration_name(&self) -> String {
        self.state.lock().configuration_name.clone()
    }

    fn parent_id(&self) -> Option<SessionId> {
        self.state.lock().parent.clone()
    }

    fn is_active(&self) -> bool {
        !self.state.lock().inactive
    }

    fn capabilities(&self) -> Capabilities {
        self.state.lock().capabilities.clone()
    }

    fn auto_expand_lazy_variables(&self) -> bool {
        self.state.lock().auto_expand_lazy
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: EvaluateContext,
        _location: Option<EvaluateLocation>,
    ) -> SessionResult<Option<EvaluateResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Evaluate {
            expression: expression.to_string(),
            frame_id,
            context,
        });
        match state.evaluations.get(expression) {
            Some(Ok(response)) => Ok(Some(response.clone())),
            Some(Err(message)) => Err(SessionError::adapter(message.clone())),
            None => Err(SessionError::adapter(format!("cannot evaluate `{expression}`"))),
        }
    }

    async fn variables(
        &self,
        variables_reference: i64,
        _thread_id: Option<i64>,
        filter: Option<VariablesFilter>,
        start: Option<i64>,
        count: Option<i64>,
    ) -> SessionResult<Option<VariablesResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Variables {
            reference: variables_reference,
            filter,
            start,
            count,
        });
        if let Some(message) = state.variable_errors.get(&variables_reference) {
            return Err(SessionError::adapter(message.clone()));
        }

        let named = state
            .named_variables
            .get(&variables_reference)
            .cloned()
            .unwrap_or_default();
        let indexed = state
            .indexed_variables
            .get(&variables_reference)
            .map(|all| {
                let from = start.unwrap_or(0).max(0) as usize;
                let to = count.map_or(all.len(), |count| from + count.max(0) as usize);
                all.get(from.min(all.len())..to.min(all.len()))
                    .map(<[Variable]>::to_vec)
                    .unwrap_or_default()
            })
            .unwrap_or_default();

        let variables = match filter {
            Some(VariablesFilter::Named) => named,
            Some(VariablesFilter::Indexed) => indexed,
            None => named.into_iter().chain(indexed).collect(),
        };
        Ok(Some(VariablesResponse { variables }))
    }

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
        token: CancellationToken,
    ) -> SessionResult<Option<StackTraceResponse>> {
        let (delay, failure) = {
            let mut state = self.state.lock();
            state.calls.push(MockCall::StackTrace {
                thread_id,
                start_frame,
                levels,
            });
            (state.stack_trace_delay, state.stack_trace_error.clone())
        };

        if let Some(delay) = delay {
            tokio::select! {
                _ = token.cancelled() => return Err(SessionError::Cancelled),
                _ = tokio::time::sleep(delay) => {}
            }
        }
        if let Some(message) = failure {
            return Err(SessionError::adapter(message));
        }

        let state = self.state.lock();
        let Some(stack) = state.stacks.get(&thread_id) else {
            return Ok(None);
        };
        let from = (start_frame.max(0) as usize).min(stack.frames.len());
        let to = (from + levels.max(0) as usize).min(stack.frames.len());
        Ok(Some(StackTraceResponse {
            stack_frames: stack.frames[from..to].to_vec(),
            total_frames: stack.total_frames,
        }))
    }

    async fn scopes(&self, frame_id: i64, _thread_id: i64) -> SessionResult<Option<ScopesResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::Scopes { frame_id });
        if let Some(message) = state.scope_errors.get(&frame_id) {
            return Err(SessionError::adapter(message.clone()));
        }
        Ok(state
            .scopes
            .get(&frame_id)
            .cloned()
            .map(|scopes| ScopesResponse { scopes }))
    }

    async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> SessionResult<Option<SetValueResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::SetVariable {
            reference: variables_reference,
            name: name.to_string(),
            value: value.to_string(),
        });
        match state.set_variable_responses.get(name) {
            Some(Ok(response)) => Ok(Some(response.clone())),
            Some(Err(message)) => Err(SessionError::adapter(message.clone())),
            None => Ok(Some(SetValueResponse {
                value: value.to_string(),
                ..SetValueResponse::default()
            })),
        }
    }

    async fn set_expression(
        &self,
        frame_id: i64,
        expression: &str,
        value: &str,
    ) -> SessionResult<Option<SetValueResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::SetExpression {
            frame_id,
            expression: expression.to_string(),
            value: value.to_string(),
        });
        match state.set_expression_responses.get(expression) {
            Some(Ok(response)) => Ok(Some(response.clone())),
            Some(Err(message)) => Err(SessionError::adapter(message.clone())),
            None => Ok(Some(SetValueResponse {
                value: value.to_string(),
                ..SetValueResponse::default()
            })),
        }
    }

    async fn read_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        count: i64,
    ) -> SessionResult<Option<ReadMemoryResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::ReadMemory {
            memory_reference: memory_reference.to_string(),
            offset,
            count,
        });
        if let Some(response) = state.raw_reads.get(memory_reference) {
            return Ok(Some(response.clone()));
        }
        let Some(bytes) = state.memory.get(memory_reference) else {
            return Err(SessionError::adapter(format!(
                "unknown memory reference `{memory_reference}`"
            )));
        };

        let from = (offset.max(0) as usize).min(bytes.len());
        let to = (from + count.max(0) as usize).min(bytes.len());
        let readable = &bytes[from..to];
        let unreadable = count - readable.len() as i64;
        Ok(Some(ReadMemoryResponse {
            address: format!("0x{offset:x}"),
            unreadable_bytes: (unreadable > 0).then_some(unreadable),
            data: (!readable.is_empty()).then(|| STANDARD.encode(readable)),
        }))
    }

    async fn write_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        data: &str,
        _allow_partial: bool,
    ) -> SessionResult<Option<WriteMemoryResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::WriteMemory {
            memory_reference: memory_reference.to_string(),
            offset,
            data: data.to_string(),
        });
        let decoded = STANDARD
            .decode(data.as_bytes())
            .map_err(|err| SessionError::InvalidResponse(err.to_string()))?;
        let bytes = state
            .memory
            .entry(memory_reference.to_string())
            .or_default();
        let start = offset.max(0) as usize;
        if bytes.len() < start + decoded.len() {
            bytes.resize(start + decoded.len(), 0);
        }
        bytes[start..start + decoded.len()].copy_from_slice(&decoded);
        Ok(Some(WriteMemoryResponse {
            offset: Some(offset),
            bytes_written: Some(decoded.len() as i64),
        }))
    }

    fn subscribe_memory_invalidations(&self) -> broadcast::Receiver<MemoryInvalidation> {
        self.invalidations.subscribe()
    }

    async fn data_bytes_breakpoint_info(
        &self,
        address: &str,
        bytes: i64,
    ) -> SessionResult<Option<DataBreakpointInfoResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::DataBytesBreakpointInfo {
            address: address.to_string(),
            bytes,
        });
        Ok(state
            .data_ids
            .get(address)
            .map(|data_id| DataBreakpointInfoResponse {
                data_id: Some(data_id.clone()),
                description: format!("{bytes} bytes at {address}"),
                access_types: None,
                can_persist: Some(false),
            }))
    }

    async fn exception_info(&self, thread_id: i64) -> SessionResult<Option<ExceptionInfoResponse>> {
        let mut state = self.state.lock();
        state.calls.push(MockCall::ExceptionInfo { thread_id });
        Ok(state.exception_info.get(&thread_id).cloned())
    }

    async fn restart_frame(&self, frame_id: i64, _thread_id: i64) -> SessionResult<()> {
        self.record(MockCall::RestartFrame { frame_id });
        Ok(())
    }

    async fn next(&self, thread_id: i64, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record(MockCall::Step {
            kind: "next",
            thread_id,
            granularity,
        });
        Ok(())
    }

    async fn step_in(&self, thread_id: i64, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record(MockCall::Step {
            kind: "stepIn",
            thread_id,
            granularity,
        });
        Ok(())
    }

    async fn step_out(&self, thread_id: i64, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record(MockCall::Step {
            kind: "stepOut",
            thread_id,
            granularity,
        });
        Ok(())
    }

    async fn step_back(&self, thread_id: i64, granularity: Option<SteppingGranularity>) -> SessionResult<()> {
        self.record(MockCall::Step {
            kind: "stepBack",
            thread_id,
            granularity,
        });
        Ok(())
    }

    async fn r#continue(&self, thread_id: i64) -> SessionResult<()> {
        self.record(MockCall::Continue { thread_id });
        Ok(())
    }

    async fn pause(&self, thread_id: i64) -> SessionResult<()> {
        self.record(MockCall::Pause { thread_id });
        Ok(())
    }

    async fn terminate_threads(&self, thread_ids: &[i64]) -> SessionResult<()> {
        self.record(MockCall::TerminateThreads {
            thread_ids: thread_ids.to_vec(),
        });
        Ok(())
    }
}

/// A leaf or container variable as an adapter would report it.
pub fn variable(name: &str, value: &str, variables_reference: i64) -> Variable {
    Variable {
        name: name.to_string(),
        value: value.to_string(),
        variables_reference,
        ..Variable::default()
    }
}

/// Frame `id` of `path` at `line`, column 1.
pub fn stack_frame(id: i64, name: &str, path: &str, line: i64) -> StackFrame {
    StackFrame {
        id,
        name: name.to_string(),
        source: Some(Source {
            name: path.rsplit('/').next().map(str::to_string),
            path: Some(path.to_string()),
            ..Source::default()
        }),
        line,
        column: 1,
        end_line: None,
        end_column: None,
        can_restart: None,
        instruction_pointer_reference: None,
        presentation_hint: None,
    }
}

/// `count` frames with ids `1..=count`, frame `i` at line `i` of `path`.
pub fn stack_frames(count: usize, path: &str) -> Vec<StackFrame> {
    (1..=count as i64)
        .map(|id| stack_frame(id, &format!("frame{id}"), path, id))
        .collect()
}
