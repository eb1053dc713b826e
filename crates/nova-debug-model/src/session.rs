use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use crate::error::{SessionError, SessionResult};
use crate::expression::EvaluateContext;
use crate::protocol::{
    Capabilities, DataBreakpointInfoResponse, EvaluateLocation, EvaluateResponse,
    ExceptionInfoResponse, ReadMemoryResponse, ScopesResponse, SetValueResponse,
    StackTraceResponse, SteppingGranularity, VariablesFilter, VariablesResponse,
    WriteMemoryResponse,
};

#[derive(Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// Body of the DAP `memory` event: a range of a memory reference became stale.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryInvalidation {
    pub memory_reference: String,
    pub offset: i64,
    pub count: i64,
}

/// Live connection to one debug adapter, as seen by the model.
///
/// Implementations own the transport; the model only issues requests and reads
/// capabilities. Every request method is a suspension point. Implementations must
/// report a cancelled `stackTrace` as [`SessionError::Cancelled`] (or `Ok(None)`),
/// never as an adapter failure.
#[async_trait]
pub trait DebugSession: Send + Sync {
    fn id(&self) -> SessionId;

    /// Name of the launch configuration this session was started from.
    fn configuration_name(&self) -> String;

    fn parent_id(&self) -> Option<SessionId> {
        None
    }

    /// Inactive sessions are kept around for their output but hidden by default.
    fn is_active(&self) -> bool {
        true
    }

    fn capabilities(&self) -> Capabilities;

    /// Eagerly materialize `lazy` children when a variables page is fetched.
    fn auto_expand_lazy_variables(&self) -> bool {
        false
    }

    async fn evaluate(
        &self,
        expression: &str,
        frame_id: Option<i64>,
        context: EvaluateContext,
        location: Option<EvaluateLocation>,
    ) -> SessionResult<Option<EvaluateResponse>>;

    async fn variables(
        &self,
        variables_reference: i64,
        thread_id: Option<i64>,
        filter: Option<VariablesFilter>,
        start: Option<i64>,
        count: Option<i64>,
    ) -> SessionResult<Option<VariablesResponse>>;

    async fn stack_trace(
        &self,
        thread_id: i64,
        start_frame: i64,
        levels: i64,
        token: CancellationToken,
    ) -> SessionResult<Option<StackTraceResponse>>;

    async fn scopes(&self, frame_id: i64, thread_id: i64) -> SessionResult<Option<ScopesResponse>>;

    async fn set_variable(
        &self,
        variables_reference: i64,
        name: &str,
        value: &str,
    ) -> SessionResult<Option<SetValueResponse>>;

    async fn set_expression(
        &self,
        frame_id: i64,
        expression: &str,
        value: &str,
    ) -> SessionResult<Option<SetValueResponse>>;

    async fn read_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        count: i64,
    ) -> SessionResult<Option<ReadMemoryResponse>>;

    async fn write_memory(
        &self,
        memory_reference: &str,
        offset: i64,
        data: &str,
        allow_partial: bool,
    ) -> SessionResult<Option<WriteMemoryResponse>>;

    /// Stream of `memory` events reported by the adapter.
    fn subscribe_memory_invalidations(&self) -> broadcast::Receiver<MemoryInvalidation>;

    async fn data_bytes_breakpoint_info(
        &self,
        address: &str,
        bytes: i64,
    ) -> SessionResult<Option<DataBreakpointInfoResponse>>;

    async fn exception_info(&self, thread_id: i64) -> SessionResult<Option<ExceptionInfoResponse>>;

    async fn restart_frame(&self, _frame_id: i64, _thread_id: i64) -> SessionResult<()> {
        Err(SessionError::Unsupported("restartFrame"))
    }

    async fn next(
        &self,
        _thread_id: i64,
        _granularity: Option<SteppingGranularity>,
    ) -> SessionResult<()> {
        Err(SessionError::Unsupported("next"))
    }

    async fn step_in(
        &self,
        _thread_id: i64,
        _granularity: Option<SteppingGranularity>,
    ) -> SessionResult<()> {
        Err(SessionError::Unsupported("stepIn"))
    }

    async fn step_out(
        &self,
        _thread_id: i64,
        _granularity: Option<SteppingGranularity>,
    ) -> SessionResult<()> {
        Err(SessionError::Unsupported("stepOut"))
    }

    async fn step_back(
        &self,
        _thread_id: i64,
        _granularity: Option<SteppingGranularity>,
    ) -> SessionResult<()> {
        Err(SessionError::Unsupported("stepBack"))
    }

    async fn r#continue(&self, _thread_id: i64) -> SessionResult<()> {
        Err(SessionError::Unsupported("continue"))
    }

    async fn pause(&self, _thread_id: i64) -> SessionResult<()> {
        Err(SessionError::Unsupported("pause"))
    }

    async fn terminate_threads(&self, _thread_ids: &[i64]) -> SessionResult<()> {
        Err(SessionError::Unsupported("terminateThreads"))
    }
}
