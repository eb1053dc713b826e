use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{to_json_value, BaseBreakpoint, Persisted};
use crate::protocol::{DataBreakpointAccessType, DataBreakpointRequest};
use crate::session::{DebugSession, SessionId};

/// What a data breakpoint watches.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DataBreakpointSource {
    /// A variable the adapter already assigned a `dataId` to.
    #[serde(rename_all = "camelCase")]
    Variable { data_id: String },
    /// A raw address range; each session resolves its own `dataId`.
    #[serde(rename_all = "camelCase")]
    Address { address: String, bytes: i64 },
}

#[derive(Clone, Debug, PartialEq)]
pub struct DataBreakpointOptions {
    pub id: Option<String>,
    pub description: String,
    pub src: DataBreakpointSource,
    pub can_persist: bool,
    pub access_types: Option<Vec<DataBreakpointAccessType>>,
    pub access_type: DataBreakpointAccessType,
    pub enabled: Option<bool>,
    pub condition: Option<String>,
    pub hit_condition: Option<String>,
    pub mode: Option<String>,
    pub mode_label: Option<String>,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct DataBreakpointUpdate {
    pub condition: Option<Option<String>>,
    pub hit_condition: Option<Option<String>>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DataBreakpoint {
    #[serde(flatten)]
    pub base: BaseBreakpoint,
    pub description: String,
    pub src: DataBreakpointSource,
    #[serde(default)]
    pub can_persist: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_types: Option<Vec<DataBreakpointAccessType>>,
    pub access_type: DataBreakpointAccessType,
    /// Resolved `dataId` per session for address sources. Shared between clones so a
    /// snapshot taken for a request still fills the cache of the stored breakpoint.
    #[serde(skip)]
    session_data_ids: Arc<Mutex<HashMap<SessionId, String>>>,
}

impl DataBreakpoint {
    pub fn new(options: DataBreakpointOptions) -> Self {
        let mut base = BaseBreakpoint::new(options.id, options.enabled.unwrap_or(true));
        base.condition = options.condition;
        base.hit_condition = options.hit_condition;
        base.mode = options.mode;
        base.mode_label = options.mode_label;
        Self {
            base,
            description: options.description,
            src: options.src,
            can_persist: options.can_persist,
            access_types: options.access_types,
            access_type: options.access_type,
            session_data_ids: Arc::default(),
        }
    }

    pub fn from_json(value: Value) -> serde_json::Result<Self> {
        serde_json::from_value(value)
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
            .map_or(true, |data| data.supports_data_breakpoints)
    }

    pub fn update(&mut self, update: DataBreakpointUpdate) {
        if let Some(condition) = update.condition {
            self.base.condition = condition;
        }
        if let Some(hit_condition) = update.hit_condition {
            self.base.hit_condition = hit_condition;
        }
    }

    /// Build the `setDataBreakpoints` entry for `session`. Address sources ask the
    /// adapter for a `dataId` once per session; `None` when the adapter has none.
    pub async fn to_dap(&self, session: &dyn DebugSession) -> Option<DataBreakpointRequest> {
        let data_id = match &self.src {
            DataBreakpointSource::Variable { data_id } => data_id.clone(),
            DataBreakpointSource::Address { address, bytes } => {
                let session_id = session.id();
                let cached = self.session_data_ids.lock().get(&session_id).cloned();
                match cached {
                    Some(data_id) => data_id,
                    None => {
                        let info = match session.data_bytes_breakpoint_info(address, *bytes).await {
                            Ok(info) => info,
                            Err(err) => {
                                tracing::debug!(
                                    target: "nova.debug_model",
                                    session = %session_id,
                                    address = %address,
                                    error = %err,
                                    "dataBytesBreakpointInfo failed"
                                );
                                None
                            }
                        };
                        let data_id = info.and_then(|info| info.data_id)?;
                        self.session_data_ids
                            .lock()
                            .insert(session_id, data_id.clone());
                        data_id
                    }
                }
            }
        };

        Some(DataBreakpointRequest {
            data_id,
            access_type: Some(self.access_type),
            condition: self.base.condition.clone(),
            hit_condition: self.base.hit_condition.clone(),
        })
    }
}

impl Persisted for DataBreakpoint {
    fn persisted_id(&self) -> &str {
        self.id()
    }

    /// Resolved data ids are kept only while the watched address is unchanged.
    fn keep_runtime_state(&mut self, previous: Self) {
        self.base.keep_session_state(previous.base);
        if self.src == previous.src {
            self.session_data_ids = previous.session_data_ids;
        }
    }
}
