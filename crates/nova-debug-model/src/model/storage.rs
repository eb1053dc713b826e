use std::collections::{HashMap, HashSet};

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::breakpoints::Persisted;

const TARGET: &str = "nova.debug_model";

/// Persisted watch expression.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredWatchExpression {
    pub name: String,
    pub id: String,
}

/// Snapshot of everything the model persists across restarts, each collection in its
/// `to_json` shape.
///
/// Entries are kept as raw JSON so one malformed entry does not discard the rest of its
/// collection.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct StoredDebugState {
    pub breakpoints: Vec<Value>,
    pub function_breakpoints: Vec<Value>,
    pub exception_breakpoints: Vec<Value>,
    pub data_breakpoints: Vec<Value>,
    pub watch_expressions: Vec<StoredWatchExpression>,
}

/// Decode every entry of a stored collection, skipping (and logging) malformed ones.
pub(crate) fn decode_entries<T: DeserializeOwned>(kind: &str, entries: &[Value]) -> Vec<T> {
    entries
        .iter()
        .filter_map(|entry| match serde_json::from_value(entry.clone()) {
            Ok(value) => Some(value),
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    kind,
                    error = %err,
                    "ignoring malformed stored entry"
                );
                None
            }
        })
        .collect()
}

/// Rebuild a collection from its stored entries. Entries whose id is already in
/// `current` keep their session state; the first stored entry per id wins.
pub(crate) fn reconcile<T: Persisted>(current: Vec<T>, stored: Vec<T>) -> Vec<T> {
    let mut previous: HashMap<String, T> = current
        .into_iter()
        .map(|entry| (entry.persisted_id().to_string(), entry))
        .collect();
    let mut seen = HashSet::new();
    stored
        .into_iter()
        .filter(|entry| seen.insert(entry.persisted_id().to_string()))
        .map(|mut entry| {
            if let Some(existing) = previous.remove(entry.persisted_id()) {
                entry.keep_runtime_state(existing);
            }
            entry
        })
        .collect()
}
