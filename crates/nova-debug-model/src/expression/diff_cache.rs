use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use super::DEFAULT_VALUE;

/// Last value recorded per container id, used to flag values that changed since the
/// previous stop.
///
/// Owned by a `DebugModel` and handed to every container it creates; clones share the
/// same map. Entries outlive the containers that wrote them.
#[derive(Clone, Debug, Default)]
pub struct DiffCache {
    values: Arc<Mutex<HashMap<String, String>>>,
}

impl DiffCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record `value` for `id` and report whether it differs from a meaningful
    /// previous value (empty and "not available" never count as a change).
    pub fn record(&self, id: &str, value: &str) -> bool {
        let previous = self
            .values
            .lock()
            .insert(id.to_string(), value.to_string());
        match previous {
            Some(previous) => {
                !previous.is_empty() && previous != DEFAULT_VALUE && previous != value
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<String> {
        self.values.lock().get(id).cloned()
    }

    pub fn clear(&self) {
        self.values.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.values.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.lock().is_empty()
    }
}
