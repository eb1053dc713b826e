use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::Mutex;

use crate::expression::ContainerEnv;
use crate::memory::MemoryRegion;
use crate::protocol;
use crate::session::{DebugSession, SessionId};
use crate::source::{Source, SourceRegistry};
use crate::stack::{StoppedDetails, Thread};

/// Thread list (and optional stop) reported by a session, applied with
/// `DebugModel::raw_update`.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct RawModelUpdate {
    pub session_id: SessionId,
    pub threads: Vec<protocol::Thread>,
    pub stopped_details: Option<StoppedDetails>,
}

/// The model's record of one debug session: its display label, threads and sources.
pub struct ModelSession {
    session: Arc<dyn DebugSession>,
    sources: Arc<SourceRegistry>,
    env: ContainerEnv,
    threads: Mutex<IndexMap<i64, Arc<Thread>>>,
    label: Mutex<String>,
}

impl fmt::Debug for ModelSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelSession")
            .field("id", &self.session.id())
            .field("label", &*self.label.lock())
            .field("threads", &self.threads.lock().len())
            .finish_non_exhaustive()
    }
}

impl ModelSession {
    pub(crate) fn new(session: Arc<dyn DebugSession>, env: ContainerEnv) -> Self {
        let label = session.configuration_name();
        Self {
            session,
            sources: Arc::new(SourceRegistry::default()),
            env,
            threads: Mutex::new(IndexMap::new()),
            label: Mutex::new(label),
        }
    }

    pub fn id(&self) -> SessionId {
        self.session.id()
    }

    pub fn session(&self) -> &Arc<dyn DebugSession> {
        &self.session
    }

    pub fn configuration_name(&self) -> String {
        self.session.configuration_name()
    }

    pub fn parent_id(&self) -> Option<SessionId> {
        self.session.parent_id()
    }

    pub fn is_active(&self) -> bool {
        self.session.is_active()
    }

    pub fn label(&self) -> String {
        self.label.lock().clone()
    }

    pub(crate) fn set_label(&self, label: String) {
        *self.label.lock() = label;
    }

    pub fn sources(&self) -> &Arc<SourceRegistry> {
        &self.sources
    }

    pub fn get_source(&self, raw: Option<&protocol::Source>) -> Arc<Source> {
        self.sources.get_or_insert(raw, &self.session.id())
    }

    pub fn get_thread(&self, thread_id: i64) -> Option<Arc<Thread>> {
        self.threads.lock().get(&thread_id).cloned()
    }

    pub fn threads(&self) -> Vec<Arc<Thread>> {
        self.threads.lock().values().cloned().collect()
    }

    /// Memory behind `memory_reference`. Requires a tokio runtime.
    pub fn memory(&self, memory_reference: impl Into<String>) -> MemoryRegion {
        MemoryRegion::new(memory_reference, self.session.clone())
    }

    pub(crate) fn raw_update(&self, update: &RawModelUpdate) {
        let mut threads = self.threads.lock();
        for raw in &update.threads {
            match threads.get(&raw.id) {
                Some(thread) => {
                    if !raw.name.is_empty() {
                        thread.set_name(raw.name.clone());
                    }
                }
                None => {
                    let thread = Thread::new(
                        self.session.clone(),
                        self.sources.clone(),
                        self.env.clone(),
                        raw.id,
                        raw.name.clone(),
                    );
                    threads.insert(raw.id, Arc::new(thread));
                }
            }
        }
        threads.retain(|id, _| update.threads.iter().any(|raw| raw.id == *id));

        let Some(details) = update.stopped_details.as_ref() else {
            return;
        };
        if details.all_threads_stopped {
            for thread in threads.values() {
                let own = if Some(thread.thread_id()) == details.thread_id {
                    details.clone()
                } else {
                    StoppedDetails {
                        reason: thread.stopped_details().and_then(|d| d.reason),
                        ..StoppedDetails::default()
                    }
                };
                thread.set_stopped_details(Some(own));
                thread.set_stopped(true);
                thread.clear_call_stack();
            }
        } else if let Some(thread) = details.thread_id.and_then(|id| threads.get(&id)) {
            thread.set_stopped_details(Some(details.clone()));
            thread.clear_call_stack();
            thread.set_stopped(true);
        }
    }

    pub(crate) fn clear_threads(&self, remove_threads: bool, reference: Option<i64>) {
        let mut threads = self.threads.lock();
        match reference {
            Some(reference) => {
                if let Some(thread) = threads.get(&reference).cloned() {
                    reset_thread(&thread);
                    if remove_threads {
                        threads.shift_remove(&reference);
                    }
                }
            }
            None => {
                for thread in threads.values() {
                    reset_thread(thread);
                }
                if remove_threads {
                    threads.clear();
                    self.env.diff_cache.clear();
                }
            }
        }
    }
}

fn reset_thread(thread: &Thread) {
    thread.clear_call_stack();
    thread.set_stopped_details(None);
    thread.set_stopped(false);
}
