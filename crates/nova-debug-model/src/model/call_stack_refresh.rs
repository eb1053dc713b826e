use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use parking_lot::Mutex;
use tokio::sync::{broadcast, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use super::DebugModelEvent;
use crate::stack::Thread;

const TARGET: &str = "nova.debug_model";

/// Completion handles returned by `DebugModel::refresh_top_of_call_stack`.
///
/// Both futures always resolve, also when a fetch fails or is cancelled.
pub struct CallStackRefresh {
    /// Resolves once the top frame is known.
    pub top_call_stack: BoxFuture<'static, ()>,
    /// Resolves once the deep fetch (or the single full fetch) finished.
    pub whole_call_stack: BoxFuture<'static, ()>,
}

impl CallStackRefresh {
    pub(crate) fn from_receivers(top: oneshot::Receiver<()>, whole: oneshot::Receiver<()>) -> Self {
        Self {
            top_call_stack: async move {
                let _ = top.await;
            }
            .boxed(),
            whole_call_stack: async move {
                let _ = whole.await;
            }
            .boxed(),
        }
    }
}

struct PendingDeepFetch {
    id: u64,
    deadline: Instant,
    started: bool,
    token: CancellationToken,
    waiters: Vec<oneshot::Sender<()>>,
}

impl PendingDeepFetch {
    fn complete(self) {
        for waiter in self.waiters {
            let _ = waiter.send(());
        }
    }
}

struct SchedulerInner {
    delay: Duration,
    levels: i64,
    next_id: AtomicU64,
    entries: Mutex<HashMap<String, PendingDeepFetch>>,
    events: broadcast::Sender<DebugModelEvent>,
}

/// Debounced deep call stack fetches, one pending entry per thread key.
///
/// Scheduling again within the debounce window pushes the deadline back and joins the
/// pending fetch; a request arriving while the fetch runs waits for that fetch.
#[derive(Clone)]
pub(crate) struct DeepFetchScheduler {
    inner: Arc<SchedulerInner>,
}

impl DeepFetchScheduler {
    pub(crate) fn new(
        delay: Duration,
        levels: i64,
        events: broadcast::Sender<DebugModelEvent>,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                delay,
                levels,
                next_id: AtomicU64::new(1),
                entries: Mutex::new(HashMap::new()),
                events,
            }),
        }
    }

    /// Schedule a deep fetch for `thread`; the receiver fires when it completes.
    pub(crate) fn schedule(&self, thread: Arc<Thread>) -> oneshot::Receiver<()> {
        let (tx, rx) = oneshot::channel();
        let key = thread.key();
        let deadline = Instant::now() + self.inner.delay;

        let mut entries = self.inner.entries.lock();
        if let Some(entry) = entries.get_mut(&key) {
            if !entry.started {
                entry.deadline = deadline;
            }
            entry.waiters.push(tx);
            return rx;
        }

        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        entries.insert(
            key.clone(),
            PendingDeepFetch {
                id,
                deadline,
                started: false,
                token: token.clone(),
                waiters: vec![tx],
            },
        );
        drop(entries);

        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            inner.run(key, id, token, thread).await;
        });
        rx
    }

    /// Drop every pending entry, resolving its waiters. Fetches already running are
    /// left to finish but no longer notify anyone.
    pub(crate) fn cancel_all(&self) {
        let entries: Vec<PendingDeepFetch> = self.inner.entries.lock().drain().map(|(_, e)| e).collect();
        for entry in entries {
            entry.token.cancel();
            entry.complete();
        }
    }

    #[cfg(test)]
    pub(crate) fn pending(&self) -> usize {
        self.inner.entries.lock().len()
    }
}

impl SchedulerInner {
    async fn run(&self, key: String, id: u64, token: CancellationToken, thread: Arc<Thread>) {
        loop {
            let deadline = {
                let mut entries = self.entries.lock();
                let Some(entry) = entries.get_mut(&key).filter(|entry| entry.id == id) else {
                    return;
                };
                if Instant::now() >= entry.deadline {
                    entry.started = true;
                    None
                } else {
                    Some(entry.deadline)
                }
            };
            let Some(deadline) = deadline else {
                break;
            };
            tokio::select! {
                _ = token.cancelled() => return,
                _ = tokio::time::sleep_until(deadline) => {}
            }
        }

        thread.fetch_call_stack(self.levels).await;
        if token.is_cancelled() {
            return;
        }

        let stale = thread.stale_call_stack();
        let current = thread.call_stack();
        let bottom_changed = stale.len() != current.len()
            || stale
                .iter()
                .zip(current.iter())
                .skip(1)
                .any(|(old, new)| !old.equals(new));
        if bottom_changed {
            let _ = self
                .events
                .send(DebugModelEvent::CallStackChanged(Some(thread.session_id())));
        } else {
            tracing::trace!(target: TARGET, thread = %key, "bottom of call stack unchanged");
        }

        let entry = {
            let mut entries = self.entries.lock();
            match entries.get(&key) {
                Some(entry) if entry.id == id => entries.remove(&key),
                _ => None,
            }
        };
        if let Some(entry) = entry {
            entry.complete();
        }
    }
}
