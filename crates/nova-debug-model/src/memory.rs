//! Byte-level access to a memory reference of a debug session.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::error::{SessionError, SessionResult};
use crate::session::DebugSession;

const TARGET: &str = "nova.debug_model";

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MemoryRange {
    Valid { offset: i64, length: i64, data: Vec<u8> },
    Unreadable { offset: i64, length: i64 },
    Error { offset: i64, length: i64, error: String },
}

/// Half-open byte span `[from_offset, to_offset)` whose cached contents are stale.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MemoryInvalidationEvent {
    pub from_offset: i64,
    pub to_offset: i64,
}

/// Memory behind one memory reference. Nothing is cached; every read is a round trip.
///
/// Must be created inside a tokio runtime: adapter `memory` events for this reference
/// are forwarded to [`MemoryRegion::subscribe`] by a background task that lives as long
/// as the region.
pub struct MemoryRegion {
    memory_reference: String,
    session: Arc<dyn DebugSession>,
    invalidations: broadcast::Sender<MemoryInvalidationEvent>,
    forwarder: JoinHandle<()>,
}

impl std::fmt::Debug for MemoryRegion {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryRegion")
            .field("memory_reference", &self.memory_reference)
            .field("session", &self.session.id())
            .finish_non_exhaustive()
    }
}

impl MemoryRegion {
    pub fn new(memory_reference: impl Into<String>, session: Arc<dyn DebugSession>) -> Self {
        let memory_reference = memory_reference.into();
        let (invalidations, _) = broadcast::channel(64);

        let mut adapter_events = session.subscribe_memory_invalidations();
        let sender = invalidations.clone();
        let reference = memory_reference.clone();
        let forwarder = tokio::spawn(async move {
            loop {
                match adapter_events.recv().await {
                    Ok(event) if event.memory_reference == reference => {
                        let _ = sender.send(MemoryInvalidationEvent {
                            from_offset: event.offset,
                            to_offset: event.offset.saturating_add(event.count),
                        });
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(target: TARGET, skipped, "dropped memory invalidation events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            memory_reference,
            session,
            invalidations,
            forwarder,
        }
    }

    pub fn memory_reference(&self) -> &str {
        &self.memory_reference
    }

    pub fn writable(&self) -> bool {
        self.session.capabilities().supports_write_memory_request
    }

    pub fn subscribe(&self) -> broadcast::Receiver<MemoryInvalidationEvent> {
        self.invalidations.subscribe()
    }

    /// Read `[from_offset, to_offset)`. Short answers are zero-padded, long ones are
    /// truncated; bytes the adapter reports as unreadable form a trailing range.
    pub async fn read(&self, from_offset: i64, to_offset: i64) -> Vec<MemoryRange> {
        let offset = from_offset;
        let length = to_offset - from_offset;

        let response = match self
            .session
            .read_memory(&self.memory_reference, offset, length)
            .await
        {
            Ok(response) => response,
            Err(SessionError::Cancelled) => None,
            Err(err) => {
                tracing::debug!(
                    target: TARGET,
                    reference = %self.memory_reference,
                    error = %err,
                    "readMemory failed"
                );
                return vec![MemoryRange::Error {
                    offset,
                    length,
                    error: err.to_string(),
                }];
            }
        };
        let Some((encoded, unreadable)) = response.and_then(|response| {
            let unreadable = response.unreadable_bytes.unwrap_or(0);
            response
                .data
                .filter(|data| !data.is_empty())
                .map(|data| (data, unreadable))
        }) else {
            return vec![MemoryRange::Unreadable { offset, length }];
        };

        let mut data = match STANDARD.decode(encoded.as_bytes()) {
            Ok(data) => data,
            Err(err) => {
                tracing::warn!(
                    target: TARGET,
                    reference = %self.memory_reference,
                    error = %err,
                    "adapter returned invalid base64 memory"
                );
                return vec![MemoryRange::Error {
                    offset,
                    length,
                    error: "Invalid base64 data from debug adapter".to_string(),
                }];
            }
        };

        let data_length = length.saturating_sub(unreadable).max(0);
        data.resize(data_length as usize, 0);

        if unreadable <= 0 {
            return vec![MemoryRange::Valid {
                offset,
                length,
                data,
            }];
        }
        vec![
            MemoryRange::Valid {
                offset,
                length: data_length,
                data,
            },
            MemoryRange::Unreadable {
                offset: offset.saturating_add(data_length),
                length: unreadable,
            },
        ]
    }

    /// Write `data` at `offset` and invalidate the written span. Returns the number of
    /// bytes the adapter reports as written.
    pub async fn write(&self, offset: i64, data: &[u8]) -> SessionResult<i64> {
        if !self.writable() {
            return Err(SessionError::Unsupported("writeMemory"));
        }
        let encoded = STANDARD.encode(data);
        let response = self
            .session
            .write_memory(&self.memory_reference, offset, &encoded, true)
            .await?;
        let written = response
            .and_then(|response| response.bytes_written)
            .unwrap_or(data.len() as i64);
        let _ = self.invalidations.send(MemoryInvalidationEvent {
            from_offset: offset,
            to_offset: offset.saturating_add(written),
        });
        Ok(written)
    }
}

impl Drop for MemoryRegion {
    fn drop(&mut self) {
        self.forwarder.abort();
    }
}
