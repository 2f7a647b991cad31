//! Correlation table - in-flight outbound calls keyed by correlation id.
//!
//! Every outbound call registers an entry before its packet is written; the
//! entry's oneshot completes through exactly one of three paths:
//!
//! - `resolve` - a reply packet with a matching id arrived
//! - sweep - the entry outlived the configured call timeout
//! - `drain` - the owning session was torn down
//!
//! All three race for ownership; remove-then-complete on the map guarantees
//! a future is completed at most once regardless of the race outcome.
//!
//! Entries live in a `BTreeMap` keyed by id. Ids are a per-session monotonic
//! counter, so key order is creation order and the sweep can walk
//! oldest-first and stop at the first entry still inside the window.

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::value::RawValue;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use crate::error::{Result, SockwireError};

/// Default time a call may stay pending before the sweep fails it.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(30);
/// Default period of the background sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(1);
/// Default cap on concurrently pending calls per session.
pub const DEFAULT_MAX_PENDING_CALLS: usize = 1024;

/// Raw reply delivered to a waiting caller: the undecoded body on success,
/// or the already-classified error.
pub type CallReply = Result<Box<RawValue>>;

/// One outstanding call.
struct PendingCall {
    created_at: Instant,
    tx: oneshot::Sender<CallReply>,
}

/// Thread-safe registry of pending calls for one session.
///
/// Lock discipline: the mutex guards only map operations and is never held
/// across an await; completions are sent after the lock is released.
pub struct CorrelationTable {
    entries: Mutex<BTreeMap<i64, PendingCall>>,
    timeout: Duration,
    max_pending: usize,
}

impl CorrelationTable {
    pub fn new(timeout: Duration, max_pending: usize) -> Self {
        Self {
            entries: Mutex::new(BTreeMap::new()),
            timeout,
            max_pending,
        }
    }

    /// Insert a pending entry and hand back the receiver, non-blocking.
    ///
    /// # Errors
    ///
    /// `PendingLimit` when the table is full; `Protocol` when the id is
    /// already pending (cannot happen with the session's counter).
    pub fn register(&self, id: i64) -> Result<oneshot::Receiver<CallReply>> {
        let (tx, rx) = oneshot::channel();
        let mut entries = self.lock();

        if entries.len() >= self.max_pending {
            return Err(SockwireError::PendingLimit(self.max_pending));
        }
        if entries.contains_key(&id) {
            return Err(SockwireError::Protocol(format!(
                "correlation id {id} already pending"
            )));
        }

        entries.insert(
            id,
            PendingCall {
                created_at: Instant::now(),
                tx,
            },
        );
        Ok(rx)
    }

    /// Complete the entry for `id` with a reply.
    ///
    /// Returns `false` (a no-op) when no entry exists - the call already
    /// timed out, was drained, or the id is foreign. A caller that dropped
    /// its receiver is tolerated.
    pub fn resolve(&self, id: i64, state: bool, body: Box<RawValue>) -> bool {
        let removed = self.lock().remove(&id);
        match removed {
            Some(call) => {
                let reply = if state {
                    Ok(body)
                } else {
                    Err(SockwireError::Remote(failure_message(&body)))
                };
                let _ = call.tx.send(reply);
                true
            }
            None => false,
        }
    }

    /// Remove an entry without completing it.
    ///
    /// Used when the call never made it onto the wire; the caller still
    /// holds the receiver and reports the send error instead.
    pub fn forget(&self, id: i64) -> bool {
        self.lock().remove(&id).is_some()
    }

    /// Expire entries older than the timeout; returns how many.
    ///
    /// Walks oldest-first and stops at the first entry still inside the
    /// window, so a pass costs only as much as it expires.
    pub fn sweep(&self, now: Instant) -> usize {
        let mut expired = Vec::new();
        {
            let mut entries = self.lock();
            for (id, call) in entries.iter() {
                if now.duration_since(call.created_at) < self.timeout {
                    break;
                }
                expired.push(*id);
            }
            let mut taken = Vec::with_capacity(expired.len());
            for id in &expired {
                if let Some(call) = entries.remove(id) {
                    taken.push(call);
                }
            }
            drop(entries);

            for call in taken {
                let _ = call.tx.send(Err(SockwireError::CallTimeout));
            }
        }
        expired.len()
    }

    /// Fail every pending call with a disconnected error; returns how many.
    ///
    /// Called on session teardown so no caller waits out its timeout.
    pub fn drain(&self) -> usize {
        let taken = std::mem::take(&mut *self.lock());
        let count = taken.len();
        for (_, call) in taken {
            let _ = call.tx.send(Err(SockwireError::Disconnected));
        }
        count
    }

    /// Number of calls currently awaiting replies.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Spawn the background sweep loop.
    ///
    /// The task holds only a weak reference and exits when the table is
    /// dropped; the session also aborts it on teardown.
    pub fn spawn_sweeper(self: &Arc<Self>, period: Duration) -> JoinHandle<()> {
        let weak = Arc::downgrade(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                ticker.tick().await;
                let Some(table) = weak.upgrade() else {
                    break;
                };
                let expired = table.sweep(Instant::now());
                if expired > 0 {
                    tracing::debug!(expired, "expired pending calls");
                }
            }
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, BTreeMap<i64, PendingCall>> {
        match self.entries.lock() {
            Ok(guard) => guard,
            // A poisoned map only means another thread panicked mid-insert;
            // the entries themselves are still consistent.
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

/// Failure bodies are error-message strings; fall back to the raw JSON text.
fn failure_message(body: &RawValue) -> String {
    serde_json::from_str::<String>(body.get()).unwrap_or_else(|_| body.get().to_string())
}
