//! Pending-call registry shared by a transport and its callers.
//!
//! Every outbound request registers a [`Waiter`] before its frame is written.
//! The read side resolves the waiter when the matching response arrives. When
//! the transport dies, [`CallMap::cancel_all`] fails every waiter with the
//! same error and refuses any later registration.

use std::collections::HashMap;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::call::{Call, CallId};
use crate::error::TransportError;

/// Outcome delivered to a waiter.
pub type CallOutcome = Result<Call, TransportError>;

/// Errors returned by [`CallMap::register`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CallMapError {
    /// A waiter is already registered under the id.
    #[error("call {0} is already pending")]
    Duplicate(CallId),

    /// The map was cancelled; no new calls are accepted.
    #[error("call map closed: {0}")]
    Closed(TransportError),
}

#[derive(Default)]
struct Inner {
    pending: HashMap<CallId, oneshot::Sender<CallOutcome>>,
    closed: Option<TransportError>,
}

/// Registry of outstanding calls keyed by [`CallId`].
///
/// Each entry is completed exactly once: by [`resolve`](Self::resolve),
/// [`fail`](Self::fail), [`cancel_all`](Self::cancel_all), or by its waiter
/// abandoning it on timeout. Whichever happens first removes the entry under
/// the lock, so the others find nothing to do.
#[derive(Default)]
pub struct CallMap {
    inner: Mutex<Inner>,
}

impl std::fmt::Debug for CallMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("CallMap")
            .field("pending", &inner.pending.len())
            .field("closed", &inner.closed)
            .finish()
    }
}

impl CallMap {
    /// Create an empty call map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a waiter for `id`.
    pub fn register(&self, id: CallId) -> Result<Waiter<'_>, CallMapError> {
        let mut inner = self.inner.lock();
        if let Some(err) = &inner.closed {
            return Err(CallMapError::Closed(err.clone()));
        }
        if inner.pending.contains_key(&id) {
            return Err(CallMapError::Duplicate(id));
        }
        let (tx, rx) = oneshot::channel();
        inner.pending.insert(id, tx);
        Ok(Waiter { map: self, id, rx })
    }

    /// Deliver `call` to the waiter registered under its id.
    ///
    /// Returns false when nobody is waiting, e.g. the caller already timed
    /// out. The call is dropped in that case.
    pub fn resolve(&self, call: Call) -> bool {
        let Some(tx) = self.inner.lock().pending.remove(&call.id) else {
            tracing::debug!(call_id = %call.id, method = %call.method, "no waiter for response");
            return false;
        };
        let id = call.id;
        if tx.send(Ok(call)).is_err() {
            tracing::debug!(call_id = %id, "waiter dropped before response arrived");
        }
        true
    }

    /// Fail the waiter registered under `id`.
    pub fn fail(&self, id: CallId, err: TransportError) -> bool {
        let Some(tx) = self.inner.lock().pending.remove(&id) else {
            return false;
        };
        let _ = tx.send(Err(err));
        true
    }

    /// Fail every pending waiter with `err` and reject future registrations.
    ///
    /// The first cancellation wins; later calls only drain stragglers.
    pub fn cancel_all(&self, err: TransportError) {
        let drained: Vec<_> = {
            let mut inner = self.inner.lock();
            if inner.closed.is_none() {
                inner.closed = Some(err.clone());
            }
            inner.pending.drain().collect()
        };
        if !drained.is_empty() {
            tracing::debug!(count = drained.len(), error = %err, "cancelling pending calls");
        }
        for (_, tx) in drained {
            let _ = tx.send(Err(err.clone()));
        }
    }

    /// Number of outstanding calls.
    pub fn len(&self) -> usize {
        self.inner.lock().pending.len()
    }

    /// True when no call is outstanding.
    pub fn is_empty(&self) -> bool {
        self.inner.lock().pending.is_empty()
    }

    /// True once [`cancel_all`](Self::cancel_all) has run.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed.is_some()
    }

    fn abandon(&self, id: CallId) -> bool {
        self.inner.lock().pending.remove(&id).is_some()
    }
}

/// Handle for one pending call.
///
/// Dropping a waiter without awaiting it removes its entry.
#[must_use = "a waiter does nothing unless awaited"]
pub struct Waiter<'a> {
    map: &'a CallMap,
    id: CallId,
    rx: oneshot::Receiver<CallOutcome>,
}

/// Outcome of [`Waiter::wait_timeout`].
#[derive(Debug)]
pub enum WaitOutcome {
    /// The call completed (successfully or not) before the deadline.
    Completed(CallOutcome),
    /// The deadline passed; the entry was removed from the map.
    TimedOut,
}

impl Waiter<'_> {
    /// Id this waiter is registered under.
    pub fn id(&self) -> CallId {
        self.id
    }

    /// Wait until the call is resolved or failed.
    pub async fn wait(mut self) -> CallOutcome {
        match (&mut self.rx).await {
            Ok(outcome) => outcome,
            // Sender dropped without completing: only possible if the map
            // itself was dropped.
            Err(_) => Err(TransportError::Closed),
        }
    }

    /// Wait at most `timeout` for completion.
    ///
    /// If the deadline expires the entry is withdrawn under the map lock. A
    /// resolution that raced in before the withdrawal wins and is returned.
    pub async fn wait_timeout(mut self, timeout: Duration) -> WaitOutcome {
        match tokio::time::timeout(timeout, &mut self.rx).await {
            Ok(Ok(outcome)) => WaitOutcome::Completed(outcome),
            Ok(Err(_)) => WaitOutcome::Completed(Err(TransportError::Closed)),
            Err(_) => {
                if self.map.abandon(self.id) {
                    tracing::debug!(call_id = %self.id, ?timeout, "call timed out");
                    return WaitOutcome::TimedOut;
                }
                // Entry already removed: the sender has fired or is firing.
                match (&mut self.rx).await {
                    Ok(outcome) => WaitOutcome::Completed(outcome),
                    Err(_) => WaitOutcome::Completed(Err(TransportError::Closed)),
                }
            }
        }
    }
}

impl Drop for Waiter<'_> {
    fn drop(&mut self) {
        self.map.abandon(self.id);
    }
}
