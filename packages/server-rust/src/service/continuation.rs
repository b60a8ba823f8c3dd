//! Parked blocking calls awaiting their next step.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use parking_lot::Mutex;

use super::native::{NativeValue, Progress};
use super::operation::{CallContext, CallId};
use super::registry::ProcedureDescriptor;
use crate::network::ConnectionId;

/// A suspended blocking call: the procedure, its already-coerced arguments
/// and the progress its last step left behind.
pub struct Continuation {
    pub(crate) descriptor: Arc<ProcedureDescriptor>,
    pub(crate) ctx: CallContext,
    pub(crate) arguments: Vec<NativeValue>,
    pub(crate) progress: Progress,
    /// Steps executed so far, including the first dispatch.
    pub(crate) steps: u64,
}

impl Continuation {
    #[must_use]
    pub fn ctx(&self) -> CallContext {
        self.ctx
    }

    #[must_use]
    pub fn procedure(&self) -> &str {
        &self.descriptor.qualified_name
    }

    #[must_use]
    pub fn steps(&self) -> u64 {
        self.steps
    }
}

struct Tables {
    pending: HashMap<CallId, Continuation>,
    closed: HashSet<ConnectionId>,
}

/// Table of pending continuations keyed by call id.
///
/// A continuation is taken out while it runs, so a call is never resumed
/// twice concurrently and the lock is never held across a native step.
/// Connections passed to [`ContinuationManager::discard_connection`] stay
/// closed: a step that was running at that moment cannot park again.
pub struct ContinuationManager {
    tables: Mutex<Tables>,
}

impl ContinuationManager {
    #[must_use]
    pub fn new() -> Self {
        Self {
            tables: Mutex::new(Tables {
                pending: HashMap::new(),
                closed: HashSet::new(),
            }),
        }
    }

    /// Stores the continuation for its next step. Returns `false`, dropping
    /// it, if its connection has already been discarded.
    #[must_use]
    pub fn park(&self, continuation: Continuation) -> bool {
        let id = continuation.ctx.call_id;
        let connection = continuation.ctx.connection_id;
        let mut tables = self.tables.lock();
        if tables.closed.contains(&connection) {
            tracing::debug!(
                call_id = id.0,
                connection = connection.0,
                "continuation dropped for closed connection"
            );
            return false;
        }
        tracing::debug!(
            call_id = id.0,
            procedure = continuation.procedure(),
            steps = continuation.steps,
            "continuation parked"
        );
        tables.pending.insert(id, continuation);
        true
    }

    /// Removes the continuation so the caller can run its next step.
    pub fn take(&self, id: CallId) -> Option<Continuation> {
        self.tables.lock().pending.remove(&id)
    }

    /// Pending call ids in ascending order, i.e. in order of first dispatch.
    #[must_use]
    pub fn pending_ids(&self) -> Vec<CallId> {
        let mut ids: Vec<CallId> = self.tables.lock().pending.keys().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Drops a pending continuation. Returns whether it existed.
    pub fn discard(&self, id: CallId) -> bool {
        self.tables.lock().pending.remove(&id).is_some()
    }

    /// Drops every continuation started by `connection` and closes it to
    /// further parking. Returns how many were dropped.
    pub fn discard_connection(&self, connection: ConnectionId) -> usize {
        let mut tables = self.tables.lock();
        tables.closed.insert(connection);
        let before = tables.pending.len();
        tables.pending.retain(|_, c| c.ctx.connection_id != connection);
        before - tables.pending.len()
    }

    #[must_use]
    pub fn contains(&self, id: CallId) -> bool {
        self.tables.lock().pending.contains_key(&id)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tables.lock().pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for ContinuationManager {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
