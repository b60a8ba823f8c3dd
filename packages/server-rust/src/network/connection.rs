//! Connection bookkeeping for client sessions.
//!
//! The transport owns sockets; this registry only tracks who is connected,
//! since when, and how many calls each client has made. Disconnecting a
//! client here also releases the server state it owned.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;

use crate::service::dispatcher::{DisconnectSummary, Dispatcher};

/// Unique identifier for a connection, assigned by the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata about a single connected client.
#[derive(Debug)]
pub struct ConnectionHandle {
    /// Unique connection identifier assigned by the registry.
    pub id: ConnectionId,
    /// Name the client announced, if any.
    pub name: Option<String>,
    /// When this connection was established.
    pub connected_at: Instant,
    calls: AtomicU64,
}

impl ConnectionHandle {
    /// Counts `n` calls made by this client.
    pub fn record_calls(&self, n: u64) {
        self.calls.fetch_add(n, Ordering::Relaxed);
    }

    /// Total calls made by this client since it connected.
    #[must_use]
    pub fn calls(&self) -> u64 {
        self.calls.load(Ordering::Relaxed)
    }
}

/// Thread-safe registry of all active connections.
///
/// Uses `DashMap` for lock-free concurrent access.
#[derive(Debug)]
pub struct ConnectionRegistry {
    connections: DashMap<ConnectionId, Arc<ConnectionHandle>>,
    next_id: AtomicU64,
}

impl ConnectionRegistry {
    /// Creates a new empty registry.
    ///
    /// Connection IDs start at 1 (0 is reserved as "no connection").
    #[must_use]
    pub fn new() -> Self {
        Self {
            connections: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Registers a new connection.
    pub fn register(&self, name: Option<&str>) -> Arc<ConnectionHandle> {
        let id = ConnectionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let handle = Arc::new(ConnectionHandle {
            id,
            name: name.map(str::to_string),
            connected_at: Instant::now(),
            calls: AtomicU64::new(0),
        });
        self.connections.insert(id, Arc::clone(&handle));
        tracing::info!(connection = id.0, name = ?handle.name, "client connected");
        handle
    }

    /// Removes a connection from the registry, returning its handle if found.
    /// Server state owned by the client is left alone; see
    /// [`ConnectionRegistry::disconnect`].
    pub fn remove(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.remove(&id).map(|(_, handle)| handle)
    }

    /// Removes a connection and releases its object references and pending
    /// continuations. `None` if the connection was not registered.
    pub fn disconnect(&self, id: ConnectionId, dispatcher: &Dispatcher) -> Option<DisconnectSummary> {
        let handle = self.remove(id)?;
        let summary = dispatcher.disconnect(id);
        tracing::info!(
            connection = id.0,
            calls = handle.calls(),
            released_objects = summary.released_objects,
            discarded_continuations = summary.discarded_continuations,
            "client disconnected"
        );
        Some(summary)
    }

    /// Looks up a connection by ID.
    pub fn get(&self, id: ConnectionId) -> Option<Arc<ConnectionHandle>> {
        self.connections.get(&id).map(|r| r.value().clone())
    }

    /// Returns the total number of active connections.
    #[must_use]
    pub fn count(&self) -> usize {
        self.connections.len()
    }

    /// Returns all active connections as a collected `Vec`.
    ///
    /// `DashMap` iteration yields guard types that borrow the map, so we
    /// must collect into a `Vec` to return owned values.
    #[must_use]
    pub fn connections(&self) -> Vec<Arc<ConnectionHandle>> {
        self.connections
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }

    /// Removes and returns all connections. Used during graceful shutdown.
    pub fn drain_all(&self) -> Vec<Arc<ConnectionHandle>> {
        let keys: Vec<ConnectionId> = self
            .connections
            .iter()
            .map(|entry| *entry.key())
            .collect();

        let mut handles = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some((_, handle)) = self.connections.remove(&key) {
                handles.push(handle);
            }
        }
        handles
    }
}

impl Default for ConnectionRegistry {
    fn default() -> Self {
        Self::new()
    }
}
