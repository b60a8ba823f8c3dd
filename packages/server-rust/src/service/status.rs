//! Server health state and dispatch counters.
//!
//! Uses `ArcSwap` for lock-free health state transitions and atomic counters
//! for the figures reported by `Core.GetStatus` and the status snapshot.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use arc_swap::ArcSwap;
use serde::Serialize;

/// Server health state.
///
/// State machine: Starting -> Ready -> Stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthState {
    /// Catalog scanned, host loop not yet ticking.
    Starting,
    /// Host loop is running and accepting calls.
    Ready,
    /// Host loop has shut down.
    Stopped,
}

/// Point-in-time view of the server, serialisable for status displays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusSnapshot {
    pub version: String,
    pub health: HealthState,
    pub calls_dispatched: u64,
    pub calls_failed: u64,
    pub continuations_resumed: u64,
    pub ticks: u64,
    pub live_objects: u64,
    pub pending_continuations: u64,
    pub services: u64,
    pub procedures: u64,
}

/// Live health state plus monotonically increasing counters.
#[derive(Debug)]
pub struct ServerStatus {
    health_state: ArcSwap<HealthState>,
    calls_dispatched: AtomicU64,
    calls_failed: AtomicU64,
    continuations_resumed: AtomicU64,
    ticks: AtomicU64,
}

impl ServerStatus {
    /// Creates a status in the `Starting` state with zeroed counters.
    #[must_use]
    pub fn new() -> Self {
        Self {
            health_state: ArcSwap::from_pointee(HealthState::Starting),
            calls_dispatched: AtomicU64::new(0),
            calls_failed: AtomicU64::new(0),
            continuations_resumed: AtomicU64::new(0),
            ticks: AtomicU64::new(0),
        }
    }

    pub fn set_ready(&self) {
        self.health_state.store(Arc::new(HealthState::Ready));
        tracing::info!("server ready");
    }

    pub fn set_stopped(&self) {
        self.health_state.store(Arc::new(HealthState::Stopped));
        tracing::info!("server stopped");
    }

    #[must_use]
    pub fn health_state(&self) -> HealthState {
        **self.health_state.load()
    }

    /// Counts a fresh call that reached the dispatcher.
    pub fn record_dispatch(&self) {
        self.calls_dispatched.fetch_add(1, Ordering::Relaxed);
    }

    /// Counts a call whose final outcome was an error.
    pub fn record_failure(&self) {
        self.calls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_resume(&self) {
        self.continuations_resumed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    #[must_use]
    pub fn calls_dispatched(&self) -> u64 {
        self.calls_dispatched.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn calls_failed(&self) -> u64 {
        self.calls_failed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn continuations_resumed(&self) -> u64 {
        self.continuations_resumed.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }
}

impl Default for ServerStatus {
    fn default() -> Self {
        Self::new()
    }
}
