/// Server-level configuration for the dispatcher and host loop.
///
/// Controls the tick cadence, per-connection call budget and the submission
/// queue.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Interval between host loop ticks in milliseconds.
    pub tick_interval_ms: u64,
    /// Maximum fresh calls dispatched per connection in one tick. `None`
    /// dispatches everything queued.
    pub max_calls_per_tick: Option<usize>,
    /// Capacity of the host loop's submission channel.
    pub call_queue_capacity: usize,
    /// Version string reported by `Core.GetStatus`.
    pub version: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 20,
            max_calls_per_tick: None,
            call_queue_capacity: 256,
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}
