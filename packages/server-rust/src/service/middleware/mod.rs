//! Tower middleware layers for the call pipeline.
//!
//! - [`metrics`]: Call timing and outcome via `tracing` spans
//! - [`pipeline`]: Composes the layers over the dispatcher

pub mod metrics;
pub mod pipeline;

pub use metrics::MetricsLayer;
pub use pipeline::{build_call_pipeline, CallPipeline};
