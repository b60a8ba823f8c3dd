//! Pipeline composition: wraps the dispatcher in the middleware layers.

use std::sync::Arc;

use tower::ServiceBuilder;

use super::metrics::{MetricsLayer, MetricsService};
use crate::service::dispatcher::{DispatchService, Dispatcher};

/// The assembled call pipeline.
pub type CallPipeline = MetricsService<DispatchService>;

/// Build the call pipeline by wrapping a [`DispatchService`] with middleware layers.
///
/// Layer order (outermost to innermost):
/// 1. `MetricsLayer` -- record timing and outcome
/// 2. `DispatchService` -- resolve, coerce, invoke
///
/// Timeouts and load shedding belong to the transport; the pipeline never
/// rejects a call itself.
#[must_use]
pub fn build_call_pipeline(dispatcher: Arc<Dispatcher>) -> CallPipeline {
    ServiceBuilder::new()
        .layer(MetricsLayer)
        .service(DispatchService::new(dispatcher))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
