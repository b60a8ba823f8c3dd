//! Metrics middleware for calls.
//!
//! Records call duration and outcome using `tracing` spans, not a full
//! metrics crate. Counters live in [`ServerStatus`](crate::service::status::ServerStatus).

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Instant;

use tower::{Layer, Service};
use tracing::{info_span, Instrument};

use crate::service::operation::{Call, CallOutcome};

// ---------------------------------------------------------------------------
// MetricsLayer
// ---------------------------------------------------------------------------

/// Tower layer that instruments calls with timing and outcome via `tracing` spans.
#[derive(Debug, Clone)]
pub struct MetricsLayer;

impl<S> Layer<S> for MetricsLayer {
    type Service = MetricsService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        MetricsService { inner }
    }
}

// ---------------------------------------------------------------------------
// MetricsService
// ---------------------------------------------------------------------------

/// Service wrapper that records call duration and outcome in tracing spans.
#[derive(Debug, Clone)]
pub struct MetricsService<S> {
    inner: S,
}

impl<S> Service<Call> for MetricsService<S>
where
    S: Service<Call, Response = CallOutcome> + Send,
    S::Error: Send + 'static,
    S::Future: Send + 'static,
{
    type Response = CallOutcome;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<CallOutcome, S::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, call: Call) -> Self::Future {
        let procedure = call.procedure.clone();
        let call_id = call.ctx.call_id.0;

        let span = info_span!(
            "call",
            procedure = %procedure,
            call_id = call_id,
            duration_ms = tracing::field::Empty,
            outcome = tracing::field::Empty,
        );

        let start = Instant::now();
        let fut = span.in_scope(|| self.inner.call(call));

        Box::pin(
            async move {
                let result = fut.await;

                let outcome = match &result {
                    Ok(outcome) => outcome.label(),
                    Err(_) => "error",
                };

                #[allow(clippy::cast_possible_truncation)]
                let duration_ms = start.elapsed().as_millis() as u64;
                tracing::Span::current().record("duration_ms", duration_ms);
                tracing::Span::current().record("outcome", outcome);

                tracing::debug!(
                    procedure = %procedure,
                    call_id = call_id,
                    duration_ms = duration_ms,
                    outcome = outcome,
                    "call complete"
                );

                result
            }
            .instrument(span),
        )
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
