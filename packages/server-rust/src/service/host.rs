//! Tick-driven host loop.
//!
//! Clients submit whole [`Request`]s. Calls queue up until the next tick,
//! which first advances every pending continuation by one step and then
//! dispatches queued calls through the call pipeline. A request is answered
//! once every call in it has a final result, so a blocking procedure looks
//! like one ordinary call to the client.

use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use kestrel_core::{ProcedureCall, ProcedureResult, Request, Response};
use tokio::sync::oneshot;
use tower::{Service, ServiceExt};

use super::dispatcher::{DisconnectSummary, Dispatcher};
use super::middleware::{build_call_pipeline, CallPipeline};
use super::operation::{Call, CallId, CallOutcome};
use super::worker::{BackgroundRunnable, BackgroundWorker};
use crate::network::{ConnectionId, ConnectionRegistry};

// ---------------------------------------------------------------------------
// HostTask
// ---------------------------------------------------------------------------

/// Work submitted to the host loop.
#[derive(Debug)]
pub enum HostTask {
    /// Answer `request` through `reply` once every call in it is final.
    Call {
        connection: ConnectionId,
        request: Request,
        reply: oneshot::Sender<Response>,
    },
    /// Drop the connection's queued calls and release what it owns.
    Disconnect {
        connection: ConnectionId,
        reply: oneshot::Sender<Option<DisconnectSummary>>,
    },
}

// ---------------------------------------------------------------------------
// HostLoop
// ---------------------------------------------------------------------------

struct Batch {
    connection: ConnectionId,
    results: Vec<Option<ProcedureResult>>,
    remaining: usize,
    reply: oneshot::Sender<Response>,
}

struct Queued {
    batch: u64,
    slot: usize,
    connection: ConnectionId,
    call: ProcedureCall,
}

/// [`BackgroundRunnable`] that owns the call queue and in-flight requests.
pub struct HostLoop {
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionRegistry>,
    pipeline: CallPipeline,
    queue: VecDeque<Queued>,
    batches: HashMap<u64, Batch>,
    parked: HashMap<CallId, (u64, usize)>,
    next_batch: u64,
}

impl HostLoop {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>, connections: Arc<ConnectionRegistry>) -> Self {
        Self {
            pipeline: build_call_pipeline(Arc::clone(&dispatcher)),
            dispatcher,
            connections,
            queue: VecDeque::new(),
            batches: HashMap::new(),
            parked: HashMap::new(),
            next_batch: 1,
        }
    }

    fn enqueue(&mut self, connection: ConnectionId, request: Request, reply: oneshot::Sender<Response>) {
        if request.calls.is_empty() {
            let _ = reply.send(Response::default());
            return;
        }
        let batch = self.next_batch;
        self.next_batch += 1;
        let count = request.calls.len();
        for (slot, call) in request.calls.into_iter().enumerate() {
            self.queue.push_back(Queued {
                batch,
                slot,
                connection,
                call,
            });
        }
        self.batches.insert(
            batch,
            Batch {
                connection,
                results: vec![None; count],
                remaining: count,
                reply,
            },
        );
    }

    fn drop_connection(&mut self, connection: ConnectionId) -> Option<DisconnectSummary> {
        self.queue.retain(|q| q.connection != connection);
        self.batches.retain(|_, batch| batch.connection != connection);
        let batches = &self.batches;
        self.parked.retain(|_, (batch, _)| batches.contains_key(batch));
        self.connections.disconnect(connection, &self.dispatcher)
    }

    async fn invoke(&mut self, call: Call) -> CallOutcome {
        let ready = match self.pipeline.ready().await {
            Ok(svc) => svc,
            Err(never) => match never {},
        };
        match ready.call(call).await {
            Ok(outcome) => outcome,
            Err(never) => match never {},
        }
    }

    fn settle(&mut self, batch: u64, slot: usize, outcome: CallOutcome) {
        let Some(result) = outcome.into_result() else {
            return;
        };
        let Some(pending) = self.batches.get_mut(&batch) else {
            return;
        };
        pending.results[slot] = Some(result);
        pending.remaining -= 1;
        if pending.remaining > 0 {
            return;
        }
        if let Some(done) = self.batches.remove(&batch) {
            let results = done.results.into_iter().flatten().collect();
            // The submitter may have given up waiting.
            let _ = done.reply.send(Response { results });
        }
    }

    /// Takes the calls allowed to run this tick, leaving the rest queued in
    /// their original order.
    fn take_runnable(&mut self) -> Vec<Queued> {
        let Some(limit) = self.dispatcher.config().max_calls_per_tick else {
            return self.queue.drain(..).collect();
        };
        let limit = limit.max(1);
        let mut budget: HashMap<ConnectionId, usize> = HashMap::new();
        let mut runnable = Vec::new();
        let mut deferred = VecDeque::new();
        for queued in self.queue.drain(..) {
            let used = budget.entry(queued.connection).or_insert(0);
            if *used < limit {
                *used += 1;
                runnable.push(queued);
            } else {
                deferred.push_back(queued);
            }
        }
        self.queue = deferred;
        runnable
    }
}

#[async_trait]
impl BackgroundRunnable for HostLoop {
    type Task = HostTask;

    async fn run(&mut self, task: HostTask) {
        match task {
            HostTask::Call {
                connection,
                request,
                reply,
            } => self.enqueue(connection, request, reply),
            HostTask::Disconnect { connection, reply } => {
                let summary = self.drop_connection(connection);
                let _ = reply.send(summary);
            }
        }
    }

    async fn on_tick(&mut self) {
        for (ctx, outcome) in self.dispatcher.tick() {
            if outcome.is_final() {
                if let Some((batch, slot)) = self.parked.remove(&ctx.call_id) {
                    self.settle(batch, slot, outcome);
                }
            }
        }

        for queued in self.take_runnable() {
            let ctx = self.dispatcher.context(queued.connection);
            let outcome = self.invoke(Call::from_procedure_call(ctx, queued.call)).await;
            match outcome {
                CallOutcome::Continuing(id) => {
                    self.parked.insert(id, (queued.batch, queued.slot));
                }
                outcome => self.settle(queued.batch, queued.slot, outcome),
            }
        }
    }

    async fn shutdown(&mut self) {
        tracing::info!(
            queued = self.queue.len(),
            in_flight = self.batches.len(),
            "host loop stopping"
        );
        self.queue.clear();
        self.batches.clear();
        self.parked.clear();
    }
}

// ---------------------------------------------------------------------------
// Host
// ---------------------------------------------------------------------------

/// Handle to a running host loop.
pub struct Host {
    dispatcher: Arc<Dispatcher>,
    connections: Arc<ConnectionRegistry>,
    worker: BackgroundWorker<HostLoop>,
}

impl Host {
    /// Spawns the host loop on the current tokio runtime and marks the
    /// server ready.
    #[must_use]
    pub fn start(dispatcher: Arc<Dispatcher>) -> Self {
        let connections = Arc::new(ConnectionRegistry::new());
        let config = dispatcher.config();
        let tick = Duration::from_millis(config.tick_interval_ms.max(1));
        let capacity = config.call_queue_capacity.max(1);
        let worker = BackgroundWorker::start(
            HostLoop::new(Arc::clone(&dispatcher), Arc::clone(&connections)),
            tick,
            capacity,
        );
        dispatcher.status().set_ready();
        Self {
            dispatcher,
            connections,
            worker,
        }
    }

    /// Registers a client connection.
    pub fn connect(&self, name: Option<&str>) -> ConnectionId {
        self.connections.register(name).id
    }

    /// Submits a request and waits for its response.
    ///
    /// # Errors
    ///
    /// Fails if the connection is not registered, the host has stopped, or
    /// the connection disconnected before the response was ready.
    pub async fn submit(&self, connection: ConnectionId, request: Request) -> anyhow::Result<Response> {
        let handle = self
            .connections
            .get(connection)
            .ok_or_else(|| anyhow::anyhow!("connection {connection} is not registered"))?;
        handle.record_calls(request.calls.len() as u64);

        let (reply, rx) = oneshot::channel();
        self.worker
            .submit(HostTask::Call {
                connection,
                request,
                reply,
            })
            .await?;
        rx.await
            .map_err(|_| anyhow::anyhow!("request from connection {connection} was dropped"))
    }

    /// Submits a single call.
    ///
    /// # Errors
    ///
    /// As for [`Host::submit`].
    pub async fn call(&self, connection: ConnectionId, call: ProcedureCall) -> anyhow::Result<ProcedureResult> {
        let response = self.submit(connection, Request { calls: vec![call] }).await?;
        response
            .results
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("empty response"))
    }

    /// Disconnects a client, discarding its queued calls and pending
    /// continuations and releasing the objects it alone owned.
    ///
    /// # Errors
    ///
    /// Fails if the host has stopped.
    pub async fn disconnect(&self, connection: ConnectionId) -> anyhow::Result<Option<DisconnectSummary>> {
        let (reply, rx) = oneshot::channel();
        self.worker
            .submit(HostTask::Disconnect { connection, reply })
            .await?;
        rx.await.map_err(|_| anyhow::anyhow!("host loop stopped"))
    }

    /// Stops the loop and disconnects every remaining client.
    pub async fn stop(&mut self) {
        self.worker.stop().await;
        for handle in self.connections.drain_all() {
            self.dispatcher.disconnect(handle.id);
        }
        self.dispatcher.status().set_stopped();
    }

    #[must_use]
    pub fn dispatcher(&self) -> &Arc<Dispatcher> {
        &self.dispatcher
    }

    #[must_use]
    pub fn connections(&self) -> &Arc<ConnectionRegistry> {
        &self.connections
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use kestrel_core::{ErrorKind, Value};

    use super::*;
    use crate::service::config::ServerConfig;
    use crate::service::domain::catalog;
    use crate::service::domain::test_service::test_services;
    use crate::service::status::HealthState;

    fn host_with(config: ServerConfig) -> Host {
        let dispatcher = Dispatcher::new(catalog(test_services()).unwrap(), config);
        Host::start(Arc::new(dispatcher))
    }

    fn host() -> Host {
        host_with(ServerConfig::default())
    }

    fn test_call(procedure: &str) -> ProcedureCall {
        ProcedureCall::new("TestService", procedure)
    }

    #[tokio::test(start_paused = true)]
    async fn single_call_round_trip() {
        let mut host = host();
        assert_eq!(host.dispatcher().status().health_state(), HealthState::Ready);
        let conn = host.connect(Some("test"));

        let result = host.call(conn, test_call("Int32ToString").arg(42)).await.unwrap();
        assert_eq!(result, ProcedureResult::ok(Some(Value::from("42"))));
        assert_eq!(host.connections().get(conn).unwrap().calls(), 1);

        host.stop().await;
        assert_eq!(host.dispatcher().status().health_state(), HealthState::Stopped);
    }

    #[tokio::test(start_paused = true)]
    async fn batch_answers_in_order_after_blocking_call() {
        let mut host = host();
        let conn = host.connect(None);

        let request = Request {
            calls: vec![
                test_call("BlockingProcedure").arg(2),
                test_call("Int32ToString").arg(7),
                ProcedureCall::new("TestService", "Missing"),
            ],
        };
        let response = host.submit(conn, request).await.unwrap();

        assert_eq!(response.results.len(), 3);
        assert_eq!(response.results[0].value, Some(Value::Int32(3)));
        assert_eq!(response.results[1].value, Some(Value::from("7")));
        assert_eq!(
            response.results[2].error.as_ref().map(|e| e.kind),
            Some(ErrorKind::NoSuchProcedure)
        );
        assert!(host.dispatcher().continuations().is_empty());
        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn empty_request_is_answered_immediately() {
        let mut host = host();
        let conn = host.connect(None);
        let response = host.submit(conn, Request::default()).await.unwrap();
        assert!(response.results.is_empty());
        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn per_connection_budget_spreads_calls_over_ticks() {
        let mut host = host_with(ServerConfig {
            max_calls_per_tick: Some(1),
            ..ServerConfig::default()
        });
        let conn = host.connect(None);
        let request = Request {
            calls: (0..3).map(|i| test_call("Int32ToString").arg(i)).collect(),
        };

        let response = host.submit(conn, request).await.unwrap();
        let values: Vec<Option<Value>> = response.results.into_iter().map(|r| r.value).collect();
        assert_eq!(
            values,
            vec![
                Some(Value::from("0")),
                Some(Value::from("1")),
                Some(Value::from("2"))
            ]
        );
        assert!(host.dispatcher().status().ticks() >= 3);
        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_drops_pending_request() {
        let host = Arc::new(host());
        let conn = host.connect(None);

        let pending = {
            let host = Arc::clone(&host);
            tokio::spawn(async move {
                host.call(conn, test_call("BlockingProcedure").arg(1_000)).await
            })
        };
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(host.dispatcher().continuations().len(), 1);

        let summary = host.disconnect(conn).await.unwrap().unwrap();
        assert_eq!(summary.discarded_continuations, 1);
        assert!(pending.await.unwrap().is_err());
        assert!(host.connections().get(conn).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_connection_is_rejected() {
        let mut host = host();
        let result = host.call(ConnectionId(77), test_call("ProcedureNoArgsNoReturn")).await;
        assert!(result.is_err());
        host.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn submit_after_stop_fails() {
        let mut host = host();
        let conn = host.connect(None);
        host.stop().await;
        assert!(host.connections().get(conn).is_none());
        assert!(host.submit(conn, Request::default()).await.is_err());
    }
}
