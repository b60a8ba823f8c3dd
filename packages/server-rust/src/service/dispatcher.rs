//! Dispatcher: resolves a call by name, coerces its arguments, runs the
//! native handler and encodes the result.
//!
//! A blocking procedure may yield instead of completing. Its state is parked
//! in the [`ContinuationManager`] and advanced one step per [`Dispatcher::tick`]
//! until it completes or fails, so the host's update cycle never waits on a
//! long-running call.

use std::any::Any;
use std::convert::Infallible;
use std::future::{ready, Ready};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use kestrel_core::{ObjectId, Services, Value};
use tower::Service;

use super::coerce::Coercer;
use super::config::ServerConfig;
use super::continuation::{Continuation, ContinuationManager};
use super::native::{Invocation, NativeValue, Progress, Step};
use super::objects::ObjectRegistry;
use super::operation::{Call, CallContext, CallError, CallId, CallOutcome};
use super::registry::{ProcedureDescriptor, ProcedureRegistry};
use super::scanner::Catalog;
use super::status::{ServerStatus, StatusSnapshot};
use crate::network::ConnectionId;

/// What a disconnect cleaned up.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DisconnectSummary {
    pub released_objects: usize,
    pub discarded_continuations: usize,
}

// ---------------------------------------------------------------------------
// Dispatcher
// ---------------------------------------------------------------------------

/// Owns everything a call touches after the catalog is scanned.
///
/// Safe to share between threads. Handlers run without any dispatcher lock
/// held; the object and continuation tables lock only around their own
/// updates.
pub struct Dispatcher {
    services: Arc<Services>,
    registry: Arc<ProcedureRegistry>,
    objects: ObjectRegistry,
    continuations: ContinuationManager,
    status: Arc<ServerStatus>,
    config: ServerConfig,
    next_call_id: AtomicU64,
}

impl Dispatcher {
    #[must_use]
    pub fn new(catalog: Catalog, config: ServerConfig) -> Self {
        Self {
            services: catalog.services,
            registry: catalog.registry,
            objects: ObjectRegistry::new(),
            continuations: ContinuationManager::new(),
            status: Arc::new(ServerStatus::new()),
            config,
            next_call_id: AtomicU64::new(1),
        }
    }

    /// Allocates a fresh call id for a call arriving on `connection`.
    pub fn context(&self, connection: ConnectionId) -> CallContext {
        CallContext {
            call_id: CallId(self.next_call_id.fetch_add(1, Ordering::Relaxed)),
            connection_id: connection,
        }
    }

    /// Runs the first step of a call.
    ///
    /// Never panics and never leaves partial state behind on failure: a
    /// failed call registers no objects beyond those its handler returned
    /// before failing, and parks no continuation.
    pub fn dispatch(&self, call: Call) -> CallOutcome {
        self.status.record_dispatch();
        let outcome = match self.start(&call) {
            Ok(outcome) => outcome,
            Err(err) => CallOutcome::Failed(err),
        };
        self.finish(call.ctx, &call.procedure, outcome)
    }

    fn start(&self, call: &Call) -> Result<CallOutcome, CallError> {
        let descriptor = self.registry.get(&call.procedure)?;
        let arguments = Coercer::new(&self.services, &self.objects).bind_arguments(
            &descriptor.qualified_name,
            &descriptor.procedure,
            &call.arguments,
        )?;
        Ok(self.step(descriptor, call.ctx, arguments, None, 0))
    }

    /// Advances a parked call by one step. `None` if no continuation is
    /// pending under `id`.
    pub fn resume(&self, id: CallId) -> Option<CallOutcome> {
        self.resume_parked(id).map(|(_, outcome)| outcome)
    }

    fn resume_parked(&self, id: CallId) -> Option<(CallContext, CallOutcome)> {
        let continuation = self.continuations.take(id)?;
        self.status.record_resume();
        let Continuation {
            descriptor,
            ctx,
            arguments,
            progress,
            steps,
        } = continuation;
        let procedure = descriptor.qualified_name.clone();
        let outcome = self.step(descriptor, ctx, arguments, Some(progress), steps);
        Some((ctx, self.finish(ctx, &procedure, outcome)))
    }

    /// Advances every pending continuation by exactly one step, oldest call
    /// first. Returns the outcome of each.
    pub fn tick(&self) -> Vec<(CallContext, CallOutcome)> {
        self.status.record_tick();
        self.continuations
            .pending_ids()
            .into_iter()
            .filter_map(|id| self.resume_parked(id))
            .collect()
    }

    fn step(
        &self,
        descriptor: Arc<ProcedureDescriptor>,
        ctx: CallContext,
        arguments: Vec<NativeValue>,
        progress: Option<Progress>,
        steps: u64,
    ) -> CallOutcome {
        let result = {
            let mut invocation = Invocation::new(
                ctx,
                &descriptor.qualified_name,
                self,
                &arguments,
                progress,
            );
            let handler = &descriptor.handler;
            panic::catch_unwind(AssertUnwindSafe(|| handler(&mut invocation)))
        };

        let step = match result {
            Ok(Ok(step)) => step,
            Ok(Err(err)) => return CallOutcome::Failed(err),
            Err(payload) => return CallOutcome::Failed(CallError::fault(panic_message(&*payload))),
        };

        match step {
            Step::Complete(value) => match self.encode_return(&descriptor, ctx, value) {
                Ok(value) => CallOutcome::Completed(value),
                Err(err) => CallOutcome::Failed(err),
            },
            Step::Continue(_) if !descriptor.is_blocking() => {
                CallOutcome::Failed(CallError::fault(format!(
                    "procedure {} is not blocking and cannot yield",
                    descriptor.qualified_name
                )))
            }
            Step::Continue(progress) => {
                let parked = self.continuations.park(Continuation {
                    descriptor,
                    ctx,
                    arguments,
                    progress,
                    steps: steps + 1,
                });
                if parked {
                    CallOutcome::Continuing(ctx.call_id)
                } else {
                    CallOutcome::Failed(CallError::fault(format!(
                        "connection {} disconnected",
                        ctx.connection_id
                    )))
                }
            }
        }
    }

    fn encode_return(
        &self,
        descriptor: &ProcedureDescriptor,
        ctx: CallContext,
        value: Option<NativeValue>,
    ) -> Result<Option<Value>, CallError> {
        let context = format!("{} return value", descriptor.qualified_name);
        match (&descriptor.procedure.return_type, value) {
            (None, None) => Ok(None),
            (None, Some(value)) => Err(CallError::mismatch(context, "no value", value.kind_name())),
            (Some(ty), value) => Coercer::new(&self.services, &self.objects)
                .encode(
                    value.unwrap_or(NativeValue::Null),
                    ty,
                    ctx.connection_id,
                    &context,
                )
                .map(Some),
        }
    }

    fn finish(&self, ctx: CallContext, procedure: &str, outcome: CallOutcome) -> CallOutcome {
        match &outcome {
            CallOutcome::Failed(err) => {
                self.status.record_failure();
                tracing::warn!(
                    call_id = ctx.call_id.0,
                    connection = ctx.connection_id.0,
                    procedure,
                    kind = ?err.kind(),
                    error = %err,
                    "call failed"
                );
            }
            other => tracing::debug!(
                call_id = ctx.call_id.0,
                connection = ctx.connection_id.0,
                procedure,
                outcome = other.label(),
                "call step finished"
            ),
        }
        outcome
    }

    /// Releases everything `connection` held alone and drops its pending
    /// continuations.
    ///
    /// The connection stays closed afterwards: a step of one of its calls
    /// that is still running cannot park again, and objects it returns are
    /// not recorded as owned by it.
    pub fn disconnect(&self, connection: ConnectionId) -> DisconnectSummary {
        let summary = DisconnectSummary {
            released_objects: self.objects.release_owner(connection),
            discarded_continuations: self.continuations.discard_connection(connection),
        };
        tracing::debug!(
            connection = connection.0,
            released_objects = summary.released_objects,
            discarded_continuations = summary.discarded_continuations,
            "connection cleaned up"
        );
        summary
    }

    /// Explicitly releases an object reference for every connection.
    pub fn release_object(&self, id: ObjectId) -> bool {
        self.objects.release(id)
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        &self.services
    }

    #[must_use]
    pub fn registry(&self) -> &ProcedureRegistry {
        &self.registry
    }

    #[must_use]
    pub fn objects(&self) -> &ObjectRegistry {
        &self.objects
    }

    #[must_use]
    pub fn continuations(&self) -> &ContinuationManager {
        &self.continuations
    }

    #[must_use]
    pub fn status(&self) -> &Arc<ServerStatus> {
        &self.status
    }

    #[must_use]
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        StatusSnapshot {
            version: self.config.version.clone(),
            health: self.status.health_state(),
            calls_dispatched: self.status.calls_dispatched(),
            calls_failed: self.status.calls_failed(),
            continuations_resumed: self.status.continuations_resumed(),
            ticks: self.status.ticks(),
            live_objects: self.objects.len() as u64,
            pending_continuations: self.continuations.len() as u64,
            services: self.services.services.len() as u64,
            procedures: self.registry.len() as u64,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "native procedure panicked".to_string()
    }
}

// ---------------------------------------------------------------------------
// DispatchService
// ---------------------------------------------------------------------------

/// `tower::Service` face of the dispatcher, the innermost layer of the call
/// pipeline.
#[derive(Clone)]
pub struct DispatchService {
    dispatcher: Arc<Dispatcher>,
}

impl DispatchService {
    #[must_use]
    pub fn new(dispatcher: Arc<Dispatcher>) -> Self {
        Self { dispatcher }
    }
}

impl Service<Call> for DispatchService {
    type Response = CallOutcome;
    type Error = Infallible;
    type Future = Ready<Result<CallOutcome, Infallible>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, call: Call) -> Self::Future {
        ready(Ok(self.dispatcher.dispatch(call)))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Barrier;

    use kestrel_core::{ErrorKind, Type};
    use tower::ServiceExt;

    use super::*;
    use crate::service::declare::{ClassDecl, ProcedureDecl, ServiceDecl};
    use crate::service::domain::catalog;
    use crate::service::domain::test_service::test_services;

    const CONN: ConnectionId = ConnectionId(1);

    fn dispatcher() -> Dispatcher {
        Dispatcher::new(catalog(test_services()).unwrap(), ServerConfig::default())
    }

    fn call(d: &Dispatcher, procedure: &str, args: Vec<Value>) -> CallOutcome {
        call_on(d, CONN, procedure, args)
    }

    fn call_on(d: &Dispatcher, conn: ConnectionId, procedure: &str, args: Vec<Value>) -> CallOutcome {
        let call = args
            .into_iter()
            .fold(Call::new(d.context(conn), procedure), Call::arg);
        d.dispatch(call)
    }

    fn value(outcome: CallOutcome) -> Value {
        match outcome {
            CallOutcome::Completed(Some(value)) => value,
            other => panic!("expected a value, got {other:?}"),
        }
    }

    fn error(outcome: CallOutcome) -> CallError {
        match outcome {
            CallOutcome::Failed(err) => err,
            other => panic!("expected a failure, got {other:?}"),
        }
    }

    /// Drives a call to completion through ticks.
    fn run(d: &Dispatcher, procedure: &str, args: Vec<Value>) -> (CallOutcome, usize) {
        let mut outcome = call(d, procedure, args);
        let mut ticks = 0;
        while let CallOutcome::Continuing(id) = outcome {
            ticks += 1;
            let results = d.tick();
            outcome = results
                .into_iter()
                .find(|(ctx, _)| ctx.call_id == id)
                .map(|(_, outcome)| outcome)
                .unwrap();
        }
        (outcome, ticks)
    }

    #[test]
    fn procedure_without_arguments_or_return() {
        let d = dispatcher();
        assert_eq!(
            call(&d, "TestService.ProcedureNoArgsNoReturn", vec![]),
            CallOutcome::Completed(None)
        );
    }

    #[test]
    fn primitive_conversions() {
        let d = dispatcher();
        assert_eq!(
            value(call(&d, "TestService.Int32ToString", vec![Value::Int32(42)])),
            Value::from("42")
        );
        assert_eq!(
            value(call(&d, "TestService.BoolToString", vec![Value::Bool(true)])),
            Value::from("True")
        );
        assert_eq!(
            value(call(&d, "TestService.StringToInt32", vec![Value::from("12345")])),
            Value::Int32(12345)
        );
        assert_eq!(
            value(call(
                &d,
                "TestService.BytesToHexString",
                vec![Value::Bytes(vec![0xde, 0xad, 0xbe, 0xef])]
            )),
            Value::from("deadbeef")
        );
    }

    #[test]
    fn property_set_then_get() {
        let d = dispatcher();
        assert_eq!(
            call(&d, "TestService.set_StringProperty", vec![Value::from("foo")]),
            CallOutcome::Completed(None)
        );
        assert_eq!(
            value(call(&d, "TestService.get_StringProperty", vec![])),
            Value::from("foo")
        );
    }

    #[test]
    fn unknown_procedure() {
        let d = dispatcher();
        let err = error(call(&d, "TestService.DoesNotExist", vec![]));
        assert_eq!(err.kind(), ErrorKind::NoSuchProcedure);
        assert_eq!(d.status().calls_failed(), 1);
    }

    #[test]
    fn missing_and_mistyped_arguments() {
        let d = dispatcher();
        let err = error(call(&d, "TestService.AddMultipleValues", vec![Value::Float32(1.0)]));
        assert_eq!(err.kind(), ErrorKind::MissingArgument);

        let err = error(call(&d, "TestService.Int32ToString", vec![Value::from("42")]));
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn defaults_fill_omitted_arguments() {
        let d = dispatcher();
        assert_eq!(
            value(call(&d, "TestService.OptionalArguments", vec![Value::from("x")])),
            Value::from("xfoobar")
        );

        let skip_middle = Call::new(d.context(CONN), "TestService.OptionalArguments")
            .arg_at(0, "a")
            .arg_at(2, "c");
        assert_eq!(value(d.dispatch(skip_middle)), Value::from("afooc"));
    }

    #[test]
    fn objects_round_trip_by_identity() {
        let d = dispatcher();
        let obj = value(call(&d, "TestService.CreateTestObject", vec![Value::from("jeb")]));
        let Value::Object(id) = obj else {
            panic!("expected an object reference");
        };
        assert_eq!(
            value(call(&d, "TestService.EchoTestObject", vec![obj.clone()])),
            obj
        );
        assert_eq!(
            value(call(&d, "TestService.TestClass_GetValue", vec![obj.clone()])),
            Value::from("value=jeb")
        );

        assert!(d.release_object(id));
        let err = error(call(&d, "TestService.TestClass_GetValue", vec![obj]));
        assert_eq!(err, CallError::InvalidReference { id });
    }

    #[test]
    fn null_object_returns_null() {
        let d = dispatcher();
        assert_eq!(
            value(call(&d, "TestService.EchoTestObject", vec![Value::Null])),
            Value::Null
        );
    }

    #[test]
    fn class_from_other_service() {
        let d = dispatcher();
        let obj = value(call(
            &d,
            "TestService2.ClassTypeFromOtherServiceAsReturn",
            vec![Value::from("bob")],
        ));
        assert_eq!(
            value(call(
                &d,
                "TestService2.ClassTypeFromOtherServiceAsParameter",
                vec![obj]
            )),
            Value::Int64(3)
        );
    }

    #[test]
    fn enumeration_values_travel_as_integers() {
        let d = dispatcher();
        assert_eq!(
            value(call(&d, "TestService.EnumReturn", vec![])),
            Value::Enum(7)
        );
        assert_eq!(
            value(call(&d, "TestService.EnumEcho", vec![Value::Enum(-2)])),
            Value::Enum(-2)
        );
        assert_eq!(
            value(call(&d, "TestService.EnumDefaultArg", vec![])),
            Value::Enum(-2)
        );
        let err = error(call(&d, "TestService.EnumEcho", vec![Value::Enum(3)]));
        assert_eq!(err.kind(), ErrorKind::TypeMismatch);
    }

    #[test]
    fn native_faults_forward_message_verbatim() {
        let d = dispatcher();
        let err = error(call(&d, "TestService.ThrowArgumentException", vec![]));
        assert_eq!(err, CallError::fault("Invalid argument"));
        let err = error(call(&d, "TestService.ThrowInvalidOperationException", vec![]));
        assert_eq!(err.to_string(), "Invalid operation");
    }

    #[test]
    fn blocking_procedure_spans_ticks() {
        let d = dispatcher();
        let (outcome, ticks) = run(&d, "TestService.BlockingProcedure", vec![Value::Int32(2)]);
        assert_eq!(outcome, CallOutcome::Completed(Some(Value::Int32(3))));
        assert_eq!(ticks, 2);

        let (outcome, ticks) = run(&d, "TestService.BlockingProcedure", vec![Value::Int32(42)]);
        assert_eq!(outcome, CallOutcome::Completed(Some(Value::Int32(903))));
        assert_eq!(ticks, 42);
        assert!(d.continuations().is_empty());
    }

    #[test]
    fn blocking_procedure_without_return() {
        let d = dispatcher();
        let (outcome, ticks) = run(
            &d,
            "TestService.BlockingProcedureNoReturn",
            vec![Value::Int32(3)],
        );
        assert_eq!(outcome, CallOutcome::Completed(None));
        assert_eq!(ticks, 3);
    }

    #[test]
    fn resume_advances_single_continuation() {
        let d = dispatcher();
        let CallOutcome::Continuing(id) =
            call(&d, "TestService.BlockingProcedure", vec![Value::Int32(1)])
        else {
            panic!("expected continuation");
        };
        assert_eq!(d.snapshot().pending_continuations, 1);
        assert_eq!(
            d.resume(id),
            Some(CallOutcome::Completed(Some(Value::Int32(1))))
        );
        assert_eq!(d.resume(id), None);
    }

    #[test]
    fn collections_are_coerced_recursively() {
        let d = dispatcher();
        let nested = Value::Map(vec![(
            Value::from("a"),
            Value::List(vec![Value::Int32(0), Value::Int32(1)]),
        )]);
        assert_eq!(
            value(call(&d, "TestService.IncrementNestedCollection", vec![nested])),
            Value::Map(vec![(
                Value::from("a"),
                Value::List(vec![Value::Int32(1), Value::Int32(2)]),
            )])
        );

        let set = Value::Set(vec![Value::Int32(1), Value::Int32(2)]);
        assert_eq!(
            value(call(&d, "TestService.IncrementSet", vec![set])),
            Value::Set(vec![Value::Int32(3), Value::Int32(2)])
        );
    }

    #[test]
    fn disconnect_releases_only_unshared_objects() {
        let d = dispatcher();
        let other = ConnectionId(2);
        let mine = value(call(&d, "TestService.CreateTestObject", vec![Value::from("a")]));
        let shared = value(call(&d, "TestService.CreateTestObject", vec![Value::from("b")]));
        call_on(&d, other, "TestService.EchoTestObject", vec![shared.clone()]);
        let CallOutcome::Continuing(_) =
            call(&d, "TestService.BlockingProcedure", vec![Value::Int32(5)])
        else {
            panic!("expected continuation");
        };

        let summary = d.disconnect(CONN);
        assert_eq!(summary.released_objects, 1);
        assert_eq!(summary.discarded_continuations, 1);

        let err = error(call_on(&d, other, "TestService.EchoTestObject", vec![mine]));
        assert_eq!(err.kind(), ErrorKind::InvalidReference);
        assert_eq!(
            value(call_on(&d, other, "TestService.EchoTestObject", vec![shared.clone()])),
            shared
        );
    }

    #[test]
    fn core_service_reports_status() {
        let d = dispatcher();
        call(&d, "TestService.CreateTestObject", vec![Value::from("a")]);
        let status = value(call(&d, "Core.GetStatus", vec![]));
        let Value::Tuple(fields) = status else {
            panic!("expected a tuple");
        };
        assert_eq!(fields[0], Value::from(env!("CARGO_PKG_VERSION")));
        assert_eq!(fields[1], Value::Int64(2));
        assert_eq!(fields[2], Value::Int64(0));
        assert_eq!(fields[3], Value::Int64(1));

        assert_eq!(
            value(call_on(&d, ConnectionId(9), "Core.GetClientId", vec![])),
            Value::Int64(9)
        );
        assert_eq!(value(call(&d, "Core.get_ObjectCount", vec![])), Value::Int32(1));
    }

    #[test]
    fn concurrent_dispatch_from_two_threads() {
        let d = dispatcher();
        std::thread::scope(|scope| {
            for conn in 1..=2 {
                let d = &d;
                scope.spawn(move || {
                    for i in 0..1000 {
                        let outcome =
                            call_on(d, ConnectionId(conn), "TestService.Int32ToString", vec![Value::Int32(i)]);
                        assert_eq!(value(outcome), Value::String(i.to_string()));
                    }
                });
            }
        });
        assert_eq!(d.status().calls_dispatched(), 2000);
        assert_eq!(d.status().calls_failed(), 0);
    }

    #[test]
    fn class_members_resolve_by_qualified_name() {
        let d = dispatcher();
        let obj = value(call(&d, "TestService.TestClass_new", vec![Value::from("jeb")]));
        assert!(matches!(obj, Value::Object(_)));
        assert_eq!(
            value(call(&d, "TestService.TestClass_GetValue", vec![obj.clone()])),
            Value::from("value=jeb")
        );
        assert_eq!(
            value(call(&d, "TestService.TestClass_IntToString", vec![obj.clone()])),
            Value::from("jeb42")
        );

        assert_eq!(
            call(&d, "TestService.TestClass_set_IntProperty", vec![obj.clone(), Value::Int32(5)]),
            CallOutcome::Completed(None)
        );
        assert_eq!(
            value(call(&d, "TestService.TestClass_get_IntProperty", vec![obj])),
            Value::Int32(5)
        );

        assert_eq!(
            value(call(&d, "TestService.TestClass_static_StaticMethod", vec![Value::from("x")])),
            Value::from("jebx")
        );
        assert_eq!(
            value(call(&d, "TestService.TestClass_static_StaticMethod", vec![])),
            Value::from("jeb")
        );
    }

    #[test]
    fn object_property_accepts_null() {
        let d = dispatcher();
        let obj = value(call(&d, "TestService.CreateTestObject", vec![Value::from("a")]));
        let other = value(call(&d, "TestService.CreateTestObject", vec![Value::from("b")]));

        call(&d, "TestService.TestClass_set_ObjectProperty", vec![obj.clone(), other.clone()]);
        assert_eq!(
            value(call(&d, "TestService.TestClass_get_ObjectProperty", vec![obj.clone()])),
            other
        );

        assert_eq!(
            call(&d, "TestService.TestClass_set_ObjectProperty", vec![obj.clone(), Value::Null]),
            CallOutcome::Completed(None)
        );
        assert_eq!(
            value(call(&d, "TestService.TestClass_get_ObjectProperty", vec![obj])),
            Value::Null
        );
    }

    #[test]
    fn object_lists_keep_existing_ids() {
        let d = dispatcher();
        let first = value(call(&d, "TestService.CreateTestObject", vec![Value::from("a")]));
        let Value::List(items) = value(call(
            &d,
            "TestService.AddToObjectList",
            vec![Value::List(vec![first.clone()]), Value::from("b")],
        )) else {
            panic!("expected a list");
        };

        assert_eq!(items.len(), 2);
        assert_eq!(items[0], first);
        let Value::Object(added) = items[1] else {
            panic!("expected an object");
        };
        assert!(d.objects().contains(added));
        assert_eq!(d.objects().len(), 2);
        assert_eq!(
            value(call(&d, "TestService.TestClass_GetValue", vec![items[1].clone()])),
            Value::from("value=b")
        );
    }

    #[test]
    fn collections_are_coerced_both_ways() {
        let d = dispatcher();
        assert_eq!(
            value(call(
                &d,
                "TestService.IncrementTuple",
                vec![Value::Tuple(vec![Value::Int32(1), Value::Int64(2)])]
            )),
            Value::Tuple(vec![Value::Int32(2), Value::Int64(3)])
        );
        assert_eq!(
            value(call(
                &d,
                "TestService.IncrementList",
                vec![Value::List(vec![Value::Int32(0), Value::Int32(9)])]
            )),
            Value::List(vec![Value::Int32(1), Value::Int32(10)])
        );
        assert_eq!(
            value(call(
                &d,
                "TestService.IncrementDictionary",
                vec![Value::Map(vec![(Value::from("a"), Value::Int32(1))])]
            )),
            Value::Map(vec![(Value::from("a"), Value::Int32(2))])
        );
    }

    fn gated_catalog(gate: &Arc<Barrier>) -> Catalog {
        let (wait_gate, make_gate) = (Arc::clone(gate), Arc::clone(gate));
        catalog(vec![ServiceDecl::new("S")
            .class(ClassDecl::new("C"))
            .procedure(ProcedureDecl::new("Wait").blocking().handler(move |inv| {
                if inv.take_progress::<()>().is_some() {
                    wait_gate.wait();
                    wait_gate.wait();
                }
                Ok(Step::continue_with(()))
            }))
            .procedure(
                ProcedureDecl::new("Make")
                    .returns(Type::class("S", "C"))
                    .handler(move |_| {
                        make_gate.wait();
                        make_gate.wait();
                        let made = Arc::new(String::from("made"));
                        Ok(Step::value(NativeValue::object(made)))
                    }),
            )])
        .unwrap()
    }

    #[test]
    fn step_running_during_disconnect_cannot_park_again() {
        let gate = Arc::new(Barrier::new(2));
        let d = Dispatcher::new(gated_catalog(&gate), ServerConfig::default());
        assert!(matches!(call(&d, "S.Wait", vec![]), CallOutcome::Continuing(_)));

        let results = std::thread::scope(|scope| {
            let ticking = scope.spawn(|| d.tick());
            gate.wait();
            assert_eq!(d.disconnect(CONN).discarded_continuations, 0);
            gate.wait();
            ticking.join().unwrap()
        });

        assert_eq!(results.len(), 1);
        assert_eq!(error(results[0].1.clone()).kind(), ErrorKind::NativeFault);
        assert!(d.continuations().is_empty());
        assert!(d.tick().is_empty());
    }

    #[test]
    fn objects_returned_after_disconnect_are_not_retained() {
        let gate = Arc::new(Barrier::new(2));
        let d = Dispatcher::new(gated_catalog(&gate), ServerConfig::default());

        let outcome = std::thread::scope(|scope| {
            let making = scope.spawn(|| call(&d, "S.Make", vec![]));
            gate.wait();
            d.disconnect(CONN);
            gate.wait();
            making.join().unwrap()
        });

        assert!(matches!(outcome, CallOutcome::Completed(Some(Value::Object(_)))));
        assert!(d.objects().is_empty());
    }

    #[tokio::test]
    async fn dispatch_service_answers_calls() {
        let d = Arc::new(dispatcher());
        let svc = DispatchService::new(Arc::clone(&d));
        let call = Call::new(d.context(CONN), "TestService.Int32ToString").arg(7);
        let outcome = svc.oneshot(call).await.unwrap();
        assert_eq!(outcome, CallOutcome::Completed(Some(Value::from("7"))));
    }
}
