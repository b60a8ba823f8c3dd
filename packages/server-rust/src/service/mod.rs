//! Service scanning and call execution.
//!
//! This module implements the call pipeline:
//!
//! 1. **Declarations** (`declare`): builders describing services, classes and enumerations
//! 2. **Scanning** (`scanner`): declarations -> immutable catalog + procedure registry
//! 3. **Dispatch** (`dispatcher`): resolve, coerce, invoke, encode
//! 4. **Continuations** (`continuation`): blocking procedures parked between ticks
//! 5. **Objects** (`objects`): opaque ids for server-side instances
//! 6. **Middleware** (`middleware`): Tower layers around the dispatcher
//! 7. **Host loop** (`host`, `worker`): tick-driven execution of queued requests

mod coerce;
pub mod config;
pub mod continuation;
pub mod declare;
pub mod dispatcher;
pub mod domain;
pub mod host;
pub mod middleware;
pub mod native;
pub mod objects;
pub mod operation;
pub mod registry;
pub mod scanner;
pub mod status;
pub mod worker;

// Re-export key types for convenient access.
pub use config::ServerConfig;
pub use declare::{ClassDecl, EnumerationDecl, ProcedureDecl, PropertyDecl, ServiceDecl};
pub use dispatcher::{DisconnectSummary, DispatchService, Dispatcher};
pub use host::{Host, HostLoop, HostTask};
pub use native::{Instance, Invocation, NativeValue, Step};
pub use operation::{Call, CallContext, CallError, CallId, CallOutcome};
pub use scanner::{scan, Catalog, ScanError};
pub use status::{HealthState, ServerStatus, StatusSnapshot};
pub use worker::{BackgroundRunnable, BackgroundWorker};
