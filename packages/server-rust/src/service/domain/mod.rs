//! Built-in services.
//!
//! `Core` is always scanned first and answers status and introspection
//! queries. The fixture services in [`test_service`] exercise every
//! declaration form and back the test suite and the test server binary.

pub mod test_service;

use kestrel_core::{messages, Type};

use super::declare::{ProcedureDecl, PropertyDecl, ServiceDecl};
use super::native::{NativeValue, Step};
use super::operation::CallError;
use super::scanner::{scan, Catalog, ScanError};

/// Name of the built-in service.
pub const CORE_SERVICE: &str = "Core";

fn int64(count: u64) -> NativeValue {
    NativeValue::Int64(i64::try_from(count).unwrap_or(i64::MAX))
}

/// Declares the `Core` service.
#[must_use]
pub fn core_service() -> ServiceDecl {
    ServiceDecl::new(CORE_SERVICE)
        .doc("Server status and service introspection.")
        .procedure(
            ProcedureDecl::new("GetStatus")
                .doc("Version, calls dispatched, calls failed, live objects and pending continuations.")
                .returns(Type::tuple(vec![
                    Type::String,
                    Type::Int64,
                    Type::Int64,
                    Type::Int64,
                    Type::Int64,
                ]))
                .handler(|inv| {
                    let snapshot = inv.snapshot();
                    Ok(Step::value(NativeValue::Tuple(vec![
                        NativeValue::String(snapshot.version),
                        int64(snapshot.calls_dispatched),
                        int64(snapshot.calls_failed),
                        int64(snapshot.live_objects),
                        int64(snapshot.pending_continuations),
                    ])))
                }),
        )
        .procedure(
            ProcedureDecl::new("GetServices")
                .doc("The service catalog, encoded as named MsgPack.")
                .returns(Type::Bytes)
                .handler(|inv| {
                    let bytes = messages::encode(inv.services())
                        .map_err(|err| CallError::fault(err.to_string()))?;
                    Ok(Step::value(NativeValue::Bytes(bytes)))
                }),
        )
        .procedure(
            ProcedureDecl::new("GetClientId")
                .doc("Identifier of the calling connection.")
                .returns(Type::Int64)
                .handler(|inv| Ok(Step::value(int64(inv.ctx().connection_id.0)))),
        )
        .property(
            PropertyDecl::new("ObjectCount", Type::Int32)
                .doc("Number of live object references.")
                .getter(|inv| {
                    let live = inv.snapshot().live_objects;
                    Ok(Step::value(i32::try_from(live).unwrap_or(i32::MAX)))
                }),
        )
}

/// Scans `Core` followed by `services`.
///
/// # Errors
///
/// Any [`ScanError`], including a user service named `Core`.
pub fn catalog(services: Vec<ServiceDecl>) -> Result<Catalog, ScanError> {
    let mut decls = Vec::with_capacity(services.len() + 1);
    decls.push(core_service());
    decls.extend(services);
    scan(&decls)
}
