//! Kestrel Core: value model, service catalog records, and request/response envelopes.

pub mod catalog;
pub mod messages;
pub mod types;

pub use catalog::{Class, Enumeration, EnumerationValue, Parameter, Procedure, Service, Services};
pub use messages::{
    Argument, CodecError, Error, ErrorKind, ProcedureCall, ProcedureResult, Request, Response,
};
pub use types::{ObjectId, Type, Value};
