//! Connection management.

pub mod connection;

pub use connection::*;
