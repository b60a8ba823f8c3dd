//! Request/response envelopes exchanged with the transport.
//!
//! The transport decodes bytes into a [`Request`] and encodes the returned
//! [`Response`]. Both use named `MsgPack` (`rmp_serde::to_vec_named()`) with
//! camelCase field names. Framing, handshakes and streams belong to the
//! transport, not to this module.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::types::Value;

/// A batch of procedure calls submitted together. Each call is answered
/// independently, in order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Request {
    pub calls: Vec<ProcedureCall>,
}

/// A single call addressed by service and procedure name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureCall {
    pub service: String,
    pub procedure: String,
    #[serde(default)]
    pub arguments: Vec<Argument>,
}

impl ProcedureCall {
    #[must_use]
    pub fn new(service: &str, procedure: &str) -> Self {
        Self {
            service: service.to_string(),
            procedure: procedure.to_string(),
            arguments: Vec::new(),
        }
    }

    /// Appends an argument at the next position, saturating at `u32::MAX`.
    #[must_use]
    pub fn arg(mut self, value: impl Into<Value>) -> Self {
        let position = self
            .arguments
            .iter()
            .map(|a| a.position.saturating_add(1))
            .max()
            .unwrap_or(0);
        self.arguments.push(Argument {
            position,
            value: value.into(),
        });
        self
    }

    /// Supplies an argument at an explicit position, leaving any gap to defaults.
    #[must_use]
    pub fn arg_at(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.arguments.push(Argument {
            position,
            value: value.into(),
        });
        self
    }

    /// `Service.Procedure`, the key used by the procedure registry.
    #[must_use]
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.service, self.procedure)
    }
}

/// A positional argument. Positions may be sparse; omitted positions fall
/// back to the parameter's default value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Argument {
    pub position: u32,
    pub value: Value,
}

/// Answers to a [`Request`], one result per call in the same order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Response {
    pub results: Vec<ProcedureResult>,
}

/// Outcome of one call: a value (absent for procedures without a return
/// type) or an error, never both.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProcedureResult {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub value: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub error: Option<Error>,
}

impl ProcedureResult {
    #[must_use]
    pub fn ok(value: Option<Value>) -> Self {
        Self { value, error: None }
    }

    #[must_use]
    pub fn err(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            value: None,
            error: Some(Error {
                kind,
                message: message.into(),
            }),
        }
    }

    #[must_use]
    pub fn is_error(&self) -> bool {
        self.error.is_some()
    }
}

/// Per-call error reported to the client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Error {
    pub kind: ErrorKind,
    /// For `NativeFault` this is the native message, unmodified.
    pub message: String,
}

/// Wire discriminant of per-call failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    NoSuchProcedure,
    MissingArgument,
    TypeMismatch,
    InvalidReference,
    NativeFault,
}

/// Failure to encode or decode an envelope.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode failed: {0}")]
    Encode(#[from] rmp_serde::encode::Error),
    #[error("decode failed: {0}")]
    Decode(#[from] rmp_serde::decode::Error),
}

/// Encodes any envelope (or the service catalog) as named `MsgPack`.
///
/// # Errors
///
/// Returns `CodecError::Encode` if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Vec<u8>, CodecError> {
    Ok(rmp_serde::to_vec_named(message)?)
}

/// Decodes an envelope previously produced by [`encode`].
///
/// # Errors
///
/// Returns `CodecError::Decode` if the bytes are not a valid encoding of `T`.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, CodecError> {
    Ok(rmp_serde::from_slice(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ObjectId;

    #[test]
    fn arg_appends_after_highest_position() {
        let call = ProcedureCall::new("TestService", "OptionalArguments")
            .arg("jeb")
            .arg_at(3, ObjectId(9))
            .arg("late");
        let positions: Vec<u32> = call.arguments.iter().map(|a| a.position).collect();
        assert_eq!(positions, vec![0, 3, 4]);
        assert_eq!(call.qualified_name(), "TestService.OptionalArguments");
    }

    #[test]
    fn request_roundtrip_keeps_nested_values() {
        let request = Request {
            calls: vec![ProcedureCall::new("TestService", "EchoNestedCollection").arg(
                Value::Map(vec![(
                    Value::Int32(1),
                    Value::List(vec![Value::from("a"), Value::from("b")]),
                )]),
            )],
        };
        let bytes = encode(&request).unwrap();
        let decoded: Request = decode(&bytes).unwrap();
        assert_eq!(decoded, request);
    }

    #[test]
    fn result_without_value_omits_field() {
        let json = serde_json::to_value(ProcedureResult::ok(None)).unwrap();
        assert_eq!(json, serde_json::json!({}));
    }

    #[test]
    fn error_kind_wire_names() {
        let result = ProcedureResult::err(ErrorKind::NoSuchProcedure, "x");
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["error"]["kind"], "NO_SUCH_PROCEDURE");
        assert!(result.is_error());
    }

    #[test]
    fn decode_rejects_garbage() {
        let err = decode::<Request>(&[0xc1]).unwrap_err();
        assert!(matches!(err, CodecError::Decode(_)));
    }

    #[test]
    fn arg_after_last_position_saturates() {
        let call = ProcedureCall::new("TestService", "OptionalArguments")
            .arg_at(u32::MAX, 1)
            .arg(2);
        let positions: Vec<u32> = call.arguments.iter().map(|a| a.position).collect();
        assert_eq!(positions, vec![u32::MAX, u32::MAX]);
    }
}
