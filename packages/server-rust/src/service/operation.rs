//! Call types flowing through the dispatcher.

use std::fmt;

use kestrel_core::{Argument, ErrorKind, ObjectId, ProcedureCall, ProcedureResult, Value};

use crate::network::ConnectionId;

/// Identity of one logical call. Continuations are keyed by it, so the
/// dispatcher allocates these from a single counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CallId(pub u64);

impl fmt::Display for CallId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Context carried with every call through the pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CallContext {
    pub call_id: CallId,
    pub connection_id: ConnectionId,
}

/// A decoded call: fully-qualified procedure name plus positional arguments.
#[derive(Debug, Clone)]
pub struct Call {
    pub ctx: CallContext,
    /// `Service.Procedure`.
    pub procedure: String,
    pub arguments: Vec<Argument>,
}

impl Call {
    #[must_use]
    pub fn new(ctx: CallContext, procedure: &str) -> Self {
        Self {
            ctx,
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

    /// Supplies an argument at an explicit position.
    #[must_use]
    pub fn arg_at(mut self, position: u32, value: impl Into<Value>) -> Self {
        self.arguments.push(Argument {
            position,
            value: value.into(),
        });
        self
    }

    #[must_use]
    pub fn from_procedure_call(ctx: CallContext, call: ProcedureCall) -> Self {
        Self {
            ctx,
            procedure: call.qualified_name(),
            arguments: call.arguments,
        }
    }
}

/// Result of one dispatch cycle for a call.
#[derive(Debug, Clone, PartialEq)]
pub enum CallOutcome {
    /// The procedure finished. `None` for procedures without a return type.
    Completed(Option<Value>),
    /// A blocking procedure asked to be resumed on a later tick.
    Continuing(CallId),
    Failed(CallError),
}

impl CallOutcome {
    /// Whether this outcome is the call's final answer.
    #[must_use]
    pub fn is_final(&self) -> bool {
        !matches!(self, Self::Continuing(_))
    }

    /// Short label used in spans and logs.
    #[must_use]
    pub fn label(&self) -> &'static str {
        match self {
            Self::Completed(_) => "completed",
            Self::Continuing(_) => "continuing",
            Self::Failed(_) => "failed",
        }
    }

    /// Converts a final outcome into its wire result. `Continuing` has no
    /// wire form and yields `None`.
    #[must_use]
    pub fn into_result(self) -> Option<ProcedureResult> {
        match self {
            Self::Completed(value) => Some(ProcedureResult::ok(value)),
            Self::Continuing(_) => None,
            Self::Failed(err) => Some(ProcedureResult::err(err.kind(), err.to_string())),
        }
    }
}

/// Per-call failures. None of these disturb dispatcher or registry state.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CallError {
    #[error("procedure {name} does not exist")]
    NoSuchProcedure { name: String },
    #[error("{procedure}: no value supplied for parameter '{parameter}'")]
    MissingArgument { procedure: String, parameter: String },
    #[error("{context}: expected {expected}, got {actual}")]
    TypeMismatch {
        context: String,
        expected: String,
        actual: String,
    },
    #[error("object reference {id} is not valid")]
    InvalidReference { id: ObjectId },
    /// Raised by the native procedure itself. Displays the message verbatim.
    #[error("{message}")]
    NativeFault { message: String },
}

impl CallError {
    /// A native fault carrying `message` unchanged.
    pub fn fault(message: impl Into<String>) -> Self {
        Self::NativeFault {
            message: message.into(),
        }
    }

    pub(crate) fn mismatch(
        context: impl Into<String>,
        expected: impl fmt::Display,
        actual: impl Into<String>,
    ) -> Self {
        Self::TypeMismatch {
            context: context.into(),
            expected: expected.to_string(),
            actual: actual.into(),
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::NoSuchProcedure { .. } => ErrorKind::NoSuchProcedure,
            Self::MissingArgument { .. } => ErrorKind::MissingArgument,
            Self::TypeMismatch { .. } => ErrorKind::TypeMismatch,
            Self::InvalidReference { .. } => ErrorKind::InvalidReference,
            Self::NativeFault { .. } => ErrorKind::NativeFault,
        }
    }
}
