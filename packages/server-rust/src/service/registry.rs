use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use kestrel_core::Procedure;

use super::native::Handler;
use super::operation::CallError;

// ---------------------------------------------------------------------------
// ProcedureDescriptor
// ---------------------------------------------------------------------------

/// Executable view of one catalog procedure: its metadata plus the native
/// handler that implements it.
pub struct ProcedureDescriptor {
    /// `Service.Procedure`.
    pub qualified_name: String,
    pub service: String,
    pub procedure: Procedure,
    pub(crate) handler: Handler,
}

impl ProcedureDescriptor {
    #[must_use]
    pub fn is_blocking(&self) -> bool {
        self.procedure.blocking
    }
}

impl fmt::Debug for ProcedureDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProcedureDescriptor")
            .field("qualified_name", &self.qualified_name)
            .field("parameters", &self.procedure.parameters.len())
            .field("blocking", &self.procedure.blocking)
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// ProcedureRegistry
// ---------------------------------------------------------------------------

/// Name-indexed lookup from `Service.Procedure` to its descriptor.
///
/// Built once by the scanner and never mutated afterwards, so it is shared
/// between threads without any locking.
#[derive(Debug, Default)]
pub struct ProcedureRegistry {
    by_name: HashMap<String, Arc<ProcedureDescriptor>>,
    /// Scan order, for deterministic enumeration.
    order: Vec<String>,
}

impl ProcedureRegistry {
    /// Builds the registry. The scanner has already rejected duplicates.
    pub(crate) fn from_descriptors(descriptors: Vec<ProcedureDescriptor>) -> Self {
        let mut by_name = HashMap::with_capacity(descriptors.len());
        let mut order = Vec::with_capacity(descriptors.len());
        for descriptor in descriptors {
            order.push(descriptor.qualified_name.clone());
            by_name.insert(descriptor.qualified_name.clone(), Arc::new(descriptor));
        }
        Self { by_name, order }
    }

    /// Resolves a fully-qualified procedure name.
    ///
    /// # Errors
    ///
    /// Returns `CallError::NoSuchProcedure` for unknown names.
    pub fn get(&self, qualified_name: &str) -> Result<Arc<ProcedureDescriptor>, CallError> {
        self.by_name
            .get(qualified_name)
            .cloned()
            .ok_or_else(|| CallError::NoSuchProcedure {
                name: qualified_name.to_string(),
            })
    }

    #[must_use]
    pub fn contains(&self, qualified_name: &str) -> bool {
        self.by_name.contains_key(qualified_name)
    }

    /// Qualified names in scan order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.order.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.order.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
