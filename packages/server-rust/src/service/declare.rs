//! Declarative service descriptions fed to the scanner.
//!
//! A host describes what it exposes with these builders instead of
//! annotations. Nothing here is validated; the scanner derives names,
//! checks uniqueness and type references, and rejects the whole set on the
//! first problem.

use std::sync::Arc;

use kestrel_core::{Parameter, Type, Value};

use super::native::{Handler, Invocation, Step};
use super::operation::CallError;

/// A plain procedure, class method, static method or constructor.
#[derive(Clone)]
pub struct ProcedureDecl {
    pub(crate) name: String,
    pub(crate) parameters: Vec<Parameter>,
    pub(crate) return_type: Option<Type>,
    pub(crate) doc: Option<String>,
    pub(crate) blocking: bool,
    pub(crate) handler: Option<Handler>,
}

impl ProcedureDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            parameters: Vec::new(),
            return_type: None,
            doc: None,
            blocking: false,
            handler: None,
        }
    }

    /// Appends a required parameter.
    #[must_use]
    pub fn param(mut self, name: &str, ty: Type) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            ty,
            default_value: None,
        });
        self
    }

    /// Appends a parameter with a fixed default. `Value::Null` is a real
    /// default, distinct from having none.
    #[must_use]
    pub fn param_default(mut self, name: &str, ty: Type, default: impl Into<Value>) -> Self {
        self.parameters.push(Parameter {
            name: name.to_string(),
            ty,
            default_value: Some(default.into()),
        });
        self
    }

    #[must_use]
    pub fn returns(mut self, ty: Type) -> Self {
        self.return_type = Some(ty);
        self
    }

    #[must_use]
    pub fn doc(mut self, summary: &str) -> Self {
        self.doc = Some(summary.to_string());
        self
    }

    /// Marks the procedure as one whose handler may return [`Step::Continue`].
    #[must_use]
    pub fn blocking(mut self) -> Self {
        self.blocking = true;
        self
    }

    #[must_use]
    pub fn handler<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Step, CallError> + Send + Sync + 'static,
    {
        self.handler = Some(Arc::new(f));
        self
    }
}

/// A property, exposed as `get_Name` and/or `set_Name(value)`.
#[derive(Clone)]
pub struct PropertyDecl {
    pub(crate) name: String,
    pub(crate) ty: Type,
    pub(crate) doc: Option<String>,
    pub(crate) getter: Option<Handler>,
    pub(crate) setter: Option<Handler>,
}

impl PropertyDecl {
    #[must_use]
    pub fn new(name: &str, ty: Type) -> Self {
        Self {
            name: name.to_string(),
            ty,
            doc: None,
            getter: None,
            setter: None,
        }
    }

    #[must_use]
    pub fn doc(mut self, summary: &str) -> Self {
        self.doc = Some(summary.to_string());
        self
    }

    #[must_use]
    pub fn getter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Step, CallError> + Send + Sync + 'static,
    {
        self.getter = Some(Arc::new(f));
        self
    }

    /// The setter receives the new value as its last argument.
    #[must_use]
    pub fn setter<F>(mut self, f: F) -> Self
    where
        F: Fn(&mut Invocation<'_>) -> Result<Step, CallError> + Send + Sync + 'static,
    {
        self.setter = Some(Arc::new(f));
        self
    }
}

/// A class and its members.
///
/// Methods and properties receive the instance as an implicit first
/// parameter named `this`. Static methods and the constructor do not.
#[derive(Clone)]
pub struct ClassDecl {
    pub(crate) name: String,
    pub(crate) doc: Option<String>,
    pub(crate) constructor: Option<ProcedureDecl>,
    pub(crate) methods: Vec<ProcedureDecl>,
    pub(crate) properties: Vec<PropertyDecl>,
    pub(crate) statics: Vec<ProcedureDecl>,
}

impl ClassDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: None,
            constructor: None,
            methods: Vec::new(),
            properties: Vec::new(),
            statics: Vec::new(),
        }
    }

    #[must_use]
    pub fn doc(mut self, summary: &str) -> Self {
        self.doc = Some(summary.to_string());
        self
    }

    /// Sets the creation procedure, exposed as `Class_new`. The declaration's
    /// own name and return type are ignored.
    #[must_use]
    pub fn constructor(mut self, decl: ProcedureDecl) -> Self {
        self.constructor = Some(decl);
        self
    }

    #[must_use]
    pub fn method(mut self, decl: ProcedureDecl) -> Self {
        self.methods.push(decl);
        self
    }

    #[must_use]
    pub fn property(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    #[must_use]
    pub fn static_method(mut self, decl: ProcedureDecl) -> Self {
        self.statics.push(decl);
        self
    }
}

/// An enumeration with members in declaration order.
#[derive(Debug, Clone)]
pub struct EnumerationDecl {
    pub(crate) name: String,
    pub(crate) doc: Option<String>,
    pub(crate) values: Vec<(String, i32, Option<String>)>,
}

impl EnumerationDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: None,
            values: Vec::new(),
        }
    }

    #[must_use]
    pub fn doc(mut self, summary: &str) -> Self {
        self.doc = Some(summary.to_string());
        self
    }

    #[must_use]
    pub fn value(mut self, name: &str, value: i32) -> Self {
        self.values.push((name.to_string(), value, None));
        self
    }

    #[must_use]
    pub fn documented_value(mut self, name: &str, value: i32, summary: &str) -> Self {
        self.values
            .push((name.to_string(), value, Some(summary.to_string())));
        self
    }
}

/// Everything one service exposes.
#[derive(Clone)]
pub struct ServiceDecl {
    pub(crate) name: String,
    pub(crate) doc: Option<String>,
    pub(crate) procedures: Vec<ProcedureDecl>,
    pub(crate) properties: Vec<PropertyDecl>,
    pub(crate) classes: Vec<ClassDecl>,
    pub(crate) enumerations: Vec<EnumerationDecl>,
}

impl ServiceDecl {
    #[must_use]
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            doc: None,
            procedures: Vec::new(),
            properties: Vec::new(),
            classes: Vec::new(),
            enumerations: Vec::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn doc(mut self, summary: &str) -> Self {
        self.doc = Some(summary.to_string());
        self
    }

    #[must_use]
    pub fn procedure(mut self, decl: ProcedureDecl) -> Self {
        self.procedures.push(decl);
        self
    }

    #[must_use]
    pub fn property(mut self, decl: PropertyDecl) -> Self {
        self.properties.push(decl);
        self
    }

    #[must_use]
    pub fn class(mut self, decl: ClassDecl) -> Self {
        self.classes.push(decl);
        self
    }

    #[must_use]
    pub fn enumeration(mut self, decl: EnumerationDecl) -> Self {
        self.enumerations.push(decl);
        self
    }
}
