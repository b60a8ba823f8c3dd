//! Immutable service catalog records.
//!
//! Produced once by the server's scanner and read-only afterwards. All structs
//! serialize with camelCase field names so the catalog can be shipped to
//! clients verbatim as the answer to a "describe services" query.

use serde::{Deserialize, Serialize};

use crate::types::{Type, Value};

/// The full set of services exposed by a server, in scan order.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Services {
    pub services: Vec<Service>,
}

impl Services {
    /// Looks up a service by name.
    #[must_use]
    pub fn service(&self, name: &str) -> Option<&Service> {
        self.services.iter().find(|s| s.name == name)
    }

    /// Looks up a procedure by its fully-qualified `Service.Procedure` name.
    #[must_use]
    pub fn procedure(&self, qualified_name: &str) -> Option<&Procedure> {
        let (service, procedure) = qualified_name.split_once('.')?;
        self.service(service)?.procedure(procedure)
    }

    /// Looks up the enumeration named by an `Enumeration` type descriptor.
    #[must_use]
    pub fn enumeration_for(&self, ty: &Type) -> Option<&Enumeration> {
        match ty {
            Type::Enumeration { service, name } => self.service(service)?.enumeration(name),
            _ => None,
        }
    }

    /// Whether a `Class` or `Enumeration` descriptor names something declared
    /// by one of the scanned services. Other descriptors always resolve.
    #[must_use]
    pub fn resolves(&self, ty: &Type) -> bool {
        match ty {
            Type::Class { service, name } => self
                .service(service)
                .is_some_and(|s| s.class(name).is_some()),
            Type::Enumeration { .. } => self.enumeration_for(ty).is_some(),
            _ => true,
        }
    }
}

/// A named group of procedures, classes and enumerations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Service {
    pub name: String,
    pub procedures: Vec<Procedure>,
    pub classes: Vec<Class>,
    pub enumerations: Vec<Enumeration>,
    /// Empty when undocumented, never absent.
    pub documentation: String,
}

impl Service {
    #[must_use]
    pub fn procedure(&self, name: &str) -> Option<&Procedure> {
        self.procedures.iter().find(|p| p.name == name)
    }

    #[must_use]
    pub fn class(&self, name: &str) -> Option<&Class> {
        self.classes.iter().find(|c| c.name == name)
    }

    #[must_use]
    pub fn enumeration(&self, name: &str) -> Option<&Enumeration> {
        self.enumerations.iter().find(|e| e.name == name)
    }
}

/// A single callable operation.
///
/// The name is already derived: property accessors appear as `get_X`/`set_X`,
/// class members as `Class_Method`, class properties as `Class_get_X`,
/// static members as `Class_static_X` and constructors as `Class_new`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Procedure {
    pub name: String,
    pub parameters: Vec<Parameter>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub return_type: Option<Type>,
    pub documentation: String,
    /// The native implementation may ask to be resumed on a later tick.
    pub blocking: bool,
}

impl Procedure {
    #[must_use]
    pub fn has_return_type(&self) -> bool {
        self.return_type.is_some()
    }

    /// Number of parameters a caller must supply.
    #[must_use]
    pub fn required_parameters(&self) -> usize {
        self.parameters
            .iter()
            .filter(|p| !p.has_default_value())
            .count()
    }
}

/// A procedure parameter.
///
/// `default_value` distinguishes "no default" (`None`) from a declared
/// default of null (`Some(Value::Null)`).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type")]
    pub ty: Type,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub default_value: Option<Value>,
}

impl Parameter {
    #[must_use]
    pub fn has_default_value(&self) -> bool {
        self.default_value.is_some()
    }
}

/// A type tag for a family of server-side objects. Instances live in the
/// server's object registry, never in the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Class {
    pub name: String,
    pub documentation: String,
}

/// An enumeration and its members in declaration order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Enumeration {
    pub name: String,
    pub values: Vec<EnumerationValue>,
    pub documentation: String,
}

impl Enumeration {
    /// Finds a member by integer value. Identity on the wire is the integer,
    /// so declaration order plays no part.
    #[must_use]
    pub fn member(&self, value: i32) -> Option<&EnumerationValue> {
        self.values.iter().find(|v| v.value == value)
    }

    #[must_use]
    pub fn member_named(&self, name: &str) -> Option<&EnumerationValue> {
        self.values.iter().find(|v| v.name == name)
    }
}

/// A single enumeration member. Values need not be contiguous or ordered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EnumerationValue {
    pub name: String,
    pub value: i32,
    pub documentation: String,
}
