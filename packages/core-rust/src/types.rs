use std::fmt;

use serde::{Deserialize, Serialize};

/// Opaque identity of a server-side object handed to a client.
///
/// Identifiers are allocated by the server's object registry and are never
/// reused while an entry holding them is live. `0` is never allocated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(pub u64);

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Type descriptor for parameters and return values.
///
/// The closed lattice of wire-representable types. Collection types nest
/// recursively (e.g. `Map(String, List(Int32))`). `Class` and `Enumeration`
/// name their declaring service so a procedure may reference a type declared
/// by another service.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Type {
    Bool,
    Int32,
    Int64,
    Float32,
    Float64,
    String,
    Bytes,
    List(Box<Type>),
    Map(Box<Type>, Box<Type>),
    Set(Box<Type>),
    Tuple(Vec<Type>),
    Enumeration { service: String, name: String },
    Class { service: String, name: String },
    Optional(Box<Type>),
}

impl Type {
    #[must_use]
    pub fn list(element: Type) -> Self {
        Self::List(Box::new(element))
    }

    #[must_use]
    pub fn map(key: Type, value: Type) -> Self {
        Self::Map(Box::new(key), Box::new(value))
    }

    #[must_use]
    pub fn set(element: Type) -> Self {
        Self::Set(Box::new(element))
    }

    #[must_use]
    pub fn tuple(elements: Vec<Type>) -> Self {
        Self::Tuple(elements)
    }

    #[must_use]
    pub fn optional(inner: Type) -> Self {
        Self::Optional(Box::new(inner))
    }

    #[must_use]
    pub fn class(service: &str, name: &str) -> Self {
        Self::Class {
            service: service.to_string(),
            name: name.to_string(),
        }
    }

    #[must_use]
    pub fn enumeration(service: &str, name: &str) -> Self {
        Self::Enumeration {
            service: service.to_string(),
            name: name.to_string(),
        }
    }

    /// Calls `f` for every `Class` and `Enumeration` descriptor reachable from
    /// this type, including those nested inside collections.
    pub fn for_each_named(&self, f: &mut impl FnMut(&Type)) {
        match self {
            Self::List(inner) | Self::Set(inner) | Self::Optional(inner) => {
                inner.for_each_named(f);
            }
            Self::Map(key, value) => {
                key.for_each_named(f);
                value.for_each_named(f);
            }
            Self::Tuple(elements) => {
                for element in elements {
                    element.for_each_named(f);
                }
            }
            Self::Enumeration { .. } | Self::Class { .. } => f(self),
            _ => {}
        }
    }
}

impl fmt::Display for Type {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool => write!(f, "Bool"),
            Self::Int32 => write!(f, "Int32"),
            Self::Int64 => write!(f, "Int64"),
            Self::Float32 => write!(f, "Float32"),
            Self::Float64 => write!(f, "Float64"),
            Self::String => write!(f, "String"),
            Self::Bytes => write!(f, "Bytes"),
            Self::List(inner) => write!(f, "List({inner})"),
            Self::Map(key, value) => write!(f, "Map({key},{value})"),
            Self::Set(inner) => write!(f, "Set({inner})"),
            Self::Tuple(elements) => {
                write!(f, "Tuple(")?;
                for (i, element) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, ",")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, ")")
            }
            Self::Enumeration { service, name } => write!(f, "Enumeration({service}.{name})"),
            Self::Class { service, name } => write!(f, "Class({service}.{name})"),
            Self::Optional(inner) => write!(f, "Optional({inner})"),
        }
    }
}

/// A wire-format value.
///
/// Mirrors the [`Type`] lattice. Enumeration values travel as their integer
/// value, never by name; class instances travel as an [`ObjectId`].
///
/// Equality is structural for lists and tuples. `Map` and `Set` keep
/// insertion order for encoding but compare by contents, so two maps holding
/// the same entries in a different order are equal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Value {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(#[serde(with = "serde_bytes")] Vec<u8>),
    List(Vec<Value>),
    Map(Vec<(Value, Value)>),
    Set(Vec<Value>),
    Tuple(Vec<Value>),
    Enum(i32),
    Object(ObjectId),
}

impl Value {
    /// Short name of the value's shape, used in mismatch diagnostics.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Null => "Null",
            Self::Bool(_) => "Bool",
            Self::Int32(_) => "Int32",
            Self::Int64(_) => "Int64",
            Self::Float32(_) => "Float32",
            Self::Float64(_) => "Float64",
            Self::String(_) => "String",
            Self::Bytes(_) => "Bytes",
            Self::List(_) => "List",
            Self::Map(_) => "Map",
            Self::Set(_) => "Set",
            Self::Tuple(_) => "Tuple",
            Self::Enum(_) => "Enumeration",
            Self::Object(_) => "Class",
        }
    }

    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// Structural check of this value against a type descriptor.
    ///
    /// Object identities and enumeration membership are not checked here:
    /// any `Object` conforms to any `Class`, any `Enum` to any `Enumeration`.
    /// `Null` conforms only to `Optional`.
    #[must_use]
    pub fn conforms_to(&self, ty: &Type) -> bool {
        match (self, ty) {
            (Self::Null, Type::Optional(_)) => true,
            (_, Type::Optional(inner)) => self.conforms_to(inner),
            (Self::Bool(_), Type::Bool)
            | (Self::Int32(_), Type::Int32)
            | (Self::Int64(_), Type::Int64)
            | (Self::Float32(_), Type::Float32)
            | (Self::Float64(_), Type::Float64)
            | (Self::String(_), Type::String)
            | (Self::Bytes(_), Type::Bytes)
            | (Self::Enum(_), Type::Enumeration { .. })
            | (Self::Object(_), Type::Class { .. }) => true,
            (Self::List(items), Type::List(element)) | (Self::Set(items), Type::Set(element)) => {
                items.iter().all(|item| item.conforms_to(element))
            }
            (Self::Map(entries), Type::Map(key, value)) => entries
                .iter()
                .all(|(k, v)| k.conforms_to(key) && v.conforms_to(value)),
            (Self::Tuple(items), Type::Tuple(elements)) => {
                items.len() == elements.len()
                    && items.iter().zip(elements).all(|(item, ty)| item.conforms_to(ty))
            }
            _ => false,
        }
    }
}

/// Multiset comparison: every element of `a` is matched by a distinct element of `b`.
fn unordered_eq<T>(a: &[T], b: &[T], eq: impl Fn(&T, &T) -> bool) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut used = vec![false; b.len()];
    a.iter().all(|x| {
        let found = b
            .iter()
            .enumerate()
            .find(|(i, y)| !used[*i] && eq(x, *y))
            .map(|(i, _)| i);
        match found {
            Some(i) => {
                used[i] = true;
                true
            }
            None => false,
        }
    })
}

impl PartialEq for Value {
    #[allow(clippy::float_cmp)]
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int32(a), Self::Int32(b)) | (Self::Enum(a), Self::Enum(b)) => a == b,
            (Self::Int64(a), Self::Int64(b)) => a == b,
            (Self::Float32(a), Self::Float32(b)) => a == b,
            (Self::Float64(a), Self::Float64(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::List(a), Self::List(b)) | (Self::Tuple(a), Self::Tuple(b)) => a == b,
            (Self::Set(a), Self::Set(b)) => unordered_eq(a, b, |x, y| x == y),
            (Self::Map(a), Self::Map(b)) => {
                unordered_eq(a, b, |(ka, va), (kb, vb)| ka == kb && va == vb)
            }
            (Self::Object(a), Self::Object(b)) => a == b,
            _ => false,
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for Value {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<ObjectId> for Value {
    fn from(v: ObjectId) -> Self {
        Self::Object(v)
    }
}
