//! Conversion between wire values and native values, driven by the declared
//! type of each parameter or return value.

use kestrel_core::{Argument, Procedure, Services, Type, Value};

use super::native::NativeValue;
use super::objects::ObjectRegistry;
use super::operation::CallError;
use crate::network::ConnectionId;

/// Borrowed view of the two tables coercion needs: the catalog for
/// enumeration membership and the object registry for references.
pub(crate) struct Coercer<'a> {
    services: &'a Services,
    objects: &'a ObjectRegistry,
}

impl<'a> Coercer<'a> {
    pub(crate) fn new(services: &'a Services, objects: &'a ObjectRegistry) -> Self {
        Self { services, objects }
    }

    /// Wire to native. `Null` is accepted only where `ty` is `Optional`.
    pub(crate) fn decode(
        &self,
        value: &Value,
        ty: &Type,
        context: &str,
    ) -> Result<NativeValue, CallError> {
        let decoded = match (value, ty) {
            (Value::Null, Type::Optional(_)) => NativeValue::Null,
            (_, Type::Optional(inner)) => return self.decode(value, inner, context),
            (Value::Bool(v), Type::Bool) => NativeValue::Bool(*v),
            (Value::Int32(v), Type::Int32) => NativeValue::Int32(*v),
            (Value::Int64(v), Type::Int64) => NativeValue::Int64(*v),
            (Value::Float32(v), Type::Float32) => NativeValue::Float32(*v),
            (Value::Float64(v), Type::Float64) => NativeValue::Float64(*v),
            (Value::String(v), Type::String) => NativeValue::String(v.clone()),
            (Value::Bytes(v), Type::Bytes) => NativeValue::Bytes(v.clone()),
            (Value::List(items), Type::List(element)) => {
                NativeValue::List(self.decode_all(items, element, context)?)
            }
            (Value::Set(items), Type::Set(element)) => {
                NativeValue::Set(self.decode_all(items, element, context)?)
            }
            (Value::Map(entries), Type::Map(key, value)) => NativeValue::Map(
                entries
                    .iter()
                    .map(|(k, v)| {
                        Ok((
                            self.decode(k, key, context)?,
                            self.decode(v, value, context)?,
                        ))
                    })
                    .collect::<Result<_, CallError>>()?,
            ),
            (Value::Tuple(items), Type::Tuple(elements)) if items.len() == elements.len() => {
                NativeValue::Tuple(
                    items
                        .iter()
                        .zip(elements)
                        .map(|(item, ty)| self.decode(item, ty, context))
                        .collect::<Result<_, CallError>>()?,
                )
            }
            (Value::Enum(v), Type::Enumeration { .. }) => {
                self.check_member(*v, ty, context)?;
                NativeValue::Enum(*v)
            }
            (Value::Object(id), Type::Class { service, name }) => NativeValue::Object(
                self.objects
                    .resolve_as(*id, &format!("{service}.{name}"), context)?,
            ),
            _ => return Err(CallError::mismatch(context, ty, describe(value))),
        };
        Ok(decoded)
    }

    fn decode_all(
        &self,
        items: &[Value],
        element: &Type,
        context: &str,
    ) -> Result<Vec<NativeValue>, CallError> {
        items
            .iter()
            .map(|item| self.decode(item, element, context))
            .collect()
    }

    /// Native to wire. Instances are registered on behalf of `owner` and
    /// travel as their id; `Null` is accepted for `Optional` and `Class`.
    pub(crate) fn encode(
        &self,
        value: NativeValue,
        ty: &Type,
        owner: ConnectionId,
        context: &str,
    ) -> Result<Value, CallError> {
        let encoded = match (value, ty) {
            (NativeValue::Null, Type::Optional(_) | Type::Class { .. }) => Value::Null,
            (value, Type::Optional(inner)) => return self.encode(value, inner, owner, context),
            (NativeValue::Bool(v), Type::Bool) => Value::Bool(v),
            (NativeValue::Int32(v), Type::Int32) => Value::Int32(v),
            (NativeValue::Int64(v), Type::Int64) => Value::Int64(v),
            (NativeValue::Float32(v), Type::Float32) => Value::Float32(v),
            (NativeValue::Float64(v), Type::Float64) => Value::Float64(v),
            (NativeValue::String(v), Type::String) => Value::String(v),
            (NativeValue::Bytes(v), Type::Bytes) => Value::Bytes(v),
            (NativeValue::List(items), Type::List(element)) => {
                Value::List(self.encode_all(items, element, owner, context)?)
            }
            (NativeValue::Set(items), Type::Set(element)) => {
                Value::Set(self.encode_all(items, element, owner, context)?)
            }
            (NativeValue::Map(entries), Type::Map(key, value)) => Value::Map(
                entries
                    .into_iter()
                    .map(|(k, v)| {
                        Ok((
                            self.encode(k, key, owner, context)?,
                            self.encode(v, value, owner, context)?,
                        ))
                    })
                    .collect::<Result<_, CallError>>()?,
            ),
            (NativeValue::Tuple(items), Type::Tuple(elements)) if items.len() == elements.len() => {
                Value::Tuple(
                    items
                        .into_iter()
                        .zip(elements)
                        .map(|(item, ty)| self.encode(item, ty, owner, context))
                        .collect::<Result<_, CallError>>()?,
                )
            }
            (NativeValue::Enum(v), Type::Enumeration { .. }) => {
                self.check_member(v, ty, context)?;
                Value::Enum(v)
            }
            (NativeValue::Object(instance), Type::Class { service, name }) => {
                let reference = self
                    .objects
                    .register(&instance, &format!("{service}.{name}"), owner);
                Value::Object(reference.id)
            }
            (value, _) => return Err(CallError::mismatch(context, ty, value.kind_name())),
        };
        Ok(encoded)
    }

    fn encode_all(
        &self,
        items: Vec<NativeValue>,
        element: &Type,
        owner: ConnectionId,
        context: &str,
    ) -> Result<Vec<Value>, CallError> {
        items
            .into_iter()
            .map(|item| self.encode(item, element, owner, context))
            .collect()
    }

    fn check_member(&self, value: i32, ty: &Type, context: &str) -> Result<(), CallError> {
        let known = self
            .services
            .enumeration_for(ty)
            .is_some_and(|e| e.member(value).is_some());
        if known {
            Ok(())
        } else {
            Err(CallError::mismatch(
                context,
                ty,
                format!("undeclared value {value}"),
            ))
        }
    }

    /// Matches positional arguments to `procedure`'s parameters.
    ///
    /// For each parameter: a supplied non-null value is decoded; a supplied
    /// `Null` is kept for `Optional` types; otherwise the declared default
    /// fills the slot, and without one the call fails with
    /// `MissingArgument`. A default of `Null` is kept as `Null` whatever the
    /// parameter type.
    pub(crate) fn bind_arguments(
        &self,
        qualified_name: &str,
        procedure: &Procedure,
        arguments: &[Argument],
    ) -> Result<Vec<NativeValue>, CallError> {
        let parameters = &procedure.parameters;
        let mut slots: Vec<Option<&Value>> = vec![None; parameters.len()];
        for argument in arguments {
            let position = argument.position as usize;
            let Some(slot) = slots.get_mut(position) else {
                return Err(CallError::mismatch(
                    qualified_name,
                    format!("at most {} arguments", parameters.len()),
                    format!("an argument at position {position}"),
                ));
            };
            if slot.is_some() {
                return Err(CallError::mismatch(
                    qualified_name,
                    format!("one value at position {position}"),
                    "several",
                ));
            }
            *slot = Some(&argument.value);
        }

        parameters
            .iter()
            .zip(slots)
            .map(|(parameter, supplied)| {
                let context = format!("{qualified_name} argument '{}'", parameter.name);
                match (supplied, &parameter.ty) {
                    (Some(value), _) if !value.is_null() => {
                        self.decode(value, &parameter.ty, &context)
                    }
                    (Some(_), Type::Optional(_)) => Ok(NativeValue::Null),
                    _ => match &parameter.default_value {
                        Some(Value::Null) => Ok(NativeValue::Null),
                        Some(default) => self.decode(default, &parameter.ty, &context),
                        None => Err(CallError::MissingArgument {
                            procedure: qualified_name.to_string(),
                            parameter: parameter.name.clone(),
                        }),
                    },
                }
            })
            .collect()
    }
}

/// Wire shape for mismatch messages. Collections show their first element.
fn describe(value: &Value) -> String {
    match value {
        Value::List(items) | Value::Set(items) | Value::Tuple(items) => match items.first() {
            Some(first) => format!("{}({}, ..)", value.kind_name(), describe(first)),
            None => format!("{}()", value.kind_name()),
        },
        other => other.kind_name().to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_core::{Enumeration, EnumerationValue, ObjectId, Parameter, Service};

    use super::*;

    const OWNER: ConnectionId = ConnectionId(1);

    fn catalog() -> Services {
        let member = |name: &str, value| EnumerationValue {
            name: name.to_string(),
            value,
            documentation: String::new(),
        };
        Services {
            services: vec![Service {
                name: "S".to_string(),
                procedures: Vec::new(),
                classes: Vec::new(),
                enumerations: vec![Enumeration {
                    name: "E".to_string(),
                    values: vec![member("A", 0), member("B", 7), member("C", -2)],
                    documentation: String::new(),
                }],
                documentation: String::new(),
            }],
        }
    }

    fn procedure(parameters: Vec<Parameter>) -> Procedure {
        Procedure {
            name: "P".to_string(),
            parameters,
            return_type: None,
            documentation: String::new(),
            blocking: false,
        }
    }

    fn param(name: &str, ty: Type, default_value: Option<Value>) -> Parameter {
        Parameter {
            name: name.to_string(),
            ty,
            default_value,
        }
    }

    fn positional(values: Vec<Value>) -> Vec<Argument> {
        (0_u32..)
            .zip(values)
            .map(|(position, value)| Argument { position, value })
            .collect()
    }

    #[test]
    fn decode_nested_collection() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let ty = Type::map(Type::String, Type::list(Type::Int32));
        let value = Value::Map(vec![(
            Value::from("a"),
            Value::List(vec![Value::Int32(1), Value::Int32(2)]),
        )]);
        let decoded = coercer.decode(&value, &ty, "ctx").unwrap();
        let NativeValue::Map(entries) = decoded else {
            panic!("expected a map");
        };
        assert!(matches!(&entries[0].1, NativeValue::List(items) if items.len() == 2));
    }

    #[test]
    fn decode_rejects_wrong_primitive() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let err = coercer
            .decode(&Value::Int64(3), &Type::Int32, "S.P argument 'x'")
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "S.P argument 'x': expected Int32, got Int64"
        );
    }

    #[test]
    fn decode_enum_requires_declared_member() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let ty = Type::enumeration("S", "E");
        assert!(matches!(
            coercer.decode(&Value::Enum(-2), &ty, "ctx").unwrap(),
            NativeValue::Enum(-2)
        ));
        let err = coercer.decode(&Value::Enum(1), &ty, "ctx").unwrap_err();
        assert!(matches!(err, CallError::TypeMismatch { .. }));
    }

    #[test]
    fn encode_registers_instances_once() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let ty = Type::class("S", "C");
        let instance: Arc<String> = Arc::new("obj".to_string());

        let first = coercer
            .encode(NativeValue::object(Arc::clone(&instance)), &ty, OWNER, "ctx")
            .unwrap();
        let second = coercer
            .encode(NativeValue::object(instance), &ty, OWNER, "ctx")
            .unwrap();
        assert_eq!(first, Value::Object(ObjectId(1)));
        assert_eq!(first, second);
        assert_eq!(objects.len(), 1);

        let back = coercer.decode(&first, &ty, "ctx").unwrap();
        assert_eq!(*back.downcast::<String>().unwrap(), "obj");
    }

    #[test]
    fn encode_null_allowed_for_class_and_optional_only() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        assert_eq!(
            coercer
                .encode(NativeValue::Null, &Type::class("S", "C"), OWNER, "ctx")
                .unwrap(),
            Value::Null
        );
        assert_eq!(
            coercer
                .encode(NativeValue::Null, &Type::optional(Type::Int32), OWNER, "ctx")
                .unwrap(),
            Value::Null
        );
        assert!(coercer
            .encode(NativeValue::Null, &Type::String, OWNER, "ctx")
            .is_err());
    }

    #[test]
    fn bind_uses_defaults_for_absent_and_null_arguments() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let proc = procedure(vec![
            param("x", Type::String, None),
            param("y", Type::String, Some(Value::from("foo"))),
            param("z", Type::String, Some(Value::from("bar"))),
        ]);

        let args = vec![
            Argument {
                position: 0,
                value: Value::from("a"),
            },
            Argument {
                position: 1,
                value: Value::Null,
            },
        ];
        let bound = coercer.bind_arguments("S.P", &proc, &args).unwrap();
        let strings: Vec<String> = bound
            .into_iter()
            .map(|v| match v {
                NativeValue::String(s) => s,
                other => panic!("unexpected {other:?}"),
            })
            .collect();
        assert_eq!(strings, vec!["a", "foo", "bar"]);
    }

    #[test]
    fn bind_missing_required_argument() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let proc = procedure(vec![
            param("x", Type::Int32, None),
            param("y", Type::Int32, None),
        ]);
        let err = coercer
            .bind_arguments("S.P", &proc, &positional(vec![Value::Int32(1)]))
            .unwrap_err();
        assert_eq!(
            err,
            CallError::MissingArgument {
                procedure: "S.P".to_string(),
                parameter: "y".to_string(),
            }
        );
    }

    #[test]
    fn bind_null_for_required_non_optional_is_missing() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let proc = procedure(vec![param("x", Type::String, None)]);
        let err = coercer
            .bind_arguments("S.P", &proc, &positional(vec![Value::Null]))
            .unwrap_err();
        assert!(matches!(err, CallError::MissingArgument { .. }));

        let optional = procedure(vec![param("x", Type::optional(Type::String), None)]);
        let bound = coercer
            .bind_arguments("S.P", &optional, &positional(vec![Value::Null]))
            .unwrap();
        assert!(matches!(bound[0], NativeValue::Null));
    }

    #[test]
    fn bind_null_default_for_class_parameter() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let proc = procedure(vec![param("obj", Type::class("S", "C"), Some(Value::Null))]);
        let bound = coercer.bind_arguments("S.P", &proc, &[]).unwrap();
        assert!(matches!(bound[0], NativeValue::Null));
    }

    #[test]
    fn bind_rejects_out_of_range_and_duplicate_positions() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let proc = procedure(vec![param("x", Type::Int32, None)]);

        let too_many = positional(vec![Value::Int32(1), Value::Int32(2)]);
        assert!(matches!(
            coercer.bind_arguments("S.P", &proc, &too_many),
            Err(CallError::TypeMismatch { .. })
        ));

        let duplicate = vec![
            Argument {
                position: 0,
                value: Value::Int32(1),
            },
            Argument {
                position: 0,
                value: Value::Int32(2),
            },
        ];
        assert!(matches!(
            coercer.bind_arguments("S.P", &proc, &duplicate),
            Err(CallError::TypeMismatch { .. })
        ));
    }

    #[test]
    fn stale_reference_is_invalid() {
        let services = catalog();
        let objects = ObjectRegistry::new();
        let coercer = Coercer::new(&services, &objects);
        let err = coercer
            .decode(&Value::Object(ObjectId(5)), &Type::class("S", "C"), "ctx")
            .unwrap_err();
        assert_eq!(err, CallError::InvalidReference { id: ObjectId(5) });
    }
}
