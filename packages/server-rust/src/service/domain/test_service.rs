//! Fixture services covering every declaration form: plain procedures,
//! properties, classes, static members, enumerations, defaults, collections,
//! blocking procedures and native faults.

use std::sync::Arc;

use kestrel_core::{Type, Value};
use parking_lot::Mutex;

use crate::service::declare::{
    ClassDecl, EnumerationDecl, ProcedureDecl, PropertyDecl, ServiceDecl,
};
use crate::service::native::{NativeValue, Step};
use crate::service::operation::CallError;

const SERVICE: &str = "TestService";

// ---------------------------------------------------------------------------
// Native state
// ---------------------------------------------------------------------------

/// Instance type behind `TestService.TestClass`.
pub struct TestClass {
    value: String,
    int_property: Mutex<i32>,
    object_property: Mutex<Option<Arc<TestClass>>>,
}

impl TestClass {
    #[must_use]
    pub fn new(value: &str) -> Arc<Self> {
        Arc::new(Self {
            value: value.to_string(),
            int_property: Mutex::new(0),
            object_property: Mutex::new(None),
        })
    }

    #[must_use]
    pub fn value(&self) -> &str {
        &self.value
    }
}

#[derive(Default)]
struct TestState {
    string_property: Mutex<String>,
    string_property_private_get: Mutex<String>,
    object_property: Mutex<Option<Arc<TestClass>>>,
}

fn test_class() -> Type {
    Type::class(SERVICE, "TestClass")
}

fn test_enum() -> Type {
    Type::enumeration(SERVICE, "TestEnum")
}

/// Adds one to every integer inside `value`, however deeply nested.
fn increment(value: &NativeValue) -> Result<NativeValue, CallError> {
    let all = |items: &[NativeValue]| items.iter().map(increment).collect::<Result<Vec<_>, _>>();
    Ok(match value {
        NativeValue::Int32(v) => NativeValue::Int32(v.wrapping_add(1)),
        NativeValue::Int64(v) => NativeValue::Int64(v.wrapping_add(1)),
        NativeValue::List(items) => NativeValue::List(all(items)?),
        NativeValue::Set(items) => NativeValue::Set(all(items)?),
        NativeValue::Tuple(items) => NativeValue::Tuple(all(items)?),
        NativeValue::Map(entries) => NativeValue::Map(
            entries
                .iter()
                .map(|(k, v)| -> Result<_, CallError> { Ok((k.clone(), increment(v)?)) })
                .collect::<Result<_, _>>()?,
        ),
        other => {
            return Err(CallError::fault(format!(
                "cannot increment {}",
                other.kind_name()
            )))
        }
    })
}

/// `Name(value: ty) -> String`, formatting the argument with `Display`.
macro_rules! to_string_procedure {
    ($name:literal, $ty:expr, $getter:ident) => {
        ProcedureDecl::new($name)
            .param("value", $ty)
            .returns(Type::String)
            .handler(|inv| Ok(Step::value(inv.$getter(0)?.to_string())))
    };
}

// ---------------------------------------------------------------------------
// TestService
// ---------------------------------------------------------------------------

fn test_class_decl() -> ClassDecl {
    ClassDecl::new("TestClass")
        .constructor(
            ProcedureDecl::new("new")
                .param("value", Type::String)
                .handler(|inv| Ok(Step::value(NativeValue::object(TestClass::new(inv.str(0)?))))),
        )
        .method(
            ProcedureDecl::new("GetValue")
                .returns(Type::String)
                .handler(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    Ok(Step::value(format!("value={}", this.value)))
                }),
        )
        .method(
            ProcedureDecl::new("FloatToString")
                .param("x", Type::Float32)
                .returns(Type::String)
                .handler(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    Ok(Step::value(format!("{}{}", this.value, inv.f32(1)?)))
                }),
        )
        .method(
            ProcedureDecl::new("ObjectToString")
                .param("other", Type::optional(test_class()))
                .returns(Type::String)
                .handler(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    let other = inv.optional_object::<TestClass>(1)?;
                    let other = other.as_deref().map_or("", TestClass::value);
                    Ok(Step::value(format!("{}{other}", this.value)))
                }),
        )
        .method(
            ProcedureDecl::new("IntToString")
                .param_default("x", Type::Int32, 42)
                .returns(Type::String)
                .handler(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    Ok(Step::value(format!("{}{}", this.value, inv.i32(1)?)))
                }),
        )
        .property(
            PropertyDecl::new("IntProperty", Type::Int32)
                .getter(|inv| Ok(Step::value(*inv.object::<TestClass>(0)?.int_property.lock())))
                .setter(|inv| {
                    *inv.object::<TestClass>(0)?.int_property.lock() = inv.i32(1)?;
                    Ok(Step::done())
                }),
        )
        .property(
            PropertyDecl::new("ObjectProperty", Type::optional(test_class()))
                .getter(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    let current = this.object_property.lock().clone();
                    Ok(Step::value(NativeValue::optional_object(current)))
                })
                .setter(|inv| {
                    let this = inv.object::<TestClass>(0)?;
                    *this.object_property.lock() = inv.optional_object::<TestClass>(1)?;
                    Ok(Step::done())
                }),
        )
        .static_method(
            ProcedureDecl::new("StaticMethod")
                .param_default("a", Type::String, "")
                .param_default("b", Type::String, "")
                .returns(Type::String)
                .handler(|inv| Ok(Step::value(format!("jeb{}{}", inv.str(0)?, inv.str(1)?)))),
        )
}

fn test_enum_decl() -> EnumerationDecl {
    EnumerationDecl::new("TestEnum")
        .doc("Documentation string for TestEnum.")
        .documented_value("ValueA", 0, "Documented enum field")
        .value("ValueB", 7)
        .value("ValueC", -2)
}

#[allow(clippy::too_many_lines)]
fn test_service() -> ServiceDecl {
    let state = Arc::new(TestState::default());

    let string_property = {
        let (get, set) = (Arc::clone(&state), Arc::clone(&state));
        PropertyDecl::new("StringProperty", Type::String)
            .getter(move |_| Ok(Step::value(get.string_property.lock().clone())))
            .setter(move |inv| {
                *set.string_property.lock() = inv.str(0)?.to_string();
                Ok(Step::done())
            })
    };
    let private_get = {
        let set = Arc::clone(&state);
        PropertyDecl::new("StringPropertyPrivateGet", Type::String).setter(move |inv| {
            *set.string_property_private_get.lock() = inv.str(0)?.to_string();
            Ok(Step::done())
        })
    };
    let object_property = {
        let (get, set) = (Arc::clone(&state), Arc::clone(&state));
        PropertyDecl::new("ObjectProperty", Type::optional(test_class()))
            .getter(move |_| {
                let current = get.object_property.lock().clone();
                Ok(Step::value(NativeValue::optional_object(current)))
            })
            .setter(move |inv| {
                *set.object_property.lock() = inv.optional_object::<TestClass>(0)?;
                Ok(Step::done())
            })
    };

    ServiceDecl::new(SERVICE)
        .doc("Test service documentation.")
        .procedure(
            ProcedureDecl::new("ProcedureNoArgsNoReturn")
                .doc("Procedure with no return arguments.")
                .handler(|_| Ok(Step::done())),
        )
        .procedure(to_string_procedure!("FloatToString", Type::Float32, f32))
        .procedure(to_string_procedure!("DoubleToString", Type::Float64, f64))
        .procedure(to_string_procedure!("Int32ToString", Type::Int32, i32))
        .procedure(to_string_procedure!("Int64ToString", Type::Int64, i64))
        .procedure(
            ProcedureDecl::new("BoolToString")
                .param("value", Type::Bool)
                .returns(Type::String)
                .handler(|inv| {
                    let text = if inv.bool(0)? { "True" } else { "False" };
                    Ok(Step::value(text))
                }),
        )
        .procedure(
            ProcedureDecl::new("StringToInt32")
                .param("value", Type::String)
                .returns(Type::Int32)
                .handler(|inv| {
                    let parsed = inv
                        .str(0)?
                        .parse::<i32>()
                        .map_err(|err| CallError::fault(err.to_string()))?;
                    Ok(Step::value(parsed))
                }),
        )
        .procedure(
            ProcedureDecl::new("BytesToHexString")
                .param("value", Type::Bytes)
                .returns(Type::String)
                .handler(|inv| Ok(Step::value(hex::encode(inv.bytes(0)?)))),
        )
        .procedure(
            ProcedureDecl::new("AddMultipleValues")
                .param("x", Type::Float32)
                .param("y", Type::Int32)
                .param("z", Type::Int64)
                .returns(Type::String)
                .handler(|inv| {
                    #[allow(clippy::cast_precision_loss)]
                    let total = f64::from(inv.f32(0)?) + f64::from(inv.i32(1)?) + inv.i64(2)? as f64;
                    Ok(Step::value(total.to_string()))
                }),
        )
        .property(string_property)
        .property(private_get)
        .property({
            let get = Arc::clone(&state);
            PropertyDecl::new("StringPropertyPrivateSet", Type::String).getter(move |_| {
                let current = get.string_property_private_get.lock().clone();
                Ok(Step::value(current))
            })
        })
        .property(object_property)
        .procedure(
            ProcedureDecl::new("CreateTestObject")
                .param("value", Type::String)
                .returns(test_class())
                .handler(|inv| Ok(Step::value(NativeValue::object(TestClass::new(inv.str(0)?))))),
        )
        .procedure(
            ProcedureDecl::new("EchoTestObject")
                .param("obj", Type::optional(test_class()))
                .returns(test_class())
                .handler(|inv| {
                    let obj = inv.optional_object::<TestClass>(0)?;
                    Ok(Step::value(NativeValue::optional_object(obj)))
                }),
        )
        .procedure(
            ProcedureDecl::new("OptionalArguments")
                .param("x", Type::String)
                .param_default("y", Type::String, "foo")
                .param_default("z", Type::String, "bar")
                .param_default("obj", test_class(), Value::Null)
                .returns(Type::String)
                .handler(|inv| {
                    Ok(Step::value(format!(
                        "{}{}{}",
                        inv.str(0)?,
                        inv.str(1)?,
                        inv.str(2)?
                    )))
                }),
        )
        .procedure(
            ProcedureDecl::new("BlockingProcedure")
                .param("n", Type::Int32)
                .param_default("sum", Type::Int32, 0)
                .returns(Type::Int32)
                .blocking()
                .handler(|inv| {
                    let (n, sum) = match inv.take_progress::<(i32, i32)>() {
                        Some(progress) => progress,
                        None => (inv.i32(0)?, inv.i32(1)?),
                    };
                    if n == 0 {
                        Ok(Step::value(sum))
                    } else {
                        Ok(Step::continue_with((n - 1, sum + n)))
                    }
                }),
        )
        .procedure(
            ProcedureDecl::new("BlockingProcedureNoReturn")
                .param("n", Type::Int32)
                .blocking()
                .handler(|inv| {
                    let n = match inv.take_progress::<i32>() {
                        Some(n) => n,
                        None => inv.i32(0)?,
                    };
                    if n == 0 {
                        Ok(Step::done())
                    } else {
                        Ok(Step::continue_with(n - 1))
                    }
                }),
        )
        .procedure(
            ProcedureDecl::new("EnumReturn")
                .returns(test_enum())
                .handler(|_| Ok(Step::value(NativeValue::Enum(7)))),
        )
        .procedure(
            ProcedureDecl::new("EnumEcho")
                .param("x", test_enum())
                .returns(test_enum())
                .handler(|inv| Ok(Step::value(NativeValue::Enum(inv.enum_value(0)?)))),
        )
        .procedure(
            ProcedureDecl::new("EnumDefaultArg")
                .param_default("x", test_enum(), Value::Enum(-2))
                .returns(test_enum())
                .handler(|inv| Ok(Step::value(NativeValue::Enum(inv.enum_value(0)?)))),
        )
        .procedure(
            ProcedureDecl::new("IncrementList")
                .param("l", Type::list(Type::Int32))
                .returns(Type::list(Type::Int32))
                .handler(|inv| Ok(Step::value(increment(inv.arg(0)?)?))),
        )
        .procedure(
            ProcedureDecl::new("IncrementDictionary")
                .param("d", Type::map(Type::String, Type::Int32))
                .returns(Type::map(Type::String, Type::Int32))
                .handler(|inv| Ok(Step::value(increment(inv.arg(0)?)?))),
        )
        .procedure(
            ProcedureDecl::new("IncrementSet")
                .param("h", Type::set(Type::Int32))
                .returns(Type::set(Type::Int32))
                .handler(|inv| Ok(Step::value(increment(inv.arg(0)?)?))),
        )
        .procedure(
            ProcedureDecl::new("IncrementTuple")
                .param("t", Type::tuple(vec![Type::Int32, Type::Int64]))
                .returns(Type::tuple(vec![Type::Int32, Type::Int64]))
                .handler(|inv| Ok(Step::value(increment(inv.arg(0)?)?))),
        )
        .procedure(
            ProcedureDecl::new("IncrementNestedCollection")
                .param("d", Type::map(Type::String, Type::list(Type::Int32)))
                .returns(Type::map(Type::String, Type::list(Type::Int32)))
                .handler(|inv| Ok(Step::value(increment(inv.arg(0)?)?))),
        )
        .procedure(
            ProcedureDecl::new("AddToObjectList")
                .param("l", Type::list(test_class()))
                .param("value", Type::String)
                .returns(Type::list(test_class()))
                .handler(|inv| {
                    let mut items = inv.items(0)?.to_vec();
                    items.push(NativeValue::object(TestClass::new(inv.str(1)?)));
                    Ok(Step::value(NativeValue::List(items)))
                }),
        )
        .procedure(
            ProcedureDecl::new("ThrowArgumentException")
                .returns(Type::Int32)
                .handler(|_| Err(CallError::fault("Invalid argument"))),
        )
        .procedure(
            ProcedureDecl::new("ThrowInvalidOperationException")
                .returns(Type::Int32)
                .handler(|_| Err(CallError::fault("Invalid operation"))),
        )
        .class(test_class_decl())
        .enumeration(test_enum_decl())
}

// ---------------------------------------------------------------------------
// TestService2 / TestService3Name
// ---------------------------------------------------------------------------

fn test_service2() -> ServiceDecl {
    ServiceDecl::new("TestService2")
        .doc("TestService2 documentation.")
        .procedure(
            ProcedureDecl::new("ClassTypeFromOtherServiceAsParameter")
                .doc("TestService2 procedure documentation.")
                .param("obj", test_class())
                .returns(Type::Int64)
                .handler(|inv| {
                    let obj = inv.object::<TestClass>(0)?;
                    let length = i64::try_from(obj.value().len()).unwrap_or(i64::MAX);
                    Ok(Step::value(length))
                }),
        )
        .procedure(
            ProcedureDecl::new("ClassTypeFromOtherServiceAsReturn")
                .param("value", Type::String)
                .returns(test_class())
                .handler(|inv| Ok(Step::value(NativeValue::object(TestClass::new(inv.str(0)?))))),
        )
}

fn test_service3() -> ServiceDecl {
    ServiceDecl::new("TestService3Name")
        .procedure(
            ProcedureDecl::new("Greet")
                .param("name", Type::String)
                .returns(Type::String)
                .handler(|inv| Ok(Step::value(format!("hello {}", inv.str(0)?)))),
        )
        .class(ClassDecl::new("TestClass"))
}

/// Declarations for `TestService`, `TestService2` and `TestService3Name`.
/// Each call builds fresh native state.
#[must_use]
pub fn test_services() -> Vec<ServiceDecl> {
    vec![test_service(), test_service2(), test_service3()]
}
