//! Native-side values and the invocation handed to procedure handlers.
//!
//! Handlers never see wire values. Arguments arrive already coerced to
//! [`NativeValue`], with object ids resolved to live instances; results are
//! returned as [`NativeValue`] and encoded by the dispatcher.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use kestrel_core::Services;

use super::dispatcher::Dispatcher;
use super::operation::{CallContext, CallError};
use super::status::StatusSnapshot;

/// A server-side object instance. Identity is the allocation, not the value.
pub type Instance = Arc<dyn Any + Send + Sync>;

/// Opaque state a blocking procedure leaves behind between ticks.
pub type Progress = Box<dyn Any + Send>;

/// Native procedure implementation.
pub type Handler = Arc<dyn Fn(&mut Invocation<'_>) -> Result<Step, CallError> + Send + Sync>;

/// A value as seen by native procedures.
#[derive(Clone)]
pub enum NativeValue {
    Null,
    Bool(bool),
    Int32(i32),
    Int64(i64),
    Float32(f32),
    Float64(f64),
    String(String),
    Bytes(Vec<u8>),
    List(Vec<NativeValue>),
    Map(Vec<(NativeValue, NativeValue)>),
    Set(Vec<NativeValue>),
    Tuple(Vec<NativeValue>),
    Enum(i32),
    Object(Instance),
}

impl NativeValue {
    /// Wraps a typed instance.
    pub fn object<T: Any + Send + Sync>(instance: Arc<T>) -> Self {
        Self::Object(instance)
    }

    /// `Null` for `None`, the wrapped instance otherwise.
    pub fn optional_object<T: Any + Send + Sync>(instance: Option<Arc<T>>) -> Self {
        instance.map_or(Self::Null, Self::object)
    }

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

    /// Downcasts an `Object` to its concrete type.
    #[must_use]
    pub fn downcast<T: Any + Send + Sync>(&self) -> Option<Arc<T>> {
        match self {
            Self::Object(instance) => Arc::clone(instance).downcast::<T>().ok(),
            _ => None,
        }
    }
}

impl fmt::Debug for NativeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "Null"),
            Self::Bool(v) => write!(f, "Bool({v})"),
            Self::Int32(v) => write!(f, "Int32({v})"),
            Self::Int64(v) => write!(f, "Int64({v})"),
            Self::Float32(v) => write!(f, "Float32({v})"),
            Self::Float64(v) => write!(f, "Float64({v})"),
            Self::String(v) => write!(f, "String({v:?})"),
            Self::Bytes(v) => write!(f, "Bytes({} bytes)", v.len()),
            Self::List(v) => f.debug_tuple("List").field(v).finish(),
            Self::Map(v) => f.debug_tuple("Map").field(v).finish(),
            Self::Set(v) => f.debug_tuple("Set").field(v).finish(),
            Self::Tuple(v) => f.debug_tuple("Tuple").field(v).finish(),
            Self::Enum(v) => write!(f, "Enum({v})"),
            Self::Object(instance) => write!(f, "Object({:p})", Arc::as_ptr(instance)),
        }
    }
}

impl From<bool> for NativeValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i32> for NativeValue {
    fn from(v: i32) -> Self {
        Self::Int32(v)
    }
}

impl From<i64> for NativeValue {
    fn from(v: i64) -> Self {
        Self::Int64(v)
    }
}

impl From<f32> for NativeValue {
    fn from(v: f32) -> Self {
        Self::Float32(v)
    }
}

impl From<f64> for NativeValue {
    fn from(v: f64) -> Self {
        Self::Float64(v)
    }
}

impl From<String> for NativeValue {
    fn from(v: String) -> Self {
        Self::String(v)
    }
}

impl From<&str> for NativeValue {
    fn from(v: &str) -> Self {
        Self::String(v.to_string())
    }
}

/// What a handler did during one invocation.
pub enum Step {
    /// Finished, with the return value if the procedure has one.
    Complete(Option<NativeValue>),
    /// Did a bounded unit of work; resume with this progress on the next tick.
    /// Only blocking procedures may continue.
    Continue(Progress),
}

impl Step {
    /// Completion without a return value.
    #[must_use]
    pub fn done() -> Self {
        Self::Complete(None)
    }

    pub fn value(value: impl Into<NativeValue>) -> Self {
        Self::Complete(Some(value.into()))
    }

    pub fn continue_with<P: Any + Send>(progress: P) -> Self {
        Self::Continue(Box::new(progress))
    }
}

impl fmt::Debug for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Complete(value) => f.debug_tuple("Complete").field(value).finish(),
            Self::Continue(_) => write!(f, "Continue(..)"),
        }
    }
}

/// Everything a handler can see while it runs.
pub struct Invocation<'a> {
    ctx: CallContext,
    procedure: &'a str,
    dispatcher: &'a Dispatcher,
    args: &'a [NativeValue],
    progress: Option<Progress>,
}

impl<'a> Invocation<'a> {
    pub(crate) fn new(
        ctx: CallContext,
        procedure: &'a str,
        dispatcher: &'a Dispatcher,
        args: &'a [NativeValue],
        progress: Option<Progress>,
    ) -> Self {
        Self {
            ctx,
            procedure,
            dispatcher,
            args,
            progress,
        }
    }

    #[must_use]
    pub fn ctx(&self) -> CallContext {
        self.ctx
    }

    #[must_use]
    pub fn services(&self) -> &Services {
        self.dispatcher.services()
    }

    #[must_use]
    pub fn snapshot(&self) -> StatusSnapshot {
        self.dispatcher.snapshot()
    }

    /// Takes the progress left by the previous step, if this is a resumption
    /// and the stored progress has type `P`.
    pub fn take_progress<P: Any>(&mut self) -> Option<P> {
        self.progress.take()?.downcast::<P>().ok().map(|p| *p)
    }

    #[must_use]
    pub fn args(&self) -> &[NativeValue] {
        self.args
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the procedure has fewer than `index + 1` parameters.
    pub fn arg(&self, index: usize) -> Result<&NativeValue, CallError> {
        self.args.get(index).ok_or_else(|| {
            CallError::mismatch(self.context(index), "an argument", "nothing")
        })
    }

    fn context(&self, index: usize) -> String {
        format!("{} argument {index}", self.procedure)
    }

    fn wrong(&self, index: usize, expected: &str, got: &NativeValue) -> CallError {
        CallError::mismatch(self.context(index), expected, got.kind_name())
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not a `Bool`.
    pub fn bool(&self, index: usize) -> Result<bool, CallError> {
        match self.arg(index)? {
            NativeValue::Bool(v) => Ok(*v),
            other => Err(self.wrong(index, "Bool", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not an `Int32`.
    pub fn i32(&self, index: usize) -> Result<i32, CallError> {
        match self.arg(index)? {
            NativeValue::Int32(v) => Ok(*v),
            other => Err(self.wrong(index, "Int32", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not an `Int64`.
    pub fn i64(&self, index: usize) -> Result<i64, CallError> {
        match self.arg(index)? {
            NativeValue::Int64(v) => Ok(*v),
            other => Err(self.wrong(index, "Int64", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not a `Float32`.
    pub fn f32(&self, index: usize) -> Result<f32, CallError> {
        match self.arg(index)? {
            NativeValue::Float32(v) => Ok(*v),
            other => Err(self.wrong(index, "Float32", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not a `Float64`.
    pub fn f64(&self, index: usize) -> Result<f64, CallError> {
        match self.arg(index)? {
            NativeValue::Float64(v) => Ok(*v),
            other => Err(self.wrong(index, "Float64", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not a `String`.
    pub fn str(&self, index: usize) -> Result<&str, CallError> {
        match self.arg(index)? {
            NativeValue::String(v) => Ok(v),
            other => Err(self.wrong(index, "String", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not `Bytes`.
    pub fn bytes(&self, index: usize) -> Result<&[u8], CallError> {
        match self.arg(index)? {
            NativeValue::Bytes(v) => Ok(v),
            other => Err(self.wrong(index, "Bytes", other)),
        }
    }

    /// Elements of a `List`, `Set` or `Tuple` argument.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` for any other shape.
    pub fn items(&self, index: usize) -> Result<&[NativeValue], CallError> {
        match self.arg(index)? {
            NativeValue::List(v) | NativeValue::Set(v) | NativeValue::Tuple(v) => Ok(v),
            other => Err(self.wrong(index, "a collection", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not a `Map`.
    pub fn entries(&self, index: usize) -> Result<&[(NativeValue, NativeValue)], CallError> {
        match self.arg(index)? {
            NativeValue::Map(v) => Ok(v),
            other => Err(self.wrong(index, "Map", other)),
        }
    }

    /// Integer value of an enumeration argument.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the argument is not an enumeration value.
    pub fn enum_value(&self, index: usize) -> Result<i32, CallError> {
        match self.arg(index)? {
            NativeValue::Enum(v) => Ok(*v),
            other => Err(self.wrong(index, "Enumeration", other)),
        }
    }

    /// # Errors
    ///
    /// `TypeMismatch` if the argument is null or an instance of another type.
    pub fn object<T: Any + Send + Sync>(&self, index: usize) -> Result<Arc<T>, CallError> {
        let value = self.arg(index)?;
        value
            .downcast::<T>()
            .ok_or_else(|| self.wrong(index, std::any::type_name::<T>(), value))
    }

    /// Like [`Invocation::object`] but maps `Null` to `None`.
    ///
    /// # Errors
    ///
    /// `TypeMismatch` if the argument is an instance of another type.
    pub fn optional_object<T: Any + Send + Sync>(
        &self,
        index: usize,
    ) -> Result<Option<Arc<T>>, CallError> {
        match self.arg(index)? {
            NativeValue::Null => Ok(None),
            _ => self.object(index).map(Some),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Widget(u32);

    #[test]
    fn downcast_recovers_concrete_instance() {
        let widget = Arc::new(Widget(5));
        let value = NativeValue::object(Arc::clone(&widget));
        let back = value.downcast::<Widget>().unwrap();
        assert!(Arc::ptr_eq(&widget, &back));
        assert_eq!(back.0, 5);
        assert!(value.downcast::<String>().is_none());
    }

    #[test]
    fn optional_object_none_is_null() {
        let value = NativeValue::optional_object::<Widget>(None);
        assert!(matches!(value, NativeValue::Null));
    }

    #[test]
    fn step_debug_hides_progress() {
        let step = Step::continue_with(3_u32);
        assert_eq!(format!("{step:?}"), "Continue(..)");
        assert_eq!(format!("{:?}", Step::value(2)), "Complete(Some(Int32(2)))");
    }
}
