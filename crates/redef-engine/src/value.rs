//! Dynamic values flowing through redefinable method calls
//!
//! Arguments, return values, and fields are `Value`s. Call recording
//! snapshots argument lists with [`snapshot`]: a structural deep copy when
//! every element supports copying, otherwise a reference-sharing fallback.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use crate::object::ObjectRef;

/// A trailing callback argument, forwarded to a method alongside its
/// positional arguments and preserved across wrapping.
pub type BlockFn = Rc<dyn Fn(&[Value]) -> Value>;

/// Dynamic value
#[derive(Clone)]
pub enum Value {
    /// Absence of a value; also the return of `ReplacementBehavior::Empty`
    Null,
    /// Boolean
    Bool(bool),
    /// 64-bit signed integer
    Int(i64),
    /// 64-bit float
    Float(f64),
    /// Owned string
    Str(String),
    /// Shared mutable list. A plain `clone` aliases the backing storage;
    /// deep copying allocates fresh storage.
    List(Rc<RefCell<Vec<Value>>>),
    /// Reference to an instance of a registered type. No copy capability:
    /// snapshots keep the reference.
    Object(ObjectRef),
    /// Caller-supplied payload with no copy capability.
    Opaque(Rc<dyn Any>),
}

impl Value {
    /// Build a `Str` value
    pub fn str(s: impl Into<String>) -> Self {
        Value::Str(s.into())
    }

    /// Build a `List` value with fresh backing storage
    pub fn list(items: Vec<Value>) -> Self {
        Value::List(Rc::new(RefCell::new(items)))
    }

    /// Build an `Opaque` value
    pub fn opaque(payload: impl Any) -> Self {
        Value::Opaque(Rc::new(payload))
    }

    /// Structural deep copy. Returns `None` when the value (or any element
    /// reachable from it) has no copy capability.
    pub fn deep_copy(&self) -> Option<Value> {
        match self {
            Value::Null => Some(Value::Null),
            Value::Bool(b) => Some(Value::Bool(*b)),
            Value::Int(i) => Some(Value::Int(*i)),
            Value::Float(f) => Some(Value::Float(*f)),
            Value::Str(s) => Some(Value::Str(s.clone())),
            Value::List(items) => {
                let copied = items
                    .borrow()
                    .iter()
                    .map(Value::deep_copy)
                    .collect::<Option<Vec<_>>>()?;
                Some(Value::list(copied))
            }
            Value::Object(_) | Value::Opaque(_) => None,
        }
    }
}

/// Snapshot an argument list for recording. Attempts a deep copy of the
/// whole list; if any element fails, the entire list falls back to
/// reference-sharing clones. Never fails.
pub fn snapshot(args: &[Value]) -> Vec<Value> {
    args.iter()
        .map(Value::deep_copy)
        .collect::<Option<Vec<_>>>()
        .unwrap_or_else(|| args.to_vec())
}

impl PartialEq for Value {
    fn eq(&self, other: &Value) -> bool {
        match (self, other) {
            (Value::Null, Value::Null) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => {
                Rc::ptr_eq(a, b) || *a.borrow() == *b.borrow()
            }
            (Value::Object(a), Value::Object(b)) => a.object_id() == b.object_id(),
            (Value::Opaque(a), Value::Opaque(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => write!(f, "null"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => f.debug_list().entries(items.borrow().iter()).finish(),
            Value::Object(obj) => write!(f, "<{}:{}>", obj.ty().path(), obj.object_id()),
            Value::Opaque(_) => write!(f, "<opaque>"),
        }
    }
}
