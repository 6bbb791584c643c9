use std::collections::BTreeMap;
use std::fmt;

use crate::matchers::MatcherHandle;
use crate::spy::{ContextValue, Spy};

/// A dynamically typed argument or return value.
///
/// Spies record their arguments as `Value`s so that calls made by the code
/// under test can be compared structurally against rehearsed calls. Anywhere
/// a concrete value is expected, a [matcher](crate::matchers) can stand in:
/// equality then delegates to the matcher's predicate instead of comparing
/// representations.
///
/// # Example
///
/// ```
/// use decoy::{matchers, Value};
///
/// assert_eq!(Value::from(42), Value::Int(42));
/// assert_eq!(Value::from("hello"), matchers::any());
/// assert_ne!(Value::Nil, matchers::any());
/// ```
#[derive(Debug, Clone)]
pub enum Value {
    /// The absent value; also the default result of an unstubbed call.
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    Map(BTreeMap<String, Value>),
    /// A matcher standing in for a concrete value. See [`crate::matchers`].
    Matcher(MatcherHandle),
    /// A mock handle, e.g. a child spy returned from an attribute read.
    Spy(Spy),
    /// A synthesised context manager produced by an enter-with stub.
    Context(ContextValue),
}

/// Discriminant of a [`Value`], used by kind-based matchers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueKind {
    Nil,
    Bool,
    Int,
    Float,
    Str,
    List,
    Map,
    Matcher,
    Spy,
    Context,
}

impl fmt::Display for ValueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueKind::Nil => "nil",
            ValueKind::Bool => "bool",
            ValueKind::Int => "int",
            ValueKind::Float => "float",
            ValueKind::Str => "str",
            ValueKind::List => "list",
            ValueKind::Map => "map",
            ValueKind::Matcher => "matcher",
            ValueKind::Spy => "mock",
            ValueKind::Context => "context",
        };
        write!(f, "{name}")
    }
}

impl Value {
    /// Returns the kind discriminant of this value.
    pub fn kind(&self) -> ValueKind {
        match self {
            Value::Nil => ValueKind::Nil,
            Value::Bool(_) => ValueKind::Bool,
            Value::Int(_) => ValueKind::Int,
            Value::Float(_) => ValueKind::Float,
            Value::Str(_) => ValueKind::Str,
            Value::List(_) => ValueKind::List,
            Value::Map(_) => ValueKind::Map,
            Value::Matcher(_) => ValueKind::Matcher,
            Value::Spy(_) => ValueKind::Spy,
            Value::Context(_) => ValueKind::Context,
        }
    }

    /// Returns true for [`Value::Nil`].
    #[inline]
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    /// Returns the integer payload, if this is an `Int`.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns the boolean payload, if this is a `Bool`.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the string payload, if this is a `Str`.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the spy handle, if this value is a mock.
    ///
    /// Attribute reads that fall through to the cached child spy return it
    /// through this variant.
    pub fn as_spy(&self) -> Option<&Spy> {
        match self {
            Value::Spy(spy) => Some(spy),
            _ => None,
        }
    }

    /// Returns the synthesised context manager, if this value is one.
    pub fn as_context(&self) -> Option<&ContextValue> {
        match self {
            Value::Context(ctx) => Some(ctx),
            _ => None,
        }
    }

    /// Returns true if this value is, or contains, a capturing matcher.
    pub(crate) fn contains_captor(&self) -> bool {
        match self {
            Value::Matcher(handle) => handle.is_captor(),
            Value::List(items) => items.iter().any(Value::contains_captor),
            Value::Map(entries) => entries.values().any(Value::contains_captor),
            _ => false,
        }
    }
}

/// Structural equality, with two provisions:
///
/// - a [`Value::Matcher`] on either side delegates the comparison to its
///   predicate (capturing matchers record the compared value as a side
///   effect);
/// - `Int` and `Float` compare numerically, so `1 == 1.0`.
impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Matcher(matcher), other) => matcher.matches(other),
            (value, Value::Matcher(matcher)) => matcher.matches(value),
            (Value::Nil, Value::Nil) => true,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                *a as f64 == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Map(a), Value::Map(b)) => a == b,
            (Value::Spy(a), Value::Spy(b)) => a == b,
            (Value::Context(a), Value::Context(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Bool(b) => write!(f, "{b}"),
            Value::Int(n) => write!(f, "{n}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Str(s) => write!(f, "{s:?}"),
            Value::List(items) => {
                write!(f, "[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, "]")
            }
            Value::Map(entries) => {
                write!(f, "{{")?;
                for (i, (key, value)) in entries.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Value::Matcher(handle) => write!(f, "{}", handle.describe()),
            Value::Spy(spy) => write!(f, "<mock '{}'>", spy.name()),
            Value::Context(ctx) => write!(f, "<enter {}>", ctx.value()),
        }
    }
}

impl Default for Value {
    fn default() -> Self {
        Value::Nil
    }
}

impl From<()> for Value {
    fn from(_: ()) -> Self {
        Value::Nil
    }
}

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Value::Bool(value)
    }
}

impl From<i32> for Value {
    fn from(value: i32) -> Self {
        Value::Int(value.into())
    }
}

impl From<i64> for Value {
    fn from(value: i64) -> Self {
        Value::Int(value)
    }
}

impl From<u32> for Value {
    fn from(value: u32) -> Self {
        Value::Int(value.into())
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Value::Float(value)
    }
}

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Value::Str(value.to_owned())
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Value::Str(value)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(items: Vec<T>) -> Self {
        Value::List(items.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        match value {
            Some(inner) => inner.into(),
            None => Value::Nil,
        }
    }
}

impl From<BTreeMap<String, Value>> for Value {
    fn from(entries: BTreeMap<String, Value>) -> Self {
        Value::Map(entries)
    }
}

impl From<Spy> for Value {
    fn from(spy: Spy) -> Self {
        Value::Spy(spy)
    }
}
