//! Value matchers for loosening stub and verification conditions.
//!
//! A matcher is a predicate that stands in for a concrete value anywhere an
//! argument is expected. Equality against a matcher delegates to the
//! predicate, so exact adherence to a value is only required where the test
//! actually cares about it.
//!
//! ```
//! use decoy::{args, matchers, Decoy, Spec};
//!
//! # fn main() -> decoy::Result {
//! let decoy = Decoy::new();
//! let log = decoy.mock(Spec::function("log").param("msg"))?;
//!
//! log.call(args!["hello"])?;
//! decoy.verify(&log)?.called_with(args![matchers::string_matching("^h")?])?;
//! # Ok(())
//! # }
//! ```
//!
//! Matchers compare by predicate only; they never participate in identity
//! checks. A [`Captor`] additionally records every value it is compared
//! against, for later inspection.

use std::fmt;
use std::sync::{Arc, Mutex, PoisonError};

use regex::Regex;

use crate::error::{Error, Result};
use crate::value::{Value, ValueKind};

/// Predicate capability backing [`Value::Matcher`](crate::Value::Matcher).
///
/// Implement this to plug a custom matcher into argument comparison; wrap it
/// with [`custom`] to obtain a [`Value`].
pub trait ValueMatcher: Send + Sync {
    /// Returns true if `value` satisfies this matcher.
    fn matches(&self, value: &Value) -> bool;

    /// Human-readable description used in diagnostics, e.g. `<anything>`.
    fn describe(&self) -> String;

    /// Returns true for matchers that capture compared values.
    fn is_captor(&self) -> bool {
        false
    }
}

/// Shared handle to a matcher, cheap to clone into recorded arguments.
#[derive(Clone)]
pub struct MatcherHandle(Arc<dyn ValueMatcher>);

impl MatcherHandle {
    pub(crate) fn new(matcher: impl ValueMatcher + 'static) -> Self {
        Self(Arc::new(matcher))
    }

    #[inline]
    pub(crate) fn matches(&self, value: &Value) -> bool {
        self.0.matches(value)
    }

    #[inline]
    pub(crate) fn describe(&self) -> String {
        self.0.describe()
    }

    #[inline]
    pub(crate) fn is_captor(&self) -> bool {
        self.0.is_captor()
    }
}

impl fmt::Debug for MatcherHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "MatcherHandle({})", self.describe())
    }
}

/// Wraps a custom [`ValueMatcher`] into a [`Value`].
pub fn custom(matcher: impl ValueMatcher + 'static) -> Value {
    Value::Matcher(MatcherHandle::new(matcher))
}

struct Anything;

impl ValueMatcher for Anything {
    fn matches(&self, value: &Value) -> bool {
        !value.is_nil()
    }

    fn describe(&self) -> String {
        "<anything>".to_owned()
    }
}

/// Matches any value except [`Value::Nil`].
///
/// ```
/// use decoy::{matchers, Value};
///
/// assert_eq!(Value::from("foobar"), matchers::any());
/// assert_ne!(Value::Nil, matchers::any());
/// ```
pub fn any() -> Value {
    custom(Anything)
}

struct IsNot {
    reject: Value,
}

impl ValueMatcher for IsNot {
    fn matches(&self, value: &Value) -> bool {
        *value != self.reject
    }

    fn describe(&self) -> String {
        format!("<is not {}>", self.reject)
    }
}

/// Matches any value that is not equal to `value`.
pub fn is_not(value: impl Into<Value>) -> Value {
    custom(IsNot {
        reject: value.into(),
    })
}

struct OfKind {
    kind: ValueKind,
}

impl ValueMatcher for OfKind {
    fn matches(&self, value: &Value) -> bool {
        value.kind() == self.kind
    }

    fn describe(&self) -> String {
        format!("<kind {}>", self.kind)
    }
}

/// Matches any value of the given [`ValueKind`].
///
/// ```
/// use decoy::{matchers, Value, ValueKind};
///
/// assert_eq!(Value::from("foobar"), matchers::of_kind(ValueKind::Str));
/// assert_ne!(Value::from(42), matchers::of_kind(ValueKind::Str));
/// ```
pub fn of_kind(kind: ValueKind) -> Value {
    custom(OfKind { kind })
}

struct StringMatching {
    pattern: Regex,
}

impl ValueMatcher for StringMatching {
    fn matches(&self, value: &Value) -> bool {
        value
            .as_str()
            .is_some_and(|text| self.pattern.is_match(text))
    }

    fn describe(&self) -> String {
        format!("<string matching {:?}>", self.pattern.as_str())
    }
}

/// Matches any string containing a match for the regex `pattern`.
///
/// Fails with [`Error::InvalidMatcher`] if the pattern does not compile.
pub fn string_matching(pattern: &str) -> Result<Value> {
    let pattern = Regex::new(pattern).map_err(|e| Error::InvalidMatcher(e.to_string()))?;
    Ok(custom(StringMatching { pattern }))
}

struct HasEntries {
    entries: Vec<(String, Value)>,
}

impl ValueMatcher for HasEntries {
    fn matches(&self, value: &Value) -> bool {
        let Value::Map(map) = value else {
            return false;
        };
        self.entries.iter().all(|(key, expected)| {
            map.get(key).is_some_and(|actual| actual == expected)
        })
    }

    fn describe(&self) -> String {
        let inner = self
            .entries
            .iter()
            .map(|(key, value)| format!("{key}: {value}"))
            .collect::<Vec<_>>()
            .join(", ");
        format!("<has entries {{{inner}}}>")
    }
}

/// Matches any map containing all the given key/value pairs.
pub fn has_entries<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Value
where
    K: Into<String>,
    V: Into<Value>,
{
    custom(HasEntries {
        entries: entries
            .into_iter()
            .map(|(key, value)| (key.into(), value.into()))
            .collect(),
    })
}

/// A matcher that matches anything and captures every compared value.
///
/// Clones share the captured list, so the handle kept by the test observes
/// values captured through the copy embedded in an argument bundle.
///
/// ```
/// use decoy::{matchers::Captor, Value};
///
/// let captor = Captor::new();
/// assert_eq!(Value::from("foobar"), captor.clone().into());
/// assert_eq!(captor.value().unwrap(), Value::from("foobar"));
/// ```
#[derive(Clone, Default)]
pub struct Captor {
    captured: Arc<Mutex<Vec<Value>>>,
}

impl Captor {
    /// Creates a captor with an empty capture list.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the first captured value.
    ///
    /// Fails with [`Error::NoValueCaptured`] if the captor has not matched
    /// anything yet.
    pub fn value(&self) -> Result<Value> {
        self.lock()
            .first()
            .cloned()
            .ok_or(Error::NoValueCaptured)
    }

    /// Returns every captured value, in capture order.
    pub fn values(&self) -> Vec<Value> {
        self.lock().clone()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<Value>> {
        self.captured.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ValueMatcher for Captor {
    fn matches(&self, value: &Value) -> bool {
        self.lock().push(value.clone());
        true
    }

    fn describe(&self) -> String {
        "<captor>".to_owned()
    }

    fn is_captor(&self) -> bool {
        true
    }
}

impl fmt::Debug for Captor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Captor")
            .field("captured", &self.lock().len())
            .finish()
    }
}

impl From<Captor> for Value {
    fn from(captor: Captor) -> Self {
        Value::Matcher(MatcherHandle::new(captor))
    }
}

impl From<&Captor> for Value {
    fn from(captor: &Captor) -> Self {
        captor.clone().into()
    }
}
