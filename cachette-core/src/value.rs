//! The cache value model.
//!
//! Every tier stores and returns [`CacheValue`], a tagged sum covering the
//! whole domain the cache can hold: scalars, sequences, records, keyed maps,
//! sets and error objects. Absence is *not* a member of the sum - a missing
//! entry is `Option::None` at every API boundary, which also makes the
//! "store the absence sentinel" failure mode unrepresentable.
//!
//! The sum carries a total order ([`Ord`]) so that sets have a canonical
//! iteration order and key building can sort collection arguments. Numbers
//! are ordered with [`f64::total_cmp`], which also makes `NaN` equal to
//! itself - important for lossless round trips through the codec.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

/// A value held by a cache tier.
///
/// `Record` and `Map` are distinct variants even though both are string-keyed:
/// a record is plain structured data while a map is an explicit keyed
/// collection, and the codec round-trips the distinction by type.
#[derive(Debug, Clone)]
pub enum CacheValue {
    /// The null value.
    Null,
    /// A boolean.
    Bool(bool),
    /// An IEEE-754 double, including the non-finite values.
    Number(f64),
    /// A UTF-8 string.
    String(String),
    /// An ordered sequence of values.
    Sequence(Vec<CacheValue>),
    /// Plain structured data keyed by property name.
    Record(BTreeMap<String, CacheValue>),
    /// An explicit keyed map.
    Map(BTreeMap<String, CacheValue>),
    /// A set of values in canonical order.
    Set(BTreeSet<CacheValue>),
    /// A stored error object.
    Error(CacheableError),
}

impl CacheValue {
    /// Builds a record from an iterator of `(name, value)` entries.
    pub fn record<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<CacheValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        CacheValue::Record(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a keyed map from an iterator of `(key, value)` entries.
    pub fn map<K, V, I>(entries: I) -> Self
    where
        K: Into<String>,
        V: Into<CacheValue>,
        I: IntoIterator<Item = (K, V)>,
    {
        CacheValue::Map(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }

    /// Builds a set from an iterator of values. Duplicates collapse.
    pub fn set<V, I>(values: I) -> Self
    where
        V: Into<CacheValue>,
        I: IntoIterator<Item = V>,
    {
        CacheValue::Set(values.into_iter().map(Into::into).collect())
    }

    /// Builds a sequence from an iterator of values.
    pub fn sequence<V, I>(values: I) -> Self
    where
        V: Into<CacheValue>,
        I: IntoIterator<Item = V>,
    {
        CacheValue::Sequence(values.into_iter().map(Into::into).collect())
    }

    /// Returns the string content, if this is a string.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            CacheValue::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the numeric content, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            CacheValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns `true` when this value is a stored error object.
    pub fn is_error(&self) -> bool {
        matches!(self, CacheValue::Error(_))
    }

    /// Variant rank used for the total order across the sum.
    fn rank(&self) -> u8 {
        match self {
            CacheValue::Null => 0,
            CacheValue::Bool(_) => 1,
            CacheValue::Number(_) => 2,
            CacheValue::String(_) => 3,
            CacheValue::Sequence(_) => 4,
            CacheValue::Record(_) => 5,
            CacheValue::Map(_) => 6,
            CacheValue::Set(_) => 7,
            CacheValue::Error(_) => 8,
        }
    }
}

impl PartialEq for CacheValue {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == std::cmp::Ordering::Equal
    }
}

impl Eq for CacheValue {}

impl PartialOrd for CacheValue {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for CacheValue {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        use CacheValue::*;
        match (self, other) {
            (Null, Null) => std::cmp::Ordering::Equal,
            (Bool(a), Bool(b)) => a.cmp(b),
            (Number(a), Number(b)) => a.total_cmp(b),
            (String(a), String(b)) => a.cmp(b),
            (Sequence(a), Sequence(b)) => a.cmp(b),
            (Record(a), Record(b)) => a.cmp(b),
            (Map(a), Map(b)) => a.cmp(b),
            (Set(a), Set(b)) => a.cmp(b),
            (Error(a), Error(b)) => a.cmp(b),
            (a, b) => a.rank().cmp(&b.rank()),
        }
    }
}

impl From<bool> for CacheValue {
    fn from(value: bool) -> Self {
        CacheValue::Bool(value)
    }
}

impl From<f64> for CacheValue {
    fn from(value: f64) -> Self {
        CacheValue::Number(value)
    }
}

impl From<i64> for CacheValue {
    fn from(value: i64) -> Self {
        CacheValue::Number(value as f64)
    }
}

impl From<&str> for CacheValue {
    fn from(value: &str) -> Self {
        CacheValue::String(value.to_owned())
    }
}

impl From<String> for CacheValue {
    fn from(value: String) -> Self {
        CacheValue::String(value)
    }
}

impl From<CacheableError> for CacheValue {
    fn from(value: CacheableError) -> Self {
        CacheValue::Error(value)
    }
}

/// An error object that can be stored in a cache tier and rethrown later.
///
/// Beyond the message, an error carries an optional name and arbitrary extra
/// properties, all of which survive the codec round trip. This is what makes
/// "cache the failure too" policies possible in the single-flight layer.
///
/// # Example
///
/// ```
/// use cachette_core::CacheableError;
///
/// let error = CacheableError::new("upstream unavailable")
///     .with_name("UpstreamError")
///     .with_property("retryable", true);
///
/// assert_eq!(error.to_string(), "UpstreamError: upstream unavailable");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct CacheableError {
    message: String,
    name: Option<String>,
    properties: BTreeMap<String, CacheValue>,
}

impl CacheableError {
    /// Creates an error with the given message.
    pub fn new(message: impl Into<String>) -> Self {
        CacheableError {
            message: message.into(),
            name: None,
            properties: BTreeMap::new(),
        }
    }

    /// Sets the error name (the source platform's `Error.name` analogue).
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Attaches an extra property that round-trips with the error.
    pub fn with_property(mut self, name: impl Into<String>, value: impl Into<CacheValue>) -> Self {
        self.properties.insert(name.into(), value.into());
        self
    }

    /// The error message.
    pub fn message(&self) -> &str {
        &self.message
    }

    /// The error name, if one was set.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// The extra properties attached to this error.
    pub fn properties(&self) -> &BTreeMap<String, CacheValue> {
        &self.properties
    }

    /// Looks up a single extra property.
    pub fn property(&self, name: &str) -> Option<&CacheValue> {
        self.properties.get(name)
    }
}

impl fmt::Display for CacheableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.name {
            Some(name) => write!(f, "{}: {}", name, self.message),
            None => write!(f, "{}", self.message),
        }
    }
}

impl std::error::Error for CacheableError {}
