#![forbid(unsafe_code)]

//! Dynamic state values with shallow identity semantics.
//!
//! A [`Value`] is the unit of state held by every cell in the tree: a
//! primitive, or a structured array/object. Structured values are stored
//! behind `Rc` and never mutated once built, so "did this change?" is a
//! pointer comparison rather than a deep walk.
//!
//! # Identity vs. equality
//!
//! - [`Value::is_same`] is the notification filter. Primitives compare by
//!   value, arrays and objects compare by allocation. A freshly built object
//!   with identical fields is **not** the same value.
//! - `PartialEq` is structural and exists for assertions and callers that
//!   want deep comparison.
//!
//! # Invariants
//!
//! 1. Arrays and objects are immutable after construction; every "write"
//!    helper ([`Value::with_field`], [`Value::shallow_merge`]) builds a new
//!    allocation.
//! 2. `Number(NaN)` is never the same as anything, itself included.
//! 3. Object keys keep insertion order.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

/// Ordered key/value storage backing [`Value::Object`].
pub type Map = IndexMap<String, Value>;

/// A dynamically typed, cheaply clonable state value.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Value {
    /// Absent value. Used for missing child seeds and as the deletion marker
    /// of the deep-merge policy.
    #[default]
    Undefined,
    /// Explicit null.
    Null,
    /// Boolean primitive.
    Bool(bool),
    /// Numeric primitive.
    Number(f64),
    /// String primitive, compared by content.
    String(Rc<str>),
    /// Shared immutable array.
    Array(Rc<Vec<Value>>),
    /// Shared immutable object.
    Object(Rc<Map>),
}

impl Value {
    /// Build an object from key/value pairs.
    #[must_use]
    pub fn object<K, V>(entries: impl IntoIterator<Item = (K, V)>) -> Self
    where
        K: Into<String>,
        V: Into<Value>,
    {
        Self::Object(Rc::new(
            entries
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        ))
    }

    /// A new, empty object.
    #[must_use]
    pub fn empty_object() -> Self {
        Self::Object(Rc::new(Map::new()))
    }

    /// Build an array from values.
    #[must_use]
    pub fn array<V: Into<Value>>(items: impl IntoIterator<Item = V>) -> Self {
        Self::Array(Rc::new(items.into_iter().map(Into::into).collect()))
    }

    /// Shallow identity: the distinct-change filter used by every cell.
    #[must_use]
    pub fn is_same(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Undefined, Self::Undefined) | (Self::Null, Self::Null) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            #[allow(clippy::float_cmp)]
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => Rc::ptr_eq(a, b),
            (Self::Object(a), Self::Object(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    #[must_use]
    pub fn is_undefined(&self) -> bool {
        matches!(self, Self::Undefined)
    }

    #[must_use]
    pub fn is_object(&self) -> bool {
        matches!(self, Self::Object(_))
    }

    #[must_use]
    pub fn as_object(&self) -> Option<&Map> {
        match self {
            Self::Object(map) => Some(map),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            Self::Array(items) => Some(items),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Numeric value truncated to `i64`, if this is a number.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        self.as_f64().map(|n| n as i64)
    }

    #[must_use]
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Bool(b) => Some(*b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Read one field of an object.
    ///
    /// Returns [`Value::Undefined`] when the key is missing or `self` is not
    /// an object. The returned value shares storage with the field, so
    /// identity is preserved.
    #[must_use]
    pub fn field(&self, key: &str) -> Value {
        self.as_object()
            .and_then(|map| map.get(key))
            .cloned()
            .unwrap_or_default()
    }

    /// Whether `self` is an object containing `key`.
    #[must_use]
    pub fn has_field(&self, key: &str) -> bool {
        self.as_object().is_some_and(|map| map.contains_key(key))
    }

    /// A new object equal to `self` with `key` set to `value`.
    ///
    /// A non-object `self` is treated as an empty object.
    #[must_use]
    pub fn with_field(&self, key: impl Into<String>, value: Value) -> Value {
        let mut map = self.as_object().cloned().unwrap_or_default();
        map.insert(key.into(), value);
        Self::Object(Rc::new(map))
    }

    /// `Object.assign`-style update.
    ///
    /// When both `self` and `partial` are objects, returns a new object with
    /// `partial`'s fields laid over `self`'s. Otherwise `partial` replaces
    /// the value outright (returned as-is, identity preserved).
    #[must_use]
    pub fn shallow_merge(&self, partial: &Value) -> Value {
        match (self.as_object(), partial.as_object()) {
            (Some(current), Some(patch)) => {
                let mut map = current.clone();
                for (key, value) in patch {
                    map.insert(key.clone(), value.clone());
                }
                Self::Object(Rc::new(map))
            }
            _ => partial.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Conversions
// ---------------------------------------------------------------------------

impl From<bool> for Value {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl From<f64> for Value {
    fn from(value: f64) -> Self {
        Self::Number(value)
    }
}

macro_rules! impl_from_int {
    ($($ty:ty),*) => {
        $(
            impl From<$ty> for Value {
                fn from(value: $ty) -> Self {
                    Self::Number(value as f64)
                }
            }
        )*
    };
}

impl_from_int!(i32, i64, u32, u64, usize);

impl From<&str> for Value {
    fn from(value: &str) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<String> for Value {
    fn from(value: String) -> Self {
        Self::String(Rc::from(value))
    }
}

impl From<Vec<Value>> for Value {
    fn from(value: Vec<Value>) -> Self {
        Self::Array(Rc::new(value))
    }
}

impl From<Map> for Value {
    fn from(value: Map) -> Self {
        Self::Object(Rc::new(value))
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(value: Option<T>) -> Self {
        value.map_or(Self::Undefined, Into::into)
    }
}

#[cfg(feature = "json")]
impl From<serde_json::Value> for Value {
    fn from(value: serde_json::Value) -> Self {
        match value {
            serde_json::Value::Null => Self::Null,
            serde_json::Value::Bool(b) => Self::Bool(b),
            serde_json::Value::Number(n) => Self::Number(n.as_f64().unwrap_or(f64::NAN)),
            serde_json::Value::String(s) => Self::from(s),
            serde_json::Value::Array(items) => {
                Self::Array(Rc::new(items.into_iter().map(Self::from).collect()))
            }
            serde_json::Value::Object(map) => Self::Object(Rc::new(
                map.into_iter().map(|(k, v)| (k, Self::from(v))).collect(),
            )),
        }
    }
}

/// `Undefined` object fields are dropped; a top-level or array `Undefined`
/// becomes `null`. Integral numbers are emitted as JSON integers.
#[cfg(feature = "json")]
impl From<&Value> for serde_json::Value {
    fn from(value: &Value) -> Self {
        match value {
            Value::Undefined | Value::Null => Self::Null,
            Value::Bool(b) => Self::Bool(*b),
            Value::Number(n) => json_number(*n),
            Value::String(s) => Self::String(s.to_string()),
            Value::Array(items) => Self::Array(items.iter().map(Self::from).collect()),
            Value::Object(map) => Self::Object(
                map.iter()
                    .filter(|(_, v)| !v.is_undefined())
                    .map(|(k, v)| (k.clone(), Self::from(v)))
                    .collect(),
            ),
        }
    }
}

#[cfg(feature = "json")]
fn json_number(n: f64) -> serde_json::Value {
    const MAX_SAFE: f64 = 9_007_199_254_740_992.0;
    if n.fract() == 0.0 && n.abs() <= MAX_SAFE {
        serde_json::Value::Number(serde_json::Number::from(n as i64))
    } else {
        serde_json::Number::from_f64(n).map_or(serde_json::Value::Null, serde_json::Value::Number)
    }
}

// ---------------------------------------------------------------------------
// Display
// ---------------------------------------------------------------------------

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Undefined => f.write_str("undefined"),
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Number(n) if n.fract() == 0.0 && n.abs() < 1e15 => write!(f, "{}", *n as i64),
            Self::Number(n) => write!(f, "{n}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Array(items) => {
                f.write_str("[")?;
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{item}")?;
                }
                f.write_str("]")
            }
            Self::Object(map) => {
                f.write_str("{")?;
                for (i, (key, item)) in map.iter().enumerate() {
                    if i > 0 {
                        f.write_str(",")?;
                    }
                    write!(f, "{key:?}:{item}")?;
                }
                f.write_str("}")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
