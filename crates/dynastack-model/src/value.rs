//! Native structured values.
//!
//! A [`Value`] is what callers build and read: plain strings, arbitrary
//! precision decimals, and sets of either, nested in maps and lists. Only the
//! four scalar/set shapes can become an [`AttributeValue`]; everything else
//! is structure around them.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use bigdecimal::BigDecimal;

use crate::attribute_value::AttributeValue;
use crate::marshal::MarshalError;

/// A native item: attribute name to native value.
pub type Item = BTreeMap<String, Value>;

/// A native structured value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Value {
    /// Absent value.
    Null,
    /// Boolean flag (structural only, never an attribute).
    Bool(bool),
    /// UTF-8 string.
    String(String),
    /// Arbitrary precision decimal.
    Number(BigDecimal),
    /// Set of strings.
    StringSet(BTreeSet<String>),
    /// Set of decimals.
    NumberSet(BTreeSet<BigDecimal>),
    /// Ordered list.
    List(Vec<Value>),
    /// String-keyed map.
    Map(BTreeMap<String, Value>),
    /// A value that is already in wire form and must pass through untouched.
    Attribute(AttributeValue),
}

/// The wire tag a native value classifies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WireTag {
    /// `S`
    S,
    /// `N`
    N,
    /// `SS`
    Ss,
    /// `NS`
    Ns,
}

impl WireTag {
    /// Classify a native value.
    ///
    /// Total over the four attribute shapes; every other shape is rejected
    /// with [`MarshalError::UntypeableValue`].
    pub fn infer(value: &Value) -> Result<Self, MarshalError> {
        match value {
            Value::String(_) => Ok(Self::S),
            Value::Number(_) => Ok(Self::N),
            Value::StringSet(_) => Ok(Self::Ss),
            Value::NumberSet(_) => Ok(Self::Ns),
            Value::Attribute(av) => Ok(Self::of(av)),
            Value::Null | Value::Bool(_) | Value::List(_) | Value::Map(_) => {
                Err(MarshalError::untypeable(value))
            }
        }
    }

    /// The tag of an attribute value.
    #[must_use]
    pub fn of(value: &AttributeValue) -> Self {
        match value {
            AttributeValue::S(_) => Self::S,
            AttributeValue::N(_) => Self::N,
            AttributeValue::Ss(_) => Self::Ss,
            AttributeValue::Ns(_) => Self::Ns,
        }
    }

    /// The tag as written on the wire.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::S => "S",
            Self::N => "N",
            Self::Ss => "SS",
            Self::Ns => "NS",
        }
    }
}

impl fmt::Display for WireTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Value {
    /// Human-readable name of this value's shape.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Null => "null",
            Self::Bool(_) => "bool",
            Self::String(_) => "string",
            Self::Number(_) => "number",
            Self::StringSet(_) => "string set",
            Self::NumberSet(_) => "number set",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Attribute(_) => "attribute value",
        }
    }

    /// Returns `true` if this value is already in wire form.
    #[must_use]
    pub fn is_attribute(&self) -> bool {
        matches!(self, Self::Attribute(_))
    }

    /// Parse a decimal from its string form.
    pub fn number(repr: &str) -> Result<Self, MarshalError> {
        parse_decimal(repr).map(Self::Number)
    }

    /// Build a string set.
    pub fn string_set<I, S>(items: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::StringSet(items.into_iter().map(Into::into).collect())
    }

    /// Build a number set.
    pub fn number_set<I>(items: I) -> Self
    where
        I: IntoIterator<Item = BigDecimal>,
    {
        Self::NumberSet(items.into_iter().collect())
    }

    /// Build a map from `(key, value)` pairs.
    pub fn map<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::Map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    /// Returns the string if this is a `String`.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Returns the map if this is a `Map`.
    #[must_use]
    pub fn as_map(&self) -> Option<&BTreeMap<String, Value>> {
        match self {
            Self::Map(m) => Some(m),
            _ => None,
        }
    }

    /// Returns the list if this is a `List`.
    #[must_use]
    pub fn as_list(&self) -> Option<&[Value]> {
        match self {
            Self::List(l) => Some(l),
            _ => None,
        }
    }

    /// Convert a wire attribute value to its native form.
    ///
    /// Fails with [`MarshalError::InvalidNumber`] when an `N` or `NS` member
    /// is not a decimal.
    pub fn from_attribute(value: AttributeValue) -> Result<Self, MarshalError> {
        Ok(match value {
            AttributeValue::S(s) => Self::String(s),
            AttributeValue::N(n) => Self::Number(parse_decimal(&n)?),
            AttributeValue::Ss(v) => Self::StringSet(v.into_iter().collect()),
            AttributeValue::Ns(v) => Self::NumberSet(
                v.iter()
                    .map(|n| parse_decimal(n))
                    .collect::<Result<_, _>>()?,
            ),
        })
    }

    /// Look up `key` if this is a `Map`.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.as_map().and_then(|m| m.get(key))
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => f.write_str("null"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::String(s) => write!(f, "{s:?}"),
            Self::Number(n) => write!(f, "{n}"),
            Self::StringSet(set) => write_seq(f, "#{", set.iter().map(|s| format!("{s:?}")), "}"),
            Self::NumberSet(set) => write_seq(f, "#{", set.iter().map(ToString::to_string), "}"),
            Self::List(list) => write_seq(f, "[", list.iter().map(ToString::to_string), "]"),
            Self::Map(map) => write_seq(
                f,
                "{",
                map.iter().map(|(k, v)| format!("{k:?}: {v}")),
                "}",
            ),
            Self::Attribute(av) => write!(f, "{av}"),
        }
    }
}

fn write_seq(
    f: &mut fmt::Formatter<'_>,
    open: &str,
    items: impl Iterator<Item = String>,
    close: &str,
) -> fmt::Result {
    f.write_str(open)?;
    for (i, item) in items.enumerate() {
        if i > 0 {
            f.write_str(", ")?;
        }
        f.write_str(&item)?;
    }
    f.write_str(close)
}

/// Primary key of an item: a hash element and an optional range element.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemKey {
    /// Hash key element.
    pub hash: Value,
    /// Range key element, for tables with a composite key.
    pub range: Option<Value>,
}

impl ItemKey {
    /// A hash-only key.
    pub fn hash(hash: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: None,
        }
    }

    /// A composite key.
    pub fn composite(hash: impl Into<Value>, range: impl Into<Value>) -> Self {
        Self {
            hash: hash.into(),
            range: Some(range.into()),
        }
    }

    /// The key as a native map with `hash-key-element`/`range-key-element`.
    #[must_use]
    pub fn to_native(&self) -> Value {
        let mut map = BTreeMap::new();
        map.insert("hash-key-element".to_owned(), self.hash.clone());
        if let Some(range) = &self.range {
            map.insert("range-key-element".to_owned(), range.clone());
        }
        Value::Map(map)
    }
}

pub(crate) fn parse_decimal(repr: &str) -> Result<BigDecimal, MarshalError> {
    BigDecimal::from_str(repr).map_err(|_| MarshalError::InvalidNumber(repr.to_owned()))
}

impl TryFrom<&Value> for AttributeValue {
    type Error = MarshalError;

    fn try_from(value: &Value) -> Result<Self, Self::Error> {
        if let Value::Attribute(av) = value {
            return Ok(av.clone());
        }
        let converted = match (WireTag::infer(value)?, value) {
            (WireTag::S, Value::String(s)) => Self::S(s.clone()),
            (WireTag::N, Value::Number(n)) => Self::N(n.to_string()),
            (WireTag::Ss, Value::StringSet(set)) => Self::Ss(set.iter().cloned().collect()),
            (WireTag::Ns, Value::NumberSet(set)) => {
                Self::Ns(set.iter().map(ToString::to_string).collect())
            }
            _ => return Err(MarshalError::untypeable(value)),
        };
        Ok(converted)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Number(BigDecimal::from(n))
    }
}

impl From<u64> for Value {
    fn from(n: u64) -> Self {
        Self::Number(BigDecimal::from(n))
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Number(BigDecimal::from(n))
    }
}

impl From<BigDecimal> for Value {
    fn from(n: BigDecimal) -> Self {
        Self::Number(n)
    }
}

impl From<AttributeValue> for Value {
    fn from(av: AttributeValue) -> Self {
        Self::Attribute(av)
    }
}

impl From<Item> for Value {
    fn from(item: Item) -> Self {
        Self::Map(item)
    }
}

impl From<Vec<Value>> for Value {
    fn from(list: Vec<Value>) -> Self {
        Self::List(list)
    }
}
