//! Native/wire body conversion.
//!
//! Native bodies use `dash-case` keys and plain values; wire bodies use
//! `CamelCase` keys and wrap attribute values in their type tag. The
//! [`Marshaller`] walks a body once in either direction:
//!
//! - every map key is renamed, except the direct children of a *verbatim*
//!   key (table or attribute names) and attribute names inside a value subtree;
//! - the subtree under a *value* key is converted to or from attribute
//!   values;
//! - a halt predicate, checked on every node, stops the descent into a
//!   subtree that is already in the target form.

use std::collections::{BTreeMap, BTreeSet};

use bigdecimal::{BigDecimal, ToPrimitive};
use serde_json::{Map, Number, Value as Json};

use crate::attribute_value::AttributeValue;
use crate::value::{Value, parse_decimal};

/// Errors raised while marshalling a body.
#[derive(Debug, thiserror::Error)]
pub enum MarshalError {
    /// A native value has no wire attribute type.
    #[error("cannot infer a wire type for {kind} value {value}")]
    UntypeableValue {
        /// Shape of the offending value.
        kind: &'static str,
        /// Rendering of the offending value.
        value: String,
    },

    /// A number could not be parsed as a decimal.
    #[error("invalid decimal number: {0}")]
    InvalidNumber(String),

    /// A wire value under a value key is not an attribute value.
    #[error("malformed attribute value: {0}")]
    MalformedAttribute(String),

    /// The body is not valid JSON.
    #[error("malformed JSON body: {0}")]
    Json(#[from] serde_json::Error),
}

impl MarshalError {
    pub(crate) fn untypeable(value: &Value) -> Self {
        Self::UntypeableValue {
            kind: value.kind(),
            value: value.to_string(),
        }
    }
}

/// Predicate on native values that stops the descent.
pub type NativeHalt = fn(&Value) -> bool;

/// Predicate on wire values that stops the descent.
pub type WireHalt = fn(&Json) -> bool;

/// Value keys unwrapped in responses when the caller does not say otherwise.
pub const DEFAULT_VALUE_KEYS: [&str; 5] = [
    "item",
    "items",
    "hash-key-element",
    "range-key-element",
    "attributes",
];

/// Keys whose direct children are user-chosen names: table names, or the
/// attribute names of a conditional write.
pub const DEFAULT_VERBATIM_KEYS: [&str; 5] = [
    "expected",
    "request-items",
    "responses",
    "unprocessed-items",
    "unprocessed-keys",
];

/// Bidirectional body converter.
///
/// Keys are configured in native spelling; wire keys are compared after
/// conversion to native spelling.
#[derive(Debug, Clone)]
pub struct Marshaller {
    value_keys: BTreeSet<String>,
    verbatim_keys: BTreeSet<String>,
    halt_native: NativeHalt,
    halt_wire: WireHalt,
}

impl Default for Marshaller {
    fn default() -> Self {
        Self::new(DEFAULT_VALUE_KEYS)
    }
}

impl Marshaller {
    /// Create a marshaller converting the subtrees under `value_keys`.
    pub fn new<I, K>(value_keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        Self {
            value_keys: value_keys.into_iter().map(Into::into).collect(),
            verbatim_keys: DEFAULT_VERBATIM_KEYS.iter().map(|k| (*k).to_owned()).collect(),
            halt_native: Value::is_attribute,
            halt_wire: AttributeValue::is_wire_shaped,
        }
    }

    /// Replace the verbatim key set.
    #[must_use]
    pub fn with_verbatim_keys<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        self.verbatim_keys = keys.into_iter().map(Into::into).collect();
        self
    }

    /// Replace the predicate that stops the native to wire descent.
    #[must_use]
    pub fn with_native_halt(mut self, halt: NativeHalt) -> Self {
        self.halt_native = halt;
        self
    }

    /// Replace the predicate that stops the wire to native descent.
    #[must_use]
    pub fn with_wire_halt(mut self, halt: WireHalt) -> Self {
        self.halt_wire = halt;
        self
    }

    /// The configured value keys, in native spelling.
    #[must_use]
    pub fn value_keys(&self) -> &BTreeSet<String> {
        &self.value_keys
    }

    /// Convert a native body to its wire form.
    pub fn to_wire(&self, body: &Value) -> Result<Json, MarshalError> {
        self.native_node(body, false)
    }

    /// Convert a wire body to its native form.
    pub fn from_wire(&self, body: &Json) -> Result<Value, MarshalError> {
        self.wire_node(body, false)
    }

    /// Parse raw bytes as JSON, then convert to native form.
    pub fn from_wire_slice(&self, bytes: &[u8]) -> Result<Value, MarshalError> {
        let json: Json = serde_json::from_slice(bytes)?;
        self.from_wire(&json)
    }

    fn native_node(&self, node: &Value, verbatim_children: bool) -> Result<Json, MarshalError> {
        if (self.halt_native)(node) {
            return native_halted(node);
        }
        Ok(match node {
            Value::Null => Json::Null,
            Value::Bool(b) => Json::Bool(*b),
            Value::String(s) => Json::String(s.clone()),
            Value::Number(n) => decimal_to_json(n),
            Value::StringSet(set) => Json::Array(set.iter().cloned().map(Json::String).collect()),
            Value::NumberSet(set) => Json::Array(set.iter().map(decimal_to_json).collect()),
            Value::List(list) => Json::Array(
                list.iter()
                    .map(|v| self.native_node(v, false))
                    .collect::<Result<_, _>>()?,
            ),
            Value::Map(map) => {
                let mut out = Map::with_capacity(map.len());
                for (key, child) in map {
                    if verbatim_children {
                        out.insert(key.clone(), self.native_node(child, false)?);
                        continue;
                    }
                    let name = key.strip_prefix(':').unwrap_or(key);
                    let converted = if self.value_keys.contains(name) {
                        self.native_value_subtree(child)?
                    } else {
                        self.native_node(child, self.verbatim_keys.contains(name))?
                    };
                    out.insert(to_wire_key(name), converted);
                }
                Json::Object(out)
            }
            Value::Attribute(_) => native_halted(node)?,
        })
    }

    /// Everything under a value key: an item map, a list of items, or a
    /// single attribute.
    fn native_value_subtree(&self, node: &Value) -> Result<Json, MarshalError> {
        if (self.halt_native)(node) {
            return native_halted(node);
        }
        match node {
            Value::Map(item) => {
                let mut out = Map::with_capacity(item.len());
                for (name, attr) in item {
                    out.insert(name.clone(), self.native_attribute(attr)?);
                }
                Ok(Json::Object(out))
            }
            Value::List(list) => Ok(Json::Array(
                list.iter()
                    .map(|v| self.native_value_subtree(v))
                    .collect::<Result<_, _>>()?,
            )),
            other => self.native_attribute(other),
        }
    }

    fn native_attribute(&self, node: &Value) -> Result<Json, MarshalError> {
        if (self.halt_native)(node) {
            return native_halted(node);
        }
        let attribute = AttributeValue::try_from(node)?;
        Ok(serde_json::to_value(attribute)?)
    }

    fn wire_node(&self, node: &Json, verbatim_children: bool) -> Result<Value, MarshalError> {
        Ok(match node {
            Json::Null => Value::Null,
            Json::Bool(b) => Value::Bool(*b),
            Json::String(s) => Value::String(s.clone()),
            Json::Number(n) => Value::Number(parse_decimal(&n.to_string())?),
            Json::Array(list) => Value::List(
                list.iter()
                    .map(|v| self.wire_node(v, false))
                    .collect::<Result<_, _>>()?,
            ),
            Json::Object(map) => {
                let mut out = BTreeMap::new();
                for (key, child) in map {
                    if verbatim_children {
                        out.insert(key.clone(), self.wire_node(child, false)?);
                        continue;
                    }
                    let name = to_native_key(key);
                    let converted = if self.value_keys.contains(&name) {
                        self.wire_value_subtree(child)?
                    } else {
                        self.wire_node(child, self.verbatim_keys.contains(&name))?
                    };
                    out.insert(name, converted);
                }
                Value::Map(out)
            }
        })
    }

    fn wire_value_subtree(&self, node: &Json) -> Result<Value, MarshalError> {
        if (self.halt_wire)(node) {
            let attribute: AttributeValue = serde_json::from_value(node.clone())?;
            return Value::from_attribute(attribute);
        }
        match node {
            Json::Object(item) => {
                let mut out = BTreeMap::new();
                for (name, attr) in item {
                    out.insert(name.clone(), self.wire_value_subtree(attr)?);
                }
                Ok(Value::Map(out))
            }
            Json::Array(list) => Ok(Value::List(
                list.iter()
                    .map(|v| self.wire_value_subtree(v))
                    .collect::<Result<_, _>>()?,
            )),
            other => Err(MarshalError::MalformedAttribute(other.to_string())),
        }
    }
}

fn native_halted(node: &Value) -> Result<Json, MarshalError> {
    match node {
        Value::Attribute(av) => Ok(serde_json::to_value(av)?),
        other => Err(MarshalError::untypeable(other)),
    }
}

/// Numbers outside value subtrees (capacity units, limits) are plain JSON
/// numbers. Decimals that fit neither `i64`/`u64` nor `f64` stay strings.
fn decimal_to_json(n: &BigDecimal) -> Json {
    if n.is_integer() {
        if let Some(i) = n.to_i64() {
            return Json::Number(i.into());
        }
        if let Some(u) = n.to_u64() {
            return Json::Number(u.into());
        }
    }
    n.to_f64()
        .and_then(Number::from_f64)
        .map_or_else(|| Json::String(n.to_string()), Json::Number)
}

/// Convert a native `dash-case` key to wire `CamelCase`.
///
/// A leading `:` is dropped, so `:hash-key-element` and `hash-key-element`
/// both become `HashKeyElement`. A segment that does not start with a
/// lowercase letter keeps its dash (`level-1` becomes `Level-1`), so
/// [`to_native_key`] can restore it.
#[must_use]
pub fn to_wire_key(key: &str) -> String {
    let key = key.strip_prefix(':').unwrap_or(key);
    let mut out = String::with_capacity(key.len());
    for (i, segment) in key.split('-').enumerate() {
        let mut chars = segment.chars();
        match chars.next() {
            Some(first) if first.is_lowercase() => {
                out.extend(first.to_uppercase());
                out.push_str(chars.as_str());
            }
            _ => {
                if i > 0 {
                    out.push('-');
                }
                out.push_str(segment);
            }
        }
    }
    out
}

/// Convert a wire `CamelCase` key to native `dash-case`.
///
/// Dashes already present are copied through.
#[must_use]
pub fn to_native_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    for (i, c) in key.chars().enumerate() {
        if c.is_uppercase() {
            if i > 0 {
                out.push('-');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
    }
    out
}
