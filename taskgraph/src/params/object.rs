//! A tagged union over the JSON-like value kinds.

use super::{bad_input, PipelineParam};
use crate::errors::RunError;
use crate::vars::Value;
use rust_decimal::Decimal;
use serde::ser::{SerializeMap, SerializeSeq};
use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// A parameter that accepts nil, booleans, decimals, strings, sequences and
/// maps, recursively.
///
/// Bytes and error values are rejected: bytes must be encoded explicitly
/// (for example to hex) before they can be carried here.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ObjectParam {
    /// No value.
    #[default]
    Nil,
    /// Boolean.
    Bool(bool),
    /// Any numeric value.
    Decimal(Decimal),
    /// String.
    String(String),
    /// Sequence.
    Slice(Vec<ObjectParam>),
    /// String-keyed map.
    Map(BTreeMap<String, ObjectParam>),
}

impl ObjectParam {
    /// Returns the variant name.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Bool(_) => "bool",
            Self::Decimal(_) => "decimal",
            Self::String(_) => "string",
            Self::Slice(_) => "slice",
            Self::Map(_) => "map",
        }
    }
}

impl PipelineParam for ObjectParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::Null => Ok(Self::Nil),
            Value::Bool(b) => Ok(Self::Bool(b)),
            Value::String(s) => Ok(Self::String(s)),
            v @ (Value::Int(_) | Value::Uint(_) | Value::Float(_) | Value::Decimal(_)) => v
                .to_decimal()
                .map(Self::Decimal)
                .ok_or_else(|| bad_input("finite number", &v)),
            Value::List(items) => items
                .into_iter()
                .map(Self::unmarshal_param)
                .collect::<Result<_, _>>()
                .map(Self::Slice),
            Value::Map(entries) => entries
                .into_iter()
                .map(|(k, v)| Self::unmarshal_param(v).map(|v| (k, v)))
                .collect::<Result<_, _>>()
                .map(Self::Map),
            other => Err(bad_input("object", &other)),
        }
    }
}

impl From<ObjectParam> for Value {
    fn from(o: ObjectParam) -> Self {
        match o {
            ObjectParam::Nil => Self::Null,
            ObjectParam::Bool(b) => Self::Bool(b),
            ObjectParam::Decimal(d) => Self::Decimal(d),
            ObjectParam::String(s) => Self::String(s),
            ObjectParam::Slice(items) => Self::List(items.into_iter().map(Self::from).collect()),
            ObjectParam::Map(entries) => {
                Self::Map(entries.into_iter().map(|(k, v)| (k, Self::from(v))).collect())
            }
        }
    }
}

impl Serialize for ObjectParam {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Nil => serializer.serialize_unit(),
            Self::Bool(b) => serializer.serialize_bool(*b),
            Self::Decimal(d) => serializer.serialize_str(&d.to_string()),
            Self::String(s) => serializer.serialize_str(s),
            Self::Slice(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
            Self::Map(entries) => {
                let mut map = serializer.serialize_map(Some(entries.len()))?;
                for (k, v) in entries {
                    map.serialize_entry(k, v)?;
                }
                map.end()
            }
        }
    }
}

impl fmt::Display for ObjectParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("nil"),
            Self::Bool(b) => write!(f, "{b}"),
            Self::Decimal(d) => write!(f, "{d}"),
            Self::String(s) => f.write_str(s),
            composite => match serde_json::to_string(composite) {
                Ok(text) => f.write_str(&text),
                Err(_) => write!(f, "<{}>", composite.kind()),
            },
        }
    }
}
