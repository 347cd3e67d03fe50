//! Map and sequence parameter types.

use super::{bad_input, PipelineParam};
use crate::errors::RunError;
use crate::vars::Value;
use rust_decimal::Decimal;
use std::collections::BTreeMap;

/// Parses JSON carried in a string or byte value.
fn json_text(value: Value, expected: &str) -> Result<Value, RunError> {
    let text = match value {
        Value::String(s) => s,
        Value::Bytes(b) => String::from_utf8(b)
            .map_err(|e| RunError::BadInput(format!("bytes are not UTF-8: {e}")))?,
        other => return Err(bad_input(expected, &other)),
    };
    Value::from_json_str(&text)
}

/// A string-keyed map parameter. JSON object text is accepted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MapParam(pub BTreeMap<String, Value>);

impl PipelineParam for MapParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Map(m) => Ok(Self(m)),
            text @ (Value::String(_) | Value::Bytes(_)) => match json_text(text, "map")? {
                Value::Null => Ok(Self::default()),
                Value::Map(m) => Ok(Self(m)),
                other => Err(bad_input("map", &other)),
            },
            other => Err(bad_input("map", &other)),
        }
    }
}

/// A heterogeneous sequence parameter. JSON array text is accepted.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct SliceParam(pub Vec<Value>);

impl SliceParam {
    /// Drops error values, returning the remainder and how many were dropped.
    #[must_use]
    pub fn filter_errors(self) -> (Self, usize) {
        let total = self.0.len();
        let kept: Vec<Value> = self
            .0
            .into_iter()
            .filter(|v| !matches!(v, Value::Error(_)))
            .collect();
        let faults = total - kept.len();
        (Self(kept), faults)
    }

    /// Returns the number of elements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns true if there are no elements.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl PipelineParam for SliceParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::List(items) => Ok(Self(items)),
            text @ (Value::String(_) | Value::Bytes(_)) => match json_text(text, "slice")? {
                Value::Null => Ok(Self::default()),
                Value::List(items) => Ok(Self(items)),
                other => Err(bad_input("slice", &other)),
            },
            other => Err(bad_input("slice", &other)),
        }
    }
}

/// A sequence of decimals.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DecimalSliceParam(pub Vec<Decimal>);

impl PipelineParam for DecimalSliceParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        let SliceParam(items) = SliceParam::unmarshal_param(value)?;
        items
            .into_iter()
            .map(|item| item.to_decimal().ok_or_else(|| bad_input("decimal", &item)))
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

/// A sequence of strings.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringSliceParam(pub Vec<String>);

impl PipelineParam for StringSliceParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        let SliceParam(items) = SliceParam::unmarshal_param(value)?;
        items
            .into_iter()
            .map(|item| match item {
                Value::String(s) => Ok(s),
                other => Err(bad_input("string", &other)),
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }
}

/// A JSON path: a comma-separated list of keys and indices.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct JsonPathParam(pub Vec<String>);

impl PipelineParam for JsonPathParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::String(s) if s.is_empty() => Ok(Self::default()),
            Value::String(s) => Ok(Self(s.split(',').map(str::to_string).collect())),
            Value::Bytes(b) => {
                let s = String::from_utf8(b)
                    .map_err(|e| RunError::BadInput(format!("bytes are not UTF-8: {e}")))?;
                Self::unmarshal_param(Value::String(s))
            }
            Value::List(items) => StringSliceParam::unmarshal_param(Value::List(items))
                .map(|StringSliceParam(parts)| Self(parts)),
            other => Err(bad_input("JSON path", &other)),
        }
    }
}
