//! Scalar parameter types.

use super::{bad_input, PipelineParam};
use crate::errors::RunError;
use crate::vars::Value;
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use std::fmt;

/// A UTF-8 string parameter.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StringParam(pub String);

impl StringParam {
    /// Borrows the string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StringParam {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl PipelineParam for StringParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::String(s) => Ok(Self(s)),
            Value::Bytes(b) => String::from_utf8(b)
                .map(Self)
                .map_err(|e| RunError::BadInput(format!("bytes are not UTF-8: {e}"))),
            other => Err(bad_input("string", &other)),
        }
    }
}

/// A byte-string parameter. Strings with a `0x` prefix are hex-decoded.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct BytesParam(pub Vec<u8>);

impl BytesParam {
    /// Borrows the bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl PipelineParam for BytesParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::Null => Ok(Self::default()),
            Value::Bytes(b) => Ok(Self(b)),
            Value::String(s) => {
                if let Some(decoded) = s.strip_prefix("0x").and_then(|h| hex::decode(h).ok()) {
                    return Ok(Self(decoded));
                }
                Ok(Self(s.into_bytes()))
            }
            other => Err(bad_input("bytes", &other)),
        }
    }
}

/// An unsigned 64-bit integer parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Uint64Param(pub u64);

impl PipelineParam for Uint64Param {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        let parsed = match &value {
            Value::Uint(u) => Some(*u),
            Value::Int(i) => u64::try_from(*i).ok(),
            Value::Float(f) => float_to_u64(*f),
            Value::Decimal(d) if d.fract().is_zero() => d.to_u64(),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        parsed
            .map(Self)
            .ok_or_else(|| bad_input("unsigned integer", &value))
    }
}

#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_sign_loss,
    clippy::cast_precision_loss
)]
fn float_to_u64(f: f64) -> Option<u64> {
    (f.fract() == 0.0 && f >= 0.0 && f <= u64::MAX as f64).then(|| f as u64)
}

/// An optional unsigned integer; null and the empty string mean unset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MaybeUint64Param(pub Option<u64>);

impl PipelineParam for MaybeUint64Param {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match &value {
            Value::Null => Ok(Self(None)),
            Value::String(s) if s.trim().is_empty() => Ok(Self(None)),
            _ => Uint64Param::unmarshal_param(value).map(|u| Self(Some(u.0))),
        }
    }
}

/// A boolean that distinguishes "not set" from `false`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaybeBoolParam {
    /// No value given.
    #[default]
    Unset,
    /// `true`.
    True,
    /// `false`.
    False,
}

impl MaybeBoolParam {
    /// Returns the boolean, or `None` if unset.
    #[must_use]
    pub fn as_bool(self) -> Option<bool> {
        match self {
            Self::Unset => None,
            Self::True => Some(true),
            Self::False => Some(false),
        }
    }
}

impl PipelineParam for MaybeBoolParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match &value {
            Value::Null => Ok(Self::Unset),
            Value::Bool(true) => Ok(Self::True),
            Value::Bool(false) => Ok(Self::False),
            Value::String(s) => match s.trim() {
                "" => Ok(Self::Unset),
                "true" => Ok(Self::True),
                "false" => Ok(Self::False),
                _ => Err(bad_input("bool", &value)),
            },
            _ => Err(bad_input("bool", &value)),
        }
    }
}

/// An arbitrary-precision decimal parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DecimalParam(pub Decimal);

impl DecimalParam {
    /// Returns the decimal.
    #[must_use]
    pub fn decimal(self) -> Decimal {
        self.0
    }
}

impl PipelineParam for DecimalParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        value
            .to_decimal()
            .map(Self)
            .ok_or_else(|| bad_input("decimal", &value))
    }
}

/// An absolute URL parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UrlParam(pub url::Url);

impl PipelineParam for UrlParam {
    fn unmarshal_param(value: Value) -> Result<Self, RunError> {
        match value {
            Value::String(s) => url::Url::parse(s.trim())
                .map(Self)
                .map_err(|e| RunError::BadInput(format!("invalid URL '{s}': {e}"))),
            other => Err(bad_input("URL string", &other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_string_param() {
        assert_eq!(
            StringParam::unmarshal_param(Value::from("x")).unwrap().as_str(),
            "x"
        );
        assert_eq!(
            StringParam::unmarshal_param(Value::Bytes(b"hi".to_vec())).unwrap().as_str(),
            "hi"
        );
        assert!(StringParam::unmarshal_param(Value::Int(1)).is_err());
        assert!(StringParam::unmarshal_param(Value::Map(Default::default())).is_err());
    }

    #[test]
    fn test_bytes_param_hex() {
        assert_eq!(
            BytesParam::unmarshal_param(Value::from("0xdeadbeef")).unwrap().as_bytes(),
            &[0xde, 0xad, 0xbe, 0xef]
        );
        assert_eq!(
            BytesParam::unmarshal_param(Value::from("0xnothex")).unwrap().as_bytes(),
            b"0xnothex"
        );
        assert_eq!(
            BytesParam::unmarshal_param(Value::Null).unwrap(),
            BytesParam::default()
        );
    }

    #[test]
    fn test_uint64_param_widths() {
        assert_eq!(Uint64Param::unmarshal_param(Value::from(7u8)).unwrap().0, 7);
        assert_eq!(Uint64Param::unmarshal_param(Value::from(7i32)).unwrap().0, 7);
        assert_eq!(Uint64Param::unmarshal_param(Value::from(7.0f64)).unwrap().0, 7);
        assert_eq!(Uint64Param::unmarshal_param(Value::from(" 7 ")).unwrap().0, 7);
        assert_eq!(
            Uint64Param::unmarshal_param(Value::Decimal(Decimal::from(7))).unwrap().0,
            7
        );
        assert!(Uint64Param::unmarshal_param(Value::from(-1i64)).is_err());
        assert!(Uint64Param::unmarshal_param(Value::from(1.5f64)).is_err());
        assert!(Uint64Param::unmarshal_param(Value::List(vec![])).is_err());
    }

    #[test]
    fn test_maybe_uint64_param() {
        assert_eq!(MaybeUint64Param::unmarshal_param(Value::Null).unwrap().0, None);
        assert_eq!(MaybeUint64Param::unmarshal_param(Value::from("")).unwrap().0, None);
        assert_eq!(MaybeUint64Param::unmarshal_param(Value::from("3")).unwrap().0, Some(3));
    }

    #[test]
    fn test_maybe_bool_param() {
        assert_eq!(
            MaybeBoolParam::unmarshal_param(Value::from("true")).unwrap(),
            MaybeBoolParam::True
        );
        assert_eq!(
            MaybeBoolParam::unmarshal_param(Value::Bool(false)).unwrap().as_bool(),
            Some(false)
        );
        assert_eq!(
            MaybeBoolParam::unmarshal_param(Value::from("")).unwrap(),
            MaybeBoolParam::Unset
        );
        assert!(MaybeBoolParam::unmarshal_param(Value::from("yes")).is_err());
    }

    #[test]
    fn test_decimal_param_is_permissive_about_representation() {
        let expected = Decimal::new(125, 2);
        assert_eq!(DecimalParam::unmarshal_param(Value::from("1.25")).unwrap().decimal(), expected);
        assert_eq!(DecimalParam::unmarshal_param(Value::from(1.25f32)).unwrap().decimal(), expected);
        assert_eq!(
            DecimalParam::unmarshal_param(Value::Decimal(expected)).unwrap().decimal(),
            expected
        );
        assert!(DecimalParam::unmarshal_param(Value::List(vec![Value::Int(1)])).is_err());
        assert!(DecimalParam::unmarshal_param(Value::Bool(true)).is_err());
    }

    #[test]
    fn test_url_param() {
        let url = UrlParam::unmarshal_param(Value::from("https://example.com/a")).unwrap();
        assert_eq!(url.0.host_str(), Some("example.com"));
        assert!(UrlParam::unmarshal_param(Value::from("not a url")).is_err());
    }
}
