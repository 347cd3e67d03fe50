//! Getters: zero-argument functions yielding a value or an error.
//!
//! Tasks list getters in priority order and hand them to
//! [`resolve_param`](super::resolve_param); the first one that yields a value
//! wins.

use crate::errors::RunError;
use crate::tasks::TaskResult;
use crate::utils::parse_duration;
use crate::vars::{Value, Vars};
use regex::Regex;
use rust_decimal::Decimal;
use std::sync::LazyLock;

/// Key of the placeholder object a `$(keypath)` expression is rewritten to
/// before JSON parsing.
const KEYPATH_PLACEHOLDER: &str = "__taskgraph_key_path__";

static VARIABLE_RE: LazyLock<Regex> = LazyLock::new(|| {
    #[allow(clippy::expect_used)]
    Regex::new(r"\$\(\s*([a-zA-Z0-9_\.]+)\s*\)").expect("variable expression regex is valid")
});

/// Returns the keypath of every `$(keypath)` expression in `text`.
pub(crate) fn variable_references(text: &str) -> impl Iterator<Item = &str> {
    VARIABLE_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
}

/// One way of producing a parameter value.
pub struct Getter<'a>(Box<dyn Fn() -> Result<Value, RunError> + 'a>);

impl<'a> Getter<'a> {
    /// Wraps a closure.
    pub fn new<F>(f: F) -> Self
    where
        F: Fn() -> Result<Value, RunError> + 'a,
    {
        Self(Box::new(f))
    }

    /// A getter that always yields the given value.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        let value = value.into();
        Self::new(move || Ok(value.clone()))
    }

    /// Runs the getter.
    ///
    /// # Errors
    ///
    /// Returns whatever error the underlying source produced.
    pub fn get(&self) -> Result<Value, RunError> {
        (self.0)()
    }
}

impl std::fmt::Debug for Getter<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Getter")
    }
}

macro_rules! impl_literal_getter {
    ($($t:ty),*) => {
        $(impl<'a> From<$t> for Getter<'a> {
            fn from(v: $t) -> Self {
                Self::literal(v)
            }
        })*
    };
}

impl_literal_getter!(Value, &str, String, bool, i64, u64, Decimal);

/// Builds an ordered list of getters from getters and bare literals.
///
/// ```
/// use taskgraph::getters;
/// use taskgraph::params::{non_empty_string, resolve_param, StringParam};
///
/// let got: StringParam = resolve_param(&getters![non_empty_string("  "), "fallback"]).unwrap();
/// assert_eq!(got.as_str(), "fallback");
/// ```
#[macro_export]
macro_rules! getters {
    ($($g:expr),* $(,)?) => {
        vec![$($crate::params::Getter::from($g)),*]
    };
}

/// Yields the string unless it is blank.
#[must_use]
pub fn non_empty_string(s: &str) -> Getter<'_> {
    Getter::new(move || {
        if s.trim().is_empty() {
            Err(RunError::ParameterEmpty)
        } else {
            Ok(Value::from(s))
        }
    })
}

/// Yields the value of one upstream result, propagating its error.
#[must_use]
pub fn input(inputs: &[TaskResult], index: usize) -> Getter<'_> {
    Getter::new(move || {
        let result = inputs.get(index).ok_or_else(|| {
            RunError::IndexOutOfRange(format!("input {index} of {}", inputs.len()))
        })?;
        result.as_result().cloned().map_err(Clone::clone)
    })
}

/// Yields every upstream result as a list; errors become error values.
#[must_use]
pub fn inputs(inputs: &[TaskResult]) -> Getter<'_> {
    Getter::new(move || {
        Ok(Value::List(
            inputs.iter().cloned().map(TaskResult::into_value).collect(),
        ))
    })
}

/// Yields the variable addressed by a single `$(keypath)` expression.
///
/// Anything that is not exactly one well-formed expression is treated as
/// empty so the next getter is tried.
#[must_use]
pub fn var_expr<'a>(expr: &'a str, vars: &'a Vars) -> Getter<'a> {
    Getter::new(move || {
        let trimmed = expr.trim();
        let is_var_expr = trimmed.len() >= 3
            && trimmed.matches('$').count() == 1
            && trimmed.starts_with("$(")
            && trimmed.ends_with(')');
        if !is_var_expr {
            return Err(RunError::ParameterEmpty);
        }

        let keypath = trimmed[2..trimmed.len() - 1].trim();
        if keypath.is_empty() {
            return Err(RunError::ParameterEmpty);
        }

        match vars.get(keypath)? {
            Value::Error(err) => Err(RunError::TooManyErrors(format!("var_expr: {err}"))),
            value => Ok(value),
        }
    })
}

/// Yields a JSON literal with every `$(keypath)` placeholder substituted.
///
/// A substituted value that records an error is rejected unless
/// `allow_errors` is set, in which case it is embedded as-is.
#[must_use]
pub fn json_with_var_exprs<'a>(text: &'a str, vars: &'a Vars, allow_errors: bool) -> Getter<'a> {
    Getter::new(move || {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(RunError::ParameterEmpty);
        }

        let replaced = VARIABLE_RE.replace_all(trimmed, |caps: &regex::Captures<'_>| {
            format!(r#"{{"{KEYPATH_PLACEHOLDER}":"{}"}}"#, &caps[1])
        });
        let parsed: serde_json::Value = serde_json::from_str(&replaced).map_err(|e| {
            RunError::BadInput(format!("while unmarshalling JSON: {e}; js: {trimmed}"))
        })?;

        substitute(parsed, vars, allow_errors)
    })
}

fn substitute(json: serde_json::Value, vars: &Vars, allow_errors: bool) -> Result<Value, RunError> {
    match json {
        serde_json::Value::Object(map) => {
            if let Some(serde_json::Value::String(keypath)) = map.get(KEYPATH_PLACEHOLDER) {
                return match vars.get(keypath)? {
                    Value::Error(err) if !allow_errors => {
                        Err(RunError::BadInput(format!("error is not allowed: {err}")))
                    }
                    value => Ok(value),
                };
            }
            map.into_iter()
                .map(|(k, v)| substitute(v, vars, allow_errors).map(|v| (k, v)))
                .collect::<Result<_, _>>()
                .map(Value::Map)
        }
        serde_json::Value::Array(items) => items
            .into_iter()
            .map(|v| substitute(v, vars, allow_errors))
            .collect::<Result<_, _>>()
            .map(Value::List),
        other => Ok(Value::from(other)),
    }
}

/// Yields the trimmed duration text if it parses as a duration.
#[must_use]
pub fn valid_duration(s: &str) -> Getter<'_> {
    Getter::new(move || {
        let trimmed = s.trim();
        if trimmed.is_empty() {
            return Err(RunError::ParameterEmpty);
        }
        parse_duration(trimmed)
            .map(|_| Value::from(trimmed))
            .map_err(RunError::BadInput)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::collections::BTreeMap;

    fn vars() -> Vars {
        let mut vars = Vars::new();
        vars.set("foo", Value::Int(42)).unwrap();
        let mut nested = BTreeMap::new();
        nested.insert("bar".to_string(), Value::from("baz"));
        vars.set("obj", Value::Map(nested)).unwrap();
        vars.set("broken", Value::Error(RunError::Timeout)).unwrap();
        vars
    }

    #[test]
    fn test_non_empty_string() {
        assert_eq!(non_empty_string("x").get().unwrap(), Value::from("x"));
        assert_eq!(non_empty_string(" \t").get(), Err(RunError::ParameterEmpty));
    }

    #[test]
    fn test_input_getter() {
        let results = vec![TaskResult::ok(1i64), TaskResult::err(RunError::Timeout)];
        assert_eq!(input(&results, 0).get().unwrap(), Value::Int(1));
        assert_eq!(input(&results, 1).get(), Err(RunError::Timeout));
        assert!(matches!(input(&results, 2).get(), Err(RunError::IndexOutOfRange(_))));
    }

    #[test]
    fn test_inputs_getter_keeps_errors() {
        let results = vec![TaskResult::ok(1i64), TaskResult::err(RunError::Timeout)];
        assert_eq!(
            inputs(&results).get().unwrap(),
            Value::List(vec![Value::Int(1), Value::Error(RunError::Timeout)])
        );
    }

    #[test]
    fn test_var_expr() {
        let vars = vars();
        assert_eq!(var_expr("  $( foo )  ", &vars).get().unwrap(), Value::Int(42));
        assert_eq!(var_expr("$(obj.bar)", &vars).get().unwrap(), Value::from("baz"));
        assert_eq!(var_expr("foo", &vars).get(), Err(RunError::ParameterEmpty));
        assert_eq!(var_expr("$(foo) $(foo)", &vars).get(), Err(RunError::ParameterEmpty));
        assert_eq!(var_expr("$()", &vars).get(), Err(RunError::ParameterEmpty));
        assert!(matches!(var_expr("$(missing)", &vars).get(), Err(RunError::KeypathNotFound(_))));
        assert!(matches!(var_expr("$(broken)", &vars).get(), Err(RunError::TooManyErrors(_))));
    }

    #[test]
    fn test_json_with_var_exprs_substitutes_anywhere() {
        let vars = vars();
        let got = json_with_var_exprs(r#"{"a": $(foo), "b": [1, $( obj.bar )], "c": $(obj)}"#, &vars, false)
            .get()
            .unwrap();

        let mut expected = BTreeMap::new();
        expected.insert("a".to_string(), Value::Int(42));
        expected.insert(
            "b".to_string(),
            Value::List(vec![Value::Int(1), Value::from("baz")]),
        );
        let mut obj = BTreeMap::new();
        obj.insert("bar".to_string(), Value::from("baz"));
        expected.insert("c".to_string(), Value::Map(obj));
        assert_eq!(got, Value::Map(expected));
    }

    #[test]
    fn test_json_with_var_exprs_errors() {
        let vars = vars();
        assert!(matches!(
            json_with_var_exprs("[$(broken)]", &vars, false).get(),
            Err(RunError::BadInput(_))
        ));
        assert_eq!(
            json_with_var_exprs("[$(broken)]", &vars, true).get().unwrap(),
            Value::List(vec![Value::Error(RunError::Timeout)])
        );
        assert_eq!(json_with_var_exprs("   ", &vars, false).get(), Err(RunError::ParameterEmpty));
        assert!(matches!(
            json_with_var_exprs("{not json", &vars, false).get(),
            Err(RunError::BadInput(_))
        ));
        assert!(matches!(
            json_with_var_exprs("$(missing)", &vars, false).get(),
            Err(RunError::KeypathNotFound(_))
        ));
    }

    #[test]
    fn test_valid_duration() {
        assert_eq!(valid_duration(" 5s ").get().unwrap(), Value::from("5s"));
        assert!(matches!(valid_duration("5 lightyears").get(), Err(RunError::BadInput(_))));
        assert_eq!(valid_duration("").get(), Err(RunError::ParameterEmpty));
    }
}
