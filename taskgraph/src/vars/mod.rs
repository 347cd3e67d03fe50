//! Per-run variable table.
//!
//! One [`Vars`] instance exists per run. The scheduler's aggregation loop is
//! its only writer; tasks receive a [`Vars::copy`] snapshot before executing.

mod keypath;
mod value;

pub use keypath::Keypath;
pub use value::Value;

use crate::errors::RunError;
use std::collections::BTreeMap;

/// Name of the reserved variable holding the run's external input.
pub const INPUT_VAR: &str = "input";

/// A flat `name -> value` table addressed by [`Keypath`]s.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Vars {
    vars: BTreeMap<String, Value>,
}

impl Vars {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a table whose `input` variable holds the given value.
    #[must_use]
    pub fn with_input(input: impl Into<Value>) -> Self {
        let mut vars = Self::new();
        vars.vars.insert(INPUT_VAR.to_string(), input.into());
        vars
    }

    /// Creates a table from existing entries.
    #[must_use]
    pub fn from_map(vars: BTreeMap<String, Value>) -> Self {
        Self { vars }
    }

    /// Resolves a keypath.
    ///
    /// # Errors
    ///
    /// - [`RunError::KeypathNotFound`] if the variable or key is missing, or
    ///   the top-level value cannot be indexed.
    /// - [`RunError::KeypathTooDeep`] for keypaths with more than two parts.
    /// - [`RunError::IndexOutOfRange`] for a list index past either end.
    pub fn get(&self, keypath: &str) -> Result<Value, RunError> {
        let kp = Keypath::parse(keypath)?;
        self.get_keypath(&kp)
    }

    /// Resolves an already parsed keypath.
    ///
    /// # Errors
    ///
    /// See [`Vars::get`].
    pub fn get_keypath(&self, kp: &Keypath) -> Result<Value, RunError> {
        let top = self
            .vars
            .get(kp.head())
            .ok_or_else(|| RunError::KeypathNotFound(kp.to_string()))?;

        let Some(tail) = kp.tail() else {
            return Ok(top.clone());
        };

        match top {
            Value::Map(map) => map
                .get(tail)
                .cloned()
                .ok_or_else(|| RunError::KeypathNotFound(kp.to_string())),
            Value::List(list) => {
                let index: i64 = tail
                    .parse()
                    .map_err(|_| RunError::KeypathNotFound(kp.to_string()))?;
                let len = i64::try_from(list.len()).unwrap_or(i64::MAX);
                let resolved = if index < 0 { len + index } else { index };
                if resolved < 0 || resolved >= len {
                    return Err(RunError::IndexOutOfRange(format!(
                        "{kp} (index {index}, length {len})"
                    )));
                }
                usize::try_from(resolved)
                    .ok()
                    .and_then(|i| list.get(i))
                    .cloned()
                    .ok_or_else(|| RunError::IndexOutOfRange(kp.to_string()))
            }
            _ => Err(RunError::KeypathNotFound(kp.to_string())),
        }
    }

    /// Writes a top-level variable.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::InvalidVariable`] if the name is empty or contains
    /// a `.`.
    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<(), RunError> {
        let name = name.trim();
        if name.is_empty() {
            return Err(RunError::InvalidVariable("empty variable name".to_string()));
        }
        if name.contains('.') {
            return Err(RunError::InvalidVariable(format!(
                "'{name}' must be a top-level name"
            )));
        }
        self.vars.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Returns a shallow snapshot for one task execution.
    #[must_use]
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Returns true if the top-level variable exists.
    #[must_use]
    pub fn contains(&self, name: &str) -> bool {
        self.vars.contains_key(name)
    }

    /// Returns the number of top-level variables.
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Returns true if no variables are set.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }

    /// Iterates over top-level variables in name order.
    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.vars.iter()
    }
}
