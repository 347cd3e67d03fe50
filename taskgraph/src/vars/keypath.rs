//! Dotted addresses into the variable table.

use crate::errors::RunError;
use std::fmt;

/// A parsed one- or two-segment keypath such as `foo` or `foo.bar`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Keypath {
    head: String,
    tail: Option<String>,
}

impl Keypath {
    /// Maximum number of dotted segments.
    pub const MAX_PARTS: usize = 2;

    /// Parses a keypath.
    ///
    /// # Errors
    ///
    /// Returns [`RunError::KeypathNotFound`] for an empty keypath or an empty
    /// segment, and [`RunError::KeypathTooDeep`] for more than two segments.
    pub fn parse(text: &str) -> Result<Self, RunError> {
        if text.is_empty() {
            return Err(RunError::KeypathNotFound("empty keypath".to_string()));
        }

        let parts: Vec<&str> = text.split('.').collect();
        if parts.len() > Self::MAX_PARTS {
            return Err(RunError::KeypathTooDeep(text.to_string()));
        }
        if parts.iter().any(|p| p.is_empty()) {
            return Err(RunError::KeypathNotFound(text.to_string()));
        }

        Ok(Self {
            head: parts[0].to_string(),
            tail: parts.get(1).map(|s| (*s).to_string()),
        })
    }

    /// The top-level variable name.
    #[must_use]
    pub fn head(&self) -> &str {
        &self.head
    }

    /// The optional second segment.
    #[must_use]
    pub fn tail(&self) -> Option<&str> {
        self.tail.as_deref()
    }
}

impl fmt::Display for Keypath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.tail {
            Some(tail) => write!(f, "{}.{}", self.head, tail),
            None => f.write_str(&self.head),
        }
    }
}

impl std::str::FromStr for Keypath {
    type Err = RunError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
