//! Environment context supplied to a compilation.
//!
//! The compiler never reads the process environment itself; the caller
//! collects the variables it wants to expose and hands them over here.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

/// Environment variables visible to property declarations
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Environment {
    vars: IndexMap<String, String>,
}

impl Environment {
    /// Create an empty environment
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style variable assignment
    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.set(key, value);
        self
    }

    /// Set a variable, replacing any previous value
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.vars.insert(key.into(), value.into());
    }

    /// Look up a variable. Empty values count as absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.vars
            .get(key)
            .map(String::as_str)
            .filter(|value| !value.is_empty())
    }

    /// Number of variables, including empty ones
    #[must_use]
    pub fn len(&self) -> usize {
        self.vars.len()
    }

    /// Check if no variables are set
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.vars.is_empty()
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for Environment {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self {
            vars: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
        }
    }
}
