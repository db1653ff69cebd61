//! Structured cache keys.

use std::collections::BTreeMap;
use std::fmt;

/// Logical resource plus parameters.
///
/// Parameters live in a `BTreeMap`, so two keys built with the same
/// parameters in a different order are equal and hash the same.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct QueryKey {
    resource: String,
    params: BTreeMap<String, String>,
}

impl QueryKey {
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
            params: BTreeMap::new(),
        }
    }

    #[must_use]
    pub fn with(mut self, name: impl Into<String>, value: impl ToString) -> Self {
        self.params.insert(name.into(), value.to_string());
        self
    }

    #[must_use]
    pub fn resource(&self) -> &str {
        &self.resource
    }

    #[must_use]
    pub fn params(&self) -> &BTreeMap<String, String> {
        &self.params
    }

    #[must_use]
    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    /// Filter semantics: `self` matches `other` when the resources are equal
    /// and every parameter of `self` appears in `other` with the same value.
    ///
    /// `QueryKey::new("expenses")` therefore matches every expenses key.
    #[must_use]
    pub fn matches(&self, other: &QueryKey) -> bool {
        self.resource == other.resource
            && self
                .params
                .iter()
                .all(|(name, value)| other.params.get(name) == Some(value))
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.resource)?;
        let mut sep = '?';
        for (name, value) in &self.params {
            write!(f, "{sep}{name}={value}")?;
            sep = '&';
        }
        Ok(())
    }
}
