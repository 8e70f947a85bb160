//! Requester identity

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the operator or system that requested a backfill run
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BackfillerId(pub String);

impl BackfillerId {
    /// Create a new backfiller ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the backfiller ID as a string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BackfillerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for BackfillerId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for BackfillerId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}
