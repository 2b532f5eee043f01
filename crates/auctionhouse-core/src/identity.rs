//! Externally asserted caller identity.
//!
//! Credentials are validated upstream; the services only receive the subject
//! name and compare it against ownership fields.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// The subject name of the caller on whose behalf a command runs.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Identity(String);

impl Identity {
    /// Creates an identity from a subject name.
    ///
    /// # Errors
    ///
    /// Returns `DomainError::Validation` if the name is blank.
    pub fn new(name: impl Into<String>) -> Result<Self, DomainError> {
        let name = name.into();
        let trimmed = name.trim();
        if trimmed.is_empty() {
            return Err(DomainError::Validation("identity must not be blank".into()));
        }
        Ok(Self(trimmed.to_owned()))
    }

    /// Returns the subject name.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
