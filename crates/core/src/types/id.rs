//! Application identifier type.

use core::fmt;

use serde::{Deserialize, Serialize};

/// Errors that can occur when parsing an [`ApplicationId`].
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum ApplicationIdError {
    /// The input string is empty.
    #[error("application id cannot be empty")]
    Empty,
    /// The input string is too long.
    #[error("application id must be at most {max} characters")]
    TooLong {
        /// Maximum allowed length.
        max: usize,
    },
}

/// An opaque client-side application identifier.
///
/// The checkout flow mints these in the browser and threads them through
/// payment-intent metadata so a charge can be tied back to the form session
/// that produced it. The server treats them as opaque bounded strings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(transparent)]
pub struct ApplicationId(String);

impl ApplicationId {
    /// Maximum length of an application id.
    pub const MAX_LENGTH: usize = 100;

    /// Parse an `ApplicationId` from a string.
    ///
    /// # Errors
    ///
    /// Returns an error if the input is empty or longer than 100 characters.
    pub fn parse(s: &str) -> Result<Self, ApplicationIdError> {
        if s.is_empty() {
            return Err(ApplicationIdError::Empty);
        }

        if s.chars().count() > Self::MAX_LENGTH {
            return Err(ApplicationIdError::TooLong {
                max: Self::MAX_LENGTH,
            });
        }

        Ok(Self(s.to_owned()))
    }

    /// Returns the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Consumes the `ApplicationId` and returns its inner string.
    #[must_use]
    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ApplicationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for ApplicationId {
    type Err = ApplicationIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for ApplicationId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
