use std::fmt::{self, Display, Formatter};

use validator::ValidateEmail;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum EmailError {
    #[error("Invalid email: email cannot be empty.")]
    Empty,

    #[error("Invalid email: cannot be longer than 320 characters.")]
    TooLong,

    #[error("Invalid email: missing '@' character.")]
    MissingAt,

    #[error("Invalid email: '{0}' does not match the required format.")]
    Malformed(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserEmail(String);

impl UserEmail {
    /// Returns an instance of `UserEmail` if all conditions are met.
    ///
    /// The address is kept exactly as given, so surrounding whitespace makes
    /// it malformed rather than being trimmed away.
    pub fn parse(s: &str) -> Result<Self, EmailError> {
        if s.trim().is_empty() {
            return Err(EmailError::Empty);
        }

        // RFC 5321: 64 local + 1 @ + 255 domain = 320 characters
        if s.len() > 320 {
            return Err(EmailError::TooLong);
        }

        if !s.contains('@') {
            return Err(EmailError::MissingAt);
        }

        if !s.validate_email() {
            return Err(EmailError::Malformed(s.to_string()));
        }

        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for UserEmail {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for UserEmail {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
