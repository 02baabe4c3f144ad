use std::fmt::{self, Display, Formatter};

/// A first or last name. The only requirement is that it carries some
/// non-whitespace content.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersonName(String);

impl PersonName {
    pub fn parse(s: &str) -> Result<Self, String> {
        if s.trim().is_empty() {
            return Err("Invalid name: cannot be empty or whitespace.".to_string());
        }

        Ok(Self(s.to_string()))
    }
}

impl AsRef<str> for PersonName {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Display for PersonName {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
