use crate::domain::{User, UserId, ValidCreateUser};

/// Builds the entity to persist from a validated command.
///
/// A fresh [`UserId`] is assigned on every call. Names and email are copied
/// exactly as they were submitted; no trimming and no case folding.
pub fn map_new_user(command: &ValidCreateUser) -> User {
    User {
        id: UserId::generate(),
        first_name: command.first_name().as_ref().to_string(),
        last_name: command.last_name().as_ref().to_string(),
        email: command.email().as_ref().to_string(),
    }
}
