pub mod mapper;
mod user;
pub mod validation;

pub use mapper::map_new_user;
pub use user::*;
pub use validation::{FieldViolation, ValidCreateUser, ValidationErrors, ViolationKind, validate};
