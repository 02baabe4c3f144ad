mod person_name;
mod types;
mod user_email;

pub use person_name::PersonName;
pub use types::*;
pub use user_email::{EmailError, UserEmail};
