mod in_memory;
mod postgres;
mod user;

pub use in_memory::*;
pub use postgres::*;
use sqlx::{Postgres, Transaction};
pub use user::*;

pub type PgTransaction = Transaction<'static, Postgres>;
