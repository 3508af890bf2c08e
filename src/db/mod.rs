mod database;
pub(crate) mod sanitize;

pub use database::{Database, CHANGE_LOG_TABLE};
