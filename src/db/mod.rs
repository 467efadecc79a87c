//! The in-memory database: tree model, load/save orchestration.

pub mod database;
pub mod model;

pub use database::{Credentials, Database, DEFAULT_KEY_ENC_ROUNDS};
pub use model::{Entry, Group};
