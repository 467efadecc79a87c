pub mod crypto;
pub mod db;
pub mod errors;
pub mod format;
