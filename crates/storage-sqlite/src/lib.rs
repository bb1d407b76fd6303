//! SQLite persistence for the Sprout offline stores.

pub mod errors;
pub mod kv;

pub use errors::{Result, StorageError};
pub use kv::SqliteKeyValueStore;
