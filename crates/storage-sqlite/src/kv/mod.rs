mod store;

pub use store::SqliteKeyValueStore;
