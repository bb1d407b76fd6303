//! Sprout core: offline write queue, sync reconciler and local caches.

pub mod cache;
pub mod config;
pub mod errors;
pub mod events;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::SyncConfig;
pub use errors::{DispatchError, Error, Result};
pub use events::{ChangeBus, Subscription};
