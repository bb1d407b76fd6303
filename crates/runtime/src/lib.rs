//! Wiring of the Sprout sync stack for a host application.

mod context;
mod errors;

pub use context::SyncContext;
pub use errors::{Result, RuntimeError};
