//! Supabase backend access for Sprout sync.

pub mod client;
pub mod error;
pub mod probe;

pub use client::PostgrestClient;
pub use error::{RemoteApiError, Result};
pub use probe::ReachabilityProbe;
