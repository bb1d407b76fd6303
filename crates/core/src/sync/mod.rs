//! Offline write queue and sync reconciler.

mod connectivity;
mod dead_letter;
mod dispatcher;
mod executor;
mod id_map;
mod model;
mod offline_records;
mod queue;
mod retry_policy;

pub use connectivity::*;
pub use dead_letter::*;
pub use dispatcher::*;
pub use executor::*;
pub use id_map::*;
pub use model::*;
pub use offline_records::*;
pub use queue::*;
pub use retry_policy::*;
