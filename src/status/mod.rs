//! In-memory status store for probe outcomes.
//!
//! Holds the observation history of every endpoint for the lifetime of the
//! process and derives uptime and last-status summaries from it.

mod models;
mod store;
mod summary;

pub use models::*;
pub use store::*;
pub use summary::*;
