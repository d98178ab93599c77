//! Checkpoint module for resumable runs.
//!
//! Provides:
//! - `Checkpoint`: latest outcome per product handle
//! - `CheckpointStore`: durable append log with crash recovery

mod state;
mod store;

pub use state::*;
pub use store::*;
