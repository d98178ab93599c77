//! Pipeline module - batch processing and export.

mod batch;
mod export;

pub use batch::*;
pub use export::*;
