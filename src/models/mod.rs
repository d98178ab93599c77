//! Core data models for shopscribe.

mod config;
mod error;
mod product;

pub use config::*;
pub use error::*;
pub use product::*;
