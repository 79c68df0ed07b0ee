//! Shared building blocks for the domain engine crates.

pub mod path;
pub mod types;

pub use types::AggregateId;
