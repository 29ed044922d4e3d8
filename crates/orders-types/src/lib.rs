//! Common types for the order lifecycle orchestrator.
//!
//! This crate holds the data model shared by every other crate in the
//! workspace: orders and their product snapshots, the payment and production
//! status vocabularies, pending work entries, inter-component events and the
//! configuration validation framework used by pluggable implementations.

/// Event types published on the orchestrator event bus.
pub mod events;
/// Order records, product snapshots and the order status enumeration.
pub mod order;
/// Payment status vocabulary and gateway message types.
pub mod payment;
/// Production status vocabulary and gateway message types.
pub mod production;
/// Registry trait for self-registering implementations.
pub mod registry;
/// Storage namespaces and pending work entries.
pub mod storage;
/// Small helpers shared across crates.
pub mod utils;
/// Configuration validation types for pluggable implementations.
pub mod validation;

pub use events::*;
pub use order::*;
pub use payment::*;
pub use production::*;
pub use registry::ImplementationRegistry;
pub use storage::*;
pub use utils::{current_timestamp, truncate_id};
pub use validation::*;
