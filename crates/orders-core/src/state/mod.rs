//! State management for orders.
//!
//! Provides the order state machine that validates and persists every status
//! change an order goes through.

pub mod order;

pub use order::{OrderStateError, OrderStateMachine};
