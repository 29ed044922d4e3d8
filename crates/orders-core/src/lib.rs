//! Core orchestration for the order lifecycle.
//!
//! This crate drives an order from creation through checkout, payment
//! settlement and kitchen preparation. It coordinates the order store, the
//! pending work queue and the payment and production gateways, and runs the
//! listeners and the polling reconciler that keep orders moving when
//! notifications are late, duplicated or lost.

pub mod builder;
pub mod engine;
pub mod handlers;
pub mod monitoring;
pub mod state;

pub use builder::{BuilderError, OrdersBuilder, OrdersFactories};
pub use engine::{event_bus::EventBus, EngineError, OrderEngine, WorkerHandles};
pub use handlers::{ProductionUpdate, Settlement};
pub use monitoring::{PaymentReconciler, ReconcileReport};
