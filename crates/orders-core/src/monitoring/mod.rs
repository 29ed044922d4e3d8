//! Background monitoring of in-flight orders.
//!
//! The reconciler is the safety net for payment notifications that never
//! arrive and for preparation requests the kitchen never accepted.

pub mod reconciler;

pub use reconciler::{PaymentReconciler, ReconcileReport};
