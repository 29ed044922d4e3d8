//! Event types for inter-component communication.
//!
//! The orchestrator publishes these on its event bus whenever it changes an
//! order or notices something an operator should reconcile by hand.

use serde::{Deserialize, Serialize};

use crate::{OrderStatus, PaymentOutcome};

/// Main event type published by the orchestrator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum OrderEvent {
	/// An order moved from one status to another.
	StatusChanged {
		order_id: String,
		from: OrderStatus,
		to: OrderStatus,
	},
	/// A payment was created and the order is awaiting settlement.
	CheckoutStarted { order_id: String, payment_id: String },
	/// A settlement decision was applied to an order.
	Settled {
		order_id: String,
		payment_id: String,
		outcome: PaymentOutcome,
		source: SettlementSource,
	},
	/// The kitchen accepted a preparation request.
	PreparationRequested { order_id: String },
	/// State that cannot be reconciled automatically.
	Inconsistency {
		order_id: Option<String>,
		payment_id: Option<String>,
		reason: String,
	},
}

/// Which path observed a settlement first.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum SettlementSource {
	/// The payment-event listener.
	Listener,
	/// The polling reconciler.
	Reconciler,
}
