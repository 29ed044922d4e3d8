//! Handlers for the order lifecycle.
//!
//! This module contains specialized handlers for the three ways an order
//! moves: checkout (payment hand-off), payment settlement and kitchen status
//! updates.

pub mod checkout;
pub mod payment;
pub mod production;

pub use checkout::CheckoutHandler;
pub use payment::{PaymentHandler, Settlement};
pub use production::{ProductionHandler, ProductionUpdate};

use crate::engine::event_bus::EventBus;
use orders_types::OrderEvent;

/// Logs state that needs manual reconciliation and announces it on the bus.
///
/// These are never retried automatically.
pub(crate) fn report_inconsistency(
	event_bus: &EventBus,
	order_id: Option<&str>,
	payment_id: Option<&str>,
	reason: impl Into<String>,
) {
	let reason = reason.into();
	tracing::error!(
		inconsistency = true,
		order_id = order_id.unwrap_or("-"),
		payment_id = payment_id.unwrap_or("-"),
		"{}",
		reason
	);
	event_bus
		.publish(OrderEvent::Inconsistency {
			order_id: order_id.map(str::to_string),
			payment_id: payment_id.map(str::to_string),
			reason,
		})
		.ok();
}
