//! Kitchen status handler.
//!
//! The kitchen is authoritative for `PREPARING`, `DONE` and `FINISHED`.
//! Updates are applied in arrival order, but never to an order that has not
//! been paid for or has already reached a terminal state. A report carrying a
//! timestamp older than the last one applied to the order is dropped.

use crate::engine::event_bus::EventBus;
use crate::engine::EngineError;
use crate::state::{OrderStateError, OrderStateMachine};
use chrono::{DateTime, Utc};
use orders_types::{
	production_status, truncate_id, OrderEvent, OrderStatus, ProductionStatusChangedMessage,
};
use std::sync::Arc;
use tracing::instrument;

// Attempts before giving up on an order whose status keeps changing underneath.
const MAX_ATTEMPTS: usize = 3;

/// Result of applying a kitchen status update.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProductionUpdate {
	/// The order moved.
	Applied { from: OrderStatus, to: OrderStatus },
	/// The order already had this status.
	Unchanged(OrderStatus),
	/// The order is terminal and was left alone.
	Ignored(OrderStatus),
	/// The report predates the last one applied; the order was left alone.
	Stale(OrderStatus),
}

/// Handler for kitchen status updates.
pub struct ProductionHandler {
	state_machine: Arc<OrderStateMachine>,
	event_bus: EventBus,
}

impl ProductionHandler {
	pub fn new(state_machine: Arc<OrderStateMachine>, event_bus: EventBus) -> Self {
		Self {
			state_machine,
			event_bus,
		}
	}

	/// Handles one raw production-status-changed payload.
	#[instrument(skip_all)]
	pub async fn handle_message(&self, payload: &str) -> Result<(), EngineError> {
		let message: ProductionStatusChangedMessage = match serde_json::from_str(payload) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!(error = %e, "Dropping undecodable production status message");
				return Ok(());
			}
		};

		let status = match production_status(&message.status) {
			Ok(status) => status,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&message.order_id),
					error = %e,
					"Dropping production status message"
				);
				return Ok(());
			}
		};

		self.apply_report(&message.order_id, status, message.updated_at)
			.await?;
		Ok(())
	}

	/// Applies a kitchen status to an order.
	pub async fn apply_production_result(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<ProductionUpdate, EngineError> {
		self.apply_report(order_id, status, None).await
	}

	/// Applies a kitchen status reported at `reported_at`.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id), status = %status))]
	pub async fn apply_report(
		&self,
		order_id: &str,
		status: OrderStatus,
		reported_at: Option<DateTime<Utc>>,
	) -> Result<ProductionUpdate, EngineError> {
		if !matches!(
			status,
			OrderStatus::Preparing | OrderStatus::Done | OrderStatus::Finished
		) {
			return Err(EngineError::InvalidInput(format!(
				"{} is not a kitchen status",
				status
			)));
		}

		for _ in 0..MAX_ATTEMPTS {
			let order = self.state_machine.get_order(order_id).await?;
			let current = order.status;

			if order.is_stale_kitchen_report(reported_at) {
				tracing::debug!(current = %current, "Dropping out-of-date kitchen update");
				return Ok(ProductionUpdate::Stale(current));
			}
			if current == status {
				return Ok(ProductionUpdate::Unchanged(current));
			}
			if current.is_terminal() {
				tracing::debug!(current = %current, "Ignoring kitchen update for terminal order");
				return Ok(ProductionUpdate::Ignored(current));
			}
			if !OrderStateMachine::is_valid_transition(current, status) {
				return Err(EngineError::InvalidTransition {
					from: current,
					to: status,
				});
			}

			match self
				.state_machine
				.apply_kitchen_report(order_id, current, status, reported_at)
				.await
			{
				Ok(_) => {
					tracing::info!(from = %current, "Kitchen status applied");
					self.event_bus
						.publish(OrderEvent::StatusChanged {
							order_id: order_id.to_string(),
							from: current,
							to: status,
						})
						.ok();
					return Ok(ProductionUpdate::Applied {
						from: current,
						to: status,
					});
				}
				Err(OrderStateError::StatusMismatch { .. } | OrderStateError::StaleReport { .. }) => {
					continue
				}
				Err(e) => return Err(e.into()),
			}
		}

		Err(EngineError::Service(format!(
			"order {} changed status {} times while applying {}",
			order_id, MAX_ATTEMPTS, status
		)))
	}
}
