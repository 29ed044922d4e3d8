//! Payment settlement handler.
//!
//! Applies the clearing service's decision to the waiting order. The listener
//! and the reconciler both funnel into [`PaymentHandler::apply_payment_result`];
//! the compare-and-swap from `WAITING_PAYMENT` decides which of them settles
//! the order, and the loser only clears the stale queue entry.

use crate::engine::event_bus::EventBus;
use crate::engine::{with_deadline, EngineError};
use crate::handlers::report_inconsistency;
use crate::state::{OrderStateError, OrderStateMachine};
use orders_production::ProductionService;
use orders_storage::{OrderStore, PendingWorkQueue, StorageError};
use orders_types::{
	truncate_id, Order, OrderEvent, OrderStatus, PaymentOutcome, PaymentStatus,
	PaymentStatusChangedMessage, PendingWorkEntry, SettlementSource,
};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Result of applying a payment decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Settlement {
	/// The decision was applied; `status` is where the order ended up.
	Applied { order_id: String, status: OrderStatus },
	/// The order had already left `WAITING_PAYMENT`; nothing changed.
	AlreadySettled { order_id: String, status: OrderStatus },
}

/// Handler for payment settlement.
pub struct PaymentHandler {
	production: Arc<ProductionService>,
	store: Arc<OrderStore>,
	queue: Arc<PendingWorkQueue>,
	state_machine: Arc<OrderStateMachine>,
	event_bus: EventBus,
	gateway_timeout: Duration,
}

impl PaymentHandler {
	pub fn new(
		production: Arc<ProductionService>,
		store: Arc<OrderStore>,
		queue: Arc<PendingWorkQueue>,
		state_machine: Arc<OrderStateMachine>,
		event_bus: EventBus,
		gateway_timeout: Duration,
	) -> Self {
		Self {
			production,
			store,
			queue,
			state_machine,
			event_bus,
			gateway_timeout,
		}
	}

	/// Handles one raw payment-status-changed payload.
	///
	/// Undecodable payloads and unknown status words are logged and dropped;
	/// the reconciler picks up anything missed this way.
	#[instrument(skip_all)]
	pub async fn handle_message(&self, payload: &str) -> Result<(), EngineError> {
		let message: PaymentStatusChangedMessage = match serde_json::from_str(payload) {
			Ok(message) => message,
			Err(e) => {
				tracing::warn!(error = %e, "Dropping undecodable payment status message");
				return Ok(());
			}
		};

		let status = match PaymentStatus::from_clearing(&message.status) {
			Ok(status) => status,
			Err(e) => {
				tracing::warn!(
					payment_id = message.payment_id.as_deref().unwrap_or("-"),
					order_id = message.order_id.as_deref().unwrap_or("-"),
					error = %e,
					"Dropping payment status message"
				);
				return Ok(());
			}
		};

		let Some(outcome) = status.outcome() else {
			tracing::debug!("Payment still open, nothing to do");
			return Ok(());
		};

		let payment_id = match (message.payment_id, message.order_id) {
			(Some(payment_id), _) => payment_id,
			(None, Some(order_id)) => match self.payment_id_of(&order_id).await? {
				Some(payment_id) => payment_id,
				None => {
					tracing::warn!(
						order_id = %truncate_id(&order_id),
						"Dropping payment status message for an order without a payment"
					);
					return Ok(());
				}
			},
			(None, None) => {
				tracing::warn!("Dropping payment status message without identifiers");
				return Ok(());
			}
		};

		self.apply_payment_result(&payment_id, outcome, SettlementSource::Listener)
			.await?;
		Ok(())
	}

	async fn payment_id_of(&self, order_id: &str) -> Result<Option<String>, EngineError> {
		match self.state_machine.get_order(order_id).await {
			Ok(order) => Ok(order.payment_id),
			Err(OrderStateError::OrderNotFound(_)) => {
				report_inconsistency(
					&self.event_bus,
					Some(order_id),
					None,
					"payment status message references an unknown order",
				);
				Err(EngineError::OrderNotFound(order_id.to_string()))
			}
			Err(e) => Err(e.into()),
		}
	}

	/// Applies a settlement decision to the order holding `payment_id`.
	///
	/// Safe to call any number of times and from both settlement paths: only
	/// the call that moves the order out of `WAITING_PAYMENT` requests
	/// preparation. Every call removes the order's queue entry.
	#[instrument(skip_all, fields(payment_id = %truncate_id(payment_id), outcome = %outcome))]
	pub async fn apply_payment_result(
		&self,
		payment_id: &str,
		outcome: PaymentOutcome,
		source: SettlementSource,
	) -> Result<Settlement, EngineError> {
		let order = match self.store.get_by_payment_id(payment_id).await {
			Ok(order) => order,
			Err(StorageError::NotFound) => {
				report_inconsistency(
					&self.event_bus,
					None,
					Some(payment_id),
					format!("{} settlement references an unknown payment", outcome),
				);
				return Err(EngineError::OrderNotFound(format!(
					"no order for payment {}",
					payment_id
				)));
			}
			Err(e) => return Err(EngineError::Storage(e.to_string())),
		};

		let entry = PendingWorkEntry::new(order.id.clone(), payment_id);
		let target = outcome.order_status();

		match self
			.state_machine
			.compare_and_transition(&order.id, OrderStatus::WaitingPayment, target)
			.await
		{
			Ok(_) => {}
			Err(OrderStateError::StatusMismatch { actual, .. }) => {
				tracing::debug!(
					order_id = %truncate_id(&order.id),
					status = %actual,
					"Order already settled, ignoring duplicate"
				);
				self.remove_entry(&entry).await;
				return Ok(Settlement::AlreadySettled {
					order_id: order.id,
					status: actual,
				});
			}
			Err(e) => return Err(e.into()),
		}

		tracing::info!(
			order_id = %truncate_id(&order.id),
			status = %target,
			source = ?source,
			"Payment settled"
		);
		self.event_bus
			.publish(OrderEvent::StatusChanged {
				order_id: order.id.clone(),
				from: OrderStatus::WaitingPayment,
				to: target,
			})
			.ok();
		self.event_bus
			.publish(OrderEvent::Settled {
				order_id: order.id.clone(),
				payment_id: payment_id.to_string(),
				outcome,
				source,
			})
			.ok();

		self.remove_entry(&entry).await;

		let status = match outcome {
			PaymentOutcome::Approved => match self.start_preparation(&order.id).await {
				Ok(status) => status,
				Err(e) => {
					tracing::warn!(
						order_id = %truncate_id(&order.id),
						error = %e,
						"Preparation request failed, order stays received until re-driven"
					);
					OrderStatus::Received
				}
			},
			_ => target,
		};

		Ok(Settlement::Applied {
			order_id: order.id,
			status,
		})
	}

	/// Asks the kitchen again to prepare an order left at `RECEIVED`.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn redrive_preparation(&self, order_id: &str) -> Result<Order, EngineError> {
		let order = self.state_machine.get_order(order_id).await?;
		if order.status != OrderStatus::Received {
			return Err(EngineError::InvalidInput(format!(
				"only {} orders can be sent to the kitchen, order is {}",
				OrderStatus::Received,
				order.status
			)));
		}

		self.start_preparation(order_id).await?;
		self.state_machine
			.get_order(order_id)
			.await
			.map_err(EngineError::from)
	}

	/// Requests preparation and moves the order to `PREPARING`.
	///
	/// Returns the order's status afterwards. If the kitchen already reported
	/// progress on its own the order is left where it is.
	pub(crate) async fn start_preparation(&self, order_id: &str) -> Result<OrderStatus, EngineError> {
		with_deadline(
			self.gateway_timeout,
			"request_preparation",
			self.production.request_preparation(order_id),
		)
		.await?;

		self.event_bus
			.publish(OrderEvent::PreparationRequested {
				order_id: order_id.to_string(),
			})
			.ok();

		match self
			.state_machine
			.compare_and_transition(order_id, OrderStatus::Received, OrderStatus::Preparing)
			.await
		{
			Ok(_) => {
				tracing::info!(order_id = %truncate_id(order_id), "Order sent to the kitchen");
				self.event_bus
					.publish(OrderEvent::StatusChanged {
						order_id: order_id.to_string(),
						from: OrderStatus::Received,
						to: OrderStatus::Preparing,
					})
					.ok();
				Ok(OrderStatus::Preparing)
			}
			Err(OrderStateError::StatusMismatch { actual, .. }) => Ok(actual),
			Err(e) => {
				let reason = format!("kitchen accepted the order but it could not be updated: {}", e);
				report_inconsistency(&self.event_bus, Some(order_id), None, &reason);
				Err(EngineError::Inconsistency(reason))
			}
		}
	}

	async fn remove_entry(&self, entry: &PendingWorkEntry) {
		// A failed removal is retried by the next reconcile cycle.
		if let Err(e) = self.queue.remove(entry).await {
			tracing::warn!(
				order_id = %truncate_id(&entry.order_id),
				error = %e,
				"Failed to remove pending work entry"
			);
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::tests::{harness, product, Harness};

	async fn checked_out(h: &Harness) -> Order {
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();
		h.engine.checkout(&order.id).await.unwrap()
	}

	fn handler(h: &Harness) -> &PaymentHandler {
		&h.engine.payment_handler
	}

	#[tokio::test]
	async fn test_paid_message_moves_order_to_preparing() {
		let h = harness();
		let order = checked_out(&h).await;

		handler(&h)
			.handle_message(r#"{"payment_id":"pay-1","status":"paid"}"#)
			.await
			.unwrap();

		let stored = h.engine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Preparing);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());
		assert_eq!(h.kitchen.requests_for(&order.id).await, 1);
	}

	#[tokio::test]
	async fn test_refused_message_cancels_without_kitchen() {
		let h = harness();
		let order = checked_out(&h).await;

		handler(&h)
			.handle_message(r#"{"paymentID":"pay-1","status":"refused"}"#)
			.await
			.unwrap();

		let stored = h.engine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::Canceled);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());
		assert!(h.kitchen.requests().await.is_empty());
	}

	#[tokio::test]
	async fn test_failed_message_marks_failed_payment() {
		let h = harness();
		let order = checked_out(&h).await;

		handler(&h)
			.handle_message(r#"{"id":"pay-1","status":"failed"}"#)
			.await
			.unwrap();
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::FailedPayment
		);
	}

	#[tokio::test]
	async fn test_duplicate_paid_message_is_a_noop() {
		let h = harness();
		let order = checked_out(&h).await;
		let payload = r#"{"payment_id":"pay-1","status":"paid"}"#;

		handler(&h).handle_message(payload).await.unwrap();
		let first = h.engine.get_order(&order.id).await.unwrap();
		handler(&h).handle_message(payload).await.unwrap();
		let second = h.engine.get_order(&order.id).await.unwrap();

		assert_eq!(first.status, OrderStatus::Preparing);
		assert_eq!(second.status, OrderStatus::Preparing);
		assert_eq!(h.kitchen.requests_for(&order.id).await, 1);

		let again = handler(&h)
			.apply_payment_result("pay-1", PaymentOutcome::Refused, SettlementSource::Reconciler)
			.await
			.unwrap();
		assert_eq!(
			again,
			Settlement::AlreadySettled {
				order_id: order.id.clone(),
				status: OrderStatus::Preparing
			}
		);
	}

	#[tokio::test]
	async fn test_pending_and_garbage_messages_are_dropped() {
		let h = harness();
		let order = checked_out(&h).await;

		for payload in [
			"not json",
			r#"{"status":"paid"}"#,
			r#"{"payment_id":"pay-1","status":"pending"}"#,
			r#"{"payment_id":"pay-1","status":"chargeback"}"#,
		] {
			handler(&h).handle_message(payload).await.unwrap();
		}

		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::WaitingPayment
		);
		assert_eq!(h.engine.queue().read_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_message_with_only_order_id() {
		let h = harness();
		let order = checked_out(&h).await;

		let payload = format!(r#"{{"orderID":"{}","status":"paid"}}"#, order.id);
		handler(&h).handle_message(&payload).await.unwrap();
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Preparing
		);
	}

	#[tokio::test]
	async fn test_unknown_payment_is_reported() {
		let h = harness();
		let mut events = h.engine.event_bus().subscribe();

		let result = handler(&h)
			.apply_payment_result("pay-404", PaymentOutcome::Approved, SettlementSource::Listener)
			.await;
		assert!(matches!(result, Err(EngineError::OrderNotFound(_))));

		match events.try_recv().unwrap() {
			OrderEvent::Inconsistency { payment_id, .. } => {
				assert_eq!(payment_id.as_deref(), Some("pay-404"))
			}
			other => panic!("unexpected event: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_kitchen_failure_leaves_order_received() {
		let h = harness();
		let order = checked_out(&h).await;

		h.kitchen.set_failing(true);
		let settlement = handler(&h)
			.apply_payment_result("pay-1", PaymentOutcome::Approved, SettlementSource::Listener)
			.await
			.unwrap();
		assert_eq!(
			settlement,
			Settlement::Applied {
				order_id: order.id.clone(),
				status: OrderStatus::Received
			}
		);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());

		h.kitchen.set_failing(false);
		let order = h.engine.redrive_preparation(&order.id).await.unwrap();
		assert_eq!(order.status, OrderStatus::Preparing);
		assert_eq!(h.kitchen.requests_for(&order.id).await, 1);

		assert!(matches!(
			h.engine.redrive_preparation(&order.id).await,
			Err(EngineError::InvalidInput(_))
		));
	}

	#[tokio::test]
	async fn test_kitchen_progress_is_not_overwritten() {
		let h = harness();
		let order = checked_out(&h).await;

		h.kitchen.set_failing(true);
		handler(&h)
			.apply_payment_result("pay-1", PaymentOutcome::Approved, SettlementSource::Listener)
			.await
			.unwrap();
		h.engine
			.apply_production_result(&order.id, OrderStatus::Done)
			.await
			.unwrap();

		h.kitchen.set_failing(false);
		assert_eq!(
			handler(&h).start_preparation(&order.id).await.unwrap(),
			OrderStatus::Done
		);
	}
}
