//! Checkout handler for the payment hand-off.
//!
//! Checkout moves an order to `WAITING_PAYMENT` before the payment is
//! created, then records the payment id and appends the pending work entry
//! the reconciler polls on. A failed payment creation leaves the order at
//! `WAITING_PAYMENT` without an entry, which a later checkout picks up.

use crate::engine::event_bus::EventBus;
use crate::engine::{with_deadline, EngineError};
use crate::handlers::report_inconsistency;
use crate::state::OrderStateMachine;
use orders_payment::PaymentService;
use orders_storage::{KeyedLocks, PendingWorkQueue};
use orders_types::{truncate_id, Order, OrderEvent, OrderStatus, PendingWorkEntry};
use std::sync::Arc;
use std::time::Duration;
use tracing::instrument;

/// Handler for checkout operations.
pub struct CheckoutHandler {
	payment: Arc<PaymentService>,
	queue: Arc<PendingWorkQueue>,
	state_machine: Arc<OrderStateMachine>,
	event_bus: EventBus,
	gateway_timeout: Duration,
	// Serializes checkouts of one order so a double submit creates one payment.
	in_progress: KeyedLocks,
}

impl CheckoutHandler {
	pub fn new(
		payment: Arc<PaymentService>,
		queue: Arc<PendingWorkQueue>,
		state_machine: Arc<OrderStateMachine>,
		event_bus: EventBus,
		gateway_timeout: Duration,
	) -> Self {
		Self {
			payment,
			queue,
			state_machine,
			event_bus,
			gateway_timeout,
			in_progress: KeyedLocks::new(),
		}
	}

	/// Commits an order and creates its payment.
	#[instrument(skip_all, fields(order_id = %truncate_id(order_id)))]
	pub async fn checkout(&self, order_id: &str) -> Result<Order, EngineError> {
		let _guard = self.in_progress.lock(order_id).await;

		let order = self.state_machine.get_order(order_id).await?;
		if order.is_deleted() {
			return Err(EngineError::OrderNotFound(order_id.to_string()));
		}
		if order.products.is_empty() {
			return Err(EngineError::InvalidInput(
				"order has no line items".to_string(),
			));
		}

		let order = match order.status {
			OrderStatus::Open => {
				let order = self
					.state_machine
					.compare_and_transition(order_id, OrderStatus::Open, OrderStatus::WaitingPayment)
					.await?;
				self.event_bus
					.publish(OrderEvent::StatusChanged {
						order_id: order_id.to_string(),
						from: OrderStatus::Open,
						to: OrderStatus::WaitingPayment,
					})
					.ok();
				order
			}
			OrderStatus::WaitingPayment => {
				if self.find_entry(order_id).await?.is_some() {
					return Err(EngineError::AlreadyInFlight(order_id.to_string()));
				}
				if let Some(payment_id) = order.payment_id.clone() {
					return self.restore_entry(order, payment_id).await;
				}
				tracing::info!("Retrying payment creation for order");
				order
			}
			status => {
				return Err(EngineError::InvalidInput(format!(
					"order is already past checkout ({})",
					status
				)));
			}
		};

		let payment_id = with_deadline(
			self.gateway_timeout,
			"create_payment",
			self.payment.create_payment(order_id, order.price),
		)
		.await
		.inspect_err(|e| {
			tracing::warn!(error = %e, "Payment creation failed, order left waiting for retry");
		})?;

		// From here on the payment exists at the clearing service.
		let order = match self.state_machine.set_payment_id(order_id, &payment_id).await {
			Ok(order) => order,
			Err(e) => {
				let reason = format!("payment created but not recorded on the order: {}", e);
				report_inconsistency(&self.event_bus, Some(order_id), Some(&payment_id), &reason);
				return Err(EngineError::Inconsistency(reason));
			}
		};

		let entry = PendingWorkEntry::new(order_id, payment_id.clone());
		if let Err(e) = self.queue.append(entry).await {
			let reason = format!("payment recorded but not queued for reconciliation: {}", e);
			report_inconsistency(&self.event_bus, Some(order_id), Some(&payment_id), &reason);
			return Err(EngineError::Inconsistency(reason));
		}

		tracing::info!(
			payment_id = %truncate_id(&payment_id),
			price = %order.price,
			"Checkout started, waiting for payment"
		);
		self.event_bus
			.publish(OrderEvent::CheckoutStarted {
				order_id: order_id.to_string(),
				payment_id,
			})
			.ok();

		Ok(order)
	}

	async fn find_entry(&self, order_id: &str) -> Result<Option<PendingWorkEntry>, EngineError> {
		self.queue
			.find(order_id)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))
	}

	// A payment exists but its queue entry was lost; put it back so the
	// reconciler resumes polling instead of creating a second payment.
	async fn restore_entry(&self, order: Order, payment_id: String) -> Result<Order, EngineError> {
		self.queue
			.append(PendingWorkEntry::new(order.id.clone(), payment_id.clone()))
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))?;

		tracing::warn!(
			payment_id = %truncate_id(&payment_id),
			"Restored missing pending work entry for existing payment"
		);
		Ok(order)
	}
}

#[cfg(test)]
mod tests {
	use crate::engine::tests::{harness, product};
	use crate::engine::EngineError;
	use orders_types::{OrderEvent, OrderStatus, PendingWorkEntry};
	use rust_decimal::Decimal;

	#[tokio::test]
	async fn test_checkout_creates_payment_and_queue_entry() {
		let h = harness();
		let mut events = h.engine.event_bus().subscribe();
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();

		let order = h.engine.checkout(&order.id).await.unwrap();

		assert_eq!(order.status, OrderStatus::WaitingPayment);
		assert_eq!(order.payment_id.as_deref(), Some("pay-1"));
		assert_eq!(h.payments.amount("pay-1"), Some(Decimal::new(4200, 2)));
		assert_eq!(
			h.engine.queue().read_all().await.unwrap(),
			vec![PendingWorkEntry::new(order.id.clone(), "pay-1")]
		);

		let mut saw_checkout = false;
		while let Ok(event) = events.try_recv() {
			if let OrderEvent::CheckoutStarted { payment_id, .. } = event {
				assert_eq!(payment_id, "pay-1");
				saw_checkout = true;
			}
		}
		assert!(saw_checkout);
	}

	#[tokio::test]
	async fn test_recheckout_rejected_while_in_flight() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();
		h.engine.checkout(&order.id).await.unwrap();

		assert!(matches!(
			h.engine.checkout(&order.id).await,
			Err(EngineError::AlreadyInFlight(_))
		));
		assert_eq!(h.payments.create_calls(), 1);
		assert_eq!(h.engine.queue().read_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_payment_failure_leaves_order_waiting_and_retry_succeeds() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();

		h.payments.fail_next_create();
		assert!(matches!(
			h.engine.checkout(&order.id).await,
			Err(EngineError::Gateway(_))
		));

		let stored = h.engine.get_order(&order.id).await.unwrap();
		assert_eq!(stored.status, OrderStatus::WaitingPayment);
		assert_eq!(stored.payment_id, None);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());

		let order = h.engine.checkout(&order.id).await.unwrap();
		assert_eq!(order.payment_id.as_deref(), Some("pay-1"));
		assert_eq!(h.payments.create_calls(), 2);
		assert_eq!(h.engine.queue().read_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_recheckout_restores_lost_queue_entry() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();
		h.engine.checkout(&order.id).await.unwrap();

		let entry = PendingWorkEntry::new(order.id.clone(), "pay-1");
		assert!(h.engine.queue().remove(&entry).await.unwrap());

		let order = h.engine.checkout(&order.id).await.unwrap();
		assert_eq!(order.payment_id.as_deref(), Some("pay-1"));
		assert_eq!(h.payments.create_calls(), 1);
		assert_eq!(h.engine.queue().read_all().await.unwrap(), vec![entry]);
	}

	#[tokio::test]
	async fn test_checkout_rejects_settled_and_missing_orders() {
		let h = harness();
		assert!(matches!(
			h.engine.checkout("ghost").await,
			Err(EngineError::OrderNotFound(_))
		));

		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();
		h.engine.checkout(&order.id).await.unwrap();
		h.engine
			.apply_payment_result("pay-1", orders_types::PaymentOutcome::Refused)
			.await
			.unwrap();

		assert!(matches!(
			h.engine.checkout(&order.id).await,
			Err(EngineError::InvalidInput(_))
		));
	}

	#[tokio::test]
	async fn test_concurrent_checkouts_create_one_payment() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();

		let (a, b) = tokio::join!(h.engine.checkout(&order.id), h.engine.checkout(&order.id));
		assert_eq!([a.is_ok(), b.is_ok()].iter().filter(|ok| **ok).count(), 1);
		assert!(matches!(
			a.err().or(b.err()),
			Some(EngineError::AlreadyInFlight(_))
		));
		assert_eq!(h.payments.create_calls(), 1);
		assert!(h.engine.checkout_handler.in_progress.is_empty());
	}
}
