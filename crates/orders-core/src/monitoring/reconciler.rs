//! Polling reconciler for payments that settled without a notification.
//!
//! Every cycle reads the whole pending work queue, asks the clearing service
//! for each payment's status and applies any settlement through the same path
//! as the listener. Orders stuck at `RECEIVED` because the kitchen could not
//! be reached are re-driven once they have waited long enough; they are found
//! through the store's awaiting-preparation index.

use crate::engine::event_bus::EventBus;
use crate::engine::{with_deadline, EngineError};
use crate::handlers::{report_inconsistency, PaymentHandler, Settlement};
use orders_config::OrchestratorConfig;
use orders_payment::PaymentService;
use orders_storage::{OrderStore, PendingWorkQueue};
use orders_types::{current_timestamp, truncate_id, PendingWorkEntry, SettlementSource};
use std::sync::Arc;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;

/// Counters for one reconcile cycle.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
	/// Queue entries looked at.
	pub scanned: usize,
	/// Orders this cycle settled.
	pub settled: usize,
	/// Payments still open.
	pub pending: usize,
	/// Entries removed because their order had already been settled or is gone.
	pub stale_removed: usize,
	/// Entries or re-drives that failed and will be retried.
	pub failed: usize,
	/// Orders sent to the kitchen again.
	pub redriven: usize,
}

impl ReconcileReport {
	fn is_idle(&self) -> bool {
		self.settled == 0 && self.stale_removed == 0 && self.failed == 0 && self.redriven == 0
	}
}

/// Polls the clearing service for every in-flight payment.
pub struct PaymentReconciler {
	payment: Arc<PaymentService>,
	store: Arc<OrderStore>,
	queue: Arc<PendingWorkQueue>,
	payment_handler: Arc<PaymentHandler>,
	event_bus: EventBus,
	config: OrchestratorConfig,
}

impl PaymentReconciler {
	pub fn new(
		payment: Arc<PaymentService>,
		store: Arc<OrderStore>,
		queue: Arc<PendingWorkQueue>,
		payment_handler: Arc<PaymentHandler>,
		event_bus: EventBus,
		config: OrchestratorConfig,
	) -> Self {
		Self {
			payment,
			store,
			queue,
			payment_handler,
			event_bus,
			config,
		}
	}

	/// Runs until `shutdown` flips or its sender goes away.
	pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
		let mut interval = tokio::time::interval(self.config.poll_interval());
		interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

		tracing::info!(
			interval_ms = self.config.poll_interval_ms,
			"Payment reconciler started"
		);

		loop {
			tokio::select! {
				_ = interval.tick() => {
					let report = self.reconcile_once().await;
					if !report.is_idle() {
						tracing::debug!(?report, "Reconcile cycle finished");
					}
				}
				_ = shutdown.changed() => break,
			}
		}

		tracing::info!("Payment reconciler stopped");
	}

	/// Runs a single reconcile cycle.
	pub async fn reconcile_once(&self) -> ReconcileReport {
		let mut report = ReconcileReport::default();

		match self.queue.read_all().await {
			Ok(entries) => {
				for entry in entries {
					report.scanned += 1;
					self.reconcile_entry(&entry, &mut report).await;
				}
			}
			Err(e) => {
				tracing::warn!(error = %e, "Failed to read pending work queue");
				report.failed += 1;
			}
		}

		self.redrive_stale(&mut report).await;
		report
	}

	async fn reconcile_entry(&self, entry: &PendingWorkEntry, report: &mut ReconcileReport) {
		let receipt = match with_deadline(
			self.config.gateway_timeout(),
			"get_payment",
			self.payment.get_payment(&entry.payment_id),
		)
		.await
		{
			Ok(receipt) => receipt,
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&entry.order_id),
					payment_id = %truncate_id(&entry.payment_id),
					error = %e,
					"Failed to poll payment"
				);
				report.failed += 1;
				return;
			}
		};

		let Some(outcome) = receipt.status.outcome() else {
			report.pending += 1;
			return;
		};

		match self
			.payment_handler
			.apply_payment_result(&entry.payment_id, outcome, SettlementSource::Reconciler)
			.await
		{
			Ok(Settlement::Applied { .. }) => report.settled += 1,
			Ok(Settlement::AlreadySettled { .. }) => report.stale_removed += 1,
			Err(EngineError::OrderNotFound(_)) => {
				// Already reported by the handler; the entry can never settle.
				match self.queue.remove(entry).await {
					Ok(_) => report.stale_removed += 1,
					Err(e) => {
						report_inconsistency(
							&self.event_bus,
							Some(&entry.order_id),
							Some(&entry.payment_id),
							format!("orphaned pending work entry could not be removed: {}", e),
						);
						report.failed += 1;
					}
				}
			}
			Err(e) => {
				tracing::warn!(
					order_id = %truncate_id(&entry.order_id),
					error = %e,
					"Failed to apply polled settlement"
				);
				report.failed += 1;
			}
		}
	}

	async fn redrive_stale(&self, report: &mut ReconcileReport) {
		let received = match self.store.awaiting_preparation().await {
			Ok(orders) => orders,
			Err(e) => {
				tracing::warn!(error = %e, "Failed to list received orders");
				report.failed += 1;
				return;
			}
		};

		let grace = self.config.redrive_after().as_secs();
		let now = current_timestamp();

		for order in received {
			if now.saturating_sub(order.updated_at) < grace {
				continue;
			}
			match self.payment_handler.start_preparation(&order.id).await {
				Ok(_) => report.redriven += 1,
				Err(e) => {
					tracing::warn!(
						order_id = %truncate_id(&order.id),
						error = %e,
						"Re-driving preparation failed"
					);
					report.failed += 1;
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::engine::tests::{harness, harness_with, product, test_config, Harness};
	use orders_types::{Order, OrderStatus, PaymentStatus};

	async fn checked_out(h: &Harness) -> Order {
		let order = h
			.engine
			.create_order(None, vec![product("combo", 4200)])
			.await
			.unwrap();
		h.engine.checkout(&order.id).await.unwrap()
	}

	#[tokio::test]
	async fn test_poll_only_settlement() {
		let h = harness();
		let order = checked_out(&h).await;

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.pending, 1);
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::WaitingPayment
		);

		assert!(h.payments.set_status("pay-1", PaymentStatus::Approved));
		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.scanned, 1);
		assert_eq!(report.settled, 1);

		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Preparing
		);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());
		assert_eq!(h.kitchen.requests_for(&order.id).await, 1);
	}

	#[tokio::test]
	async fn test_poll_refusal_cancels() {
		let h = harness();
		let order = checked_out(&h).await;

		h.payments.set_status("pay-1", PaymentStatus::Refused);
		h.engine.reconciler().reconcile_once().await;

		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Canceled
		);
		assert!(h.kitchen.requests().await.is_empty());
	}

	#[tokio::test]
	async fn test_gateway_outage_keeps_entry() {
		let h = harness();
		checked_out(&h).await;
		h.payments.set_status("pay-1", PaymentStatus::Approved);
		h.payments.set_unavailable(true);

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.failed, 1);
		assert_eq!(h.engine.queue().read_all().await.unwrap().len(), 1);

		h.payments.set_unavailable(false);
		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.settled, 1);
	}

	#[tokio::test]
	async fn test_stale_entry_is_cleared() {
		let h = harness();
		let order = checked_out(&h).await;
		h.payments.set_status("pay-1", PaymentStatus::Approved);
		h.engine
			.apply_payment_result("pay-1", orders_types::PaymentOutcome::Approved)
			.await
			.unwrap();

		// Simulate a removal that failed after the transition succeeded.
		h.engine
			.queue()
			.append(PendingWorkEntry::new(order.id.clone(), "pay-1"))
			.await
			.unwrap();

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.stale_removed, 1);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());
		assert_eq!(h.kitchen.requests_for(&order.id).await, 1);
	}

	#[tokio::test]
	async fn test_payment_unknown_to_clearing_keeps_entry() {
		let h = harness();
		h.engine
			.queue()
			.append(PendingWorkEntry::new("ghost", "pay-9"))
			.await
			.unwrap();

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.failed, 1);
		assert_eq!(h.engine.queue().read_all().await.unwrap().len(), 1);
	}

	#[tokio::test]
	async fn test_settlement_for_unknown_order_drops_entry() {
		let h = harness();
		let mut events = h.engine.event_bus().subscribe();

		// A payment the clearing service knows but no order is indexed under.
		let payment_id = h
			.engine
			.payment
			.create_payment("ghost", rust_decimal::Decimal::ONE)
			.await
			.unwrap();
		h.payments.set_status(&payment_id, PaymentStatus::Approved);
		h.engine
			.queue()
			.append(PendingWorkEntry::new("ghost", payment_id.clone()))
			.await
			.unwrap();

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.stale_removed, 1);
		assert!(h.engine.queue().read_all().await.unwrap().is_empty());
		assert!(matches!(
			events.try_recv().unwrap(),
			orders_types::OrderEvent::Inconsistency { .. }
		));
	}

	#[tokio::test]
	async fn test_received_orders_are_redriven() {
		let mut config = test_config();
		config.redrive_after_seconds = 0;
		let h = harness_with(config);
		let order = checked_out(&h).await;

		h.kitchen.set_failing(true);
		h.engine
			.apply_payment_result("pay-1", orders_types::PaymentOutcome::Approved)
			.await
			.unwrap();

		assert_eq!(h.engine.store.awaiting_preparation().await.unwrap().len(), 1);

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.failed, 1);
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Received
		);

		h.kitchen.set_failing(false);
		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.redriven, 1);
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Preparing
		);
		assert!(h.engine.store.awaiting_preparation().await.unwrap().is_empty());
	}

	#[tokio::test]
	async fn test_recent_received_orders_wait() {
		let h = harness();
		let order = checked_out(&h).await;

		h.kitchen.set_failing(true);
		h.engine
			.apply_payment_result("pay-1", orders_types::PaymentOutcome::Approved)
			.await
			.unwrap();
		h.kitchen.set_failing(false);

		let report = h.engine.reconciler().reconcile_once().await;
		assert_eq!(report.redriven, 0);
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Received
		);
	}
}
