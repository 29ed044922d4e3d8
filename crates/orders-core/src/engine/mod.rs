//! Core order engine that orchestrates the order lifecycle.
//!
//! This module contains the main OrderEngine struct which coordinates between
//! the order store, the pending work queue and the payment and production
//! gateways. Synchronous operations (creating orders, checkout, settlement)
//! are exposed as methods; the background workers are started explicitly
//! through [`OrderEngine::start`].

pub mod event_bus;
pub mod lifecycle;

use crate::handlers::{CheckoutHandler, PaymentHandler, ProductionHandler, ProductionUpdate, Settlement};
use crate::monitoring::PaymentReconciler;
use crate::state::{OrderStateError, OrderStateMachine};
use orders_config::OrchestratorConfig;
use orders_payment::PaymentService;
use orders_production::ProductionService;
use orders_storage::{OrderStore, PendingWorkQueue, StorageError, StorageService};
use orders_types::{
	truncate_id, Order, OrderEvent, OrderList, OrderStatus, PaymentOutcome, ProductSnapshot,
	SettlementSource,
};
use rust_decimal::Decimal;
use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;

pub use event_bus::EventBus;
pub use lifecycle::WorkerHandles;

/// Errors that can occur during engine operations.
///
/// Input errors (`OrderNotFound`, `InvalidInput`, `AlreadyInFlight`,
/// `InvalidTransition`) are returned to the caller as-is; gateway errors are
/// surfaced to synchronous callers and logged by the background workers.
#[derive(Debug, Error)]
pub enum EngineError {
	#[error("Order not found: {0}")]
	OrderNotFound(String),
	#[error("Invalid input: {0}")]
	InvalidInput(String),
	#[error("Payment already in flight for order {0}")]
	AlreadyInFlight(String),
	#[error("Invalid state transition from {from} to {to}")]
	InvalidTransition { from: OrderStatus, to: OrderStatus },
	#[error("Gateway error: {0}")]
	Gateway(String),
	#[error("Gateway timeout: {0}")]
	Timeout(String),
	#[error("Storage error: {0}")]
	Storage(String),
	#[error("Inconsistency: {0}")]
	Inconsistency(String),
	#[error("Service error: {0}")]
	Service(String),
}

impl From<OrderStateError> for EngineError {
	fn from(e: OrderStateError) -> Self {
		match e {
			OrderStateError::OrderNotFound(id) => EngineError::OrderNotFound(id),
			OrderStateError::InvalidTransition { from, to } => {
				EngineError::InvalidTransition { from, to }
			}
			OrderStateError::Storage(e) => EngineError::Storage(e),
			e @ (OrderStateError::StatusMismatch { .. }
			| OrderStateError::InvalidUpdate(_)
			| OrderStateError::StaleReport { .. }) => {
				EngineError::InvalidInput(e.to_string())
			}
		}
	}
}

/// Runs a gateway call under the configured deadline.
pub(crate) async fn with_deadline<T, E, F>(
	deadline: Duration,
	operation: &str,
	call: F,
) -> Result<T, EngineError>
where
	F: Future<Output = Result<T, E>>,
	E: Display,
{
	match tokio::time::timeout(deadline, call).await {
		Ok(Ok(value)) => Ok(value),
		Ok(Err(e)) => Err(EngineError::Gateway(format!("{} failed: {}", operation, e))),
		Err(_) => Err(EngineError::Timeout(format!(
			"{} did not complete within {:?}",
			operation, deadline
		))),
	}
}

/// Main engine that orchestrates the order lifecycle.
#[derive(Clone)]
pub struct OrderEngine {
	/// Worker tuning.
	pub(crate) config: OrchestratorConfig,
	/// Order records.
	pub(crate) store: Arc<OrderStore>,
	/// Checkouts awaiting settlement.
	pub(crate) queue: Arc<PendingWorkQueue>,
	/// Payment-clearing gateway.
	pub(crate) payment: Arc<PaymentService>,
	/// Kitchen gateway.
	pub(crate) production: Arc<ProductionService>,
	/// Order state machine
	pub(crate) state_machine: Arc<OrderStateMachine>,
	/// Event bus for inter-component communication.
	pub(crate) event_bus: EventBus,
	/// Checkout handler
	pub(crate) checkout_handler: Arc<CheckoutHandler>,
	/// Payment settlement handler
	pub(crate) payment_handler: Arc<PaymentHandler>,
	/// Production status handler
	pub(crate) production_handler: Arc<ProductionHandler>,
	/// Polling reconciler
	pub(crate) reconciler: Arc<PaymentReconciler>,
}

impl OrderEngine {
	/// Creates a new order engine with the given services.
	///
	/// Nothing is spawned here; call [`OrderEngine::start`] to run the
	/// listeners and the reconciler.
	pub fn new(
		config: OrchestratorConfig,
		storage: Arc<StorageService>,
		payment: Arc<PaymentService>,
		production: Arc<ProductionService>,
		event_bus: EventBus,
	) -> Self {
		let store = Arc::new(OrderStore::new(storage.clone()));
		let queue = Arc::new(PendingWorkQueue::new(storage));
		let state_machine = Arc::new(OrderStateMachine::new(store.clone()));
		let gateway_timeout = config.gateway_timeout();

		let checkout_handler = Arc::new(CheckoutHandler::new(
			payment.clone(),
			queue.clone(),
			state_machine.clone(),
			event_bus.clone(),
			gateway_timeout,
		));

		let payment_handler = Arc::new(PaymentHandler::new(
			production.clone(),
			store.clone(),
			queue.clone(),
			state_machine.clone(),
			event_bus.clone(),
			gateway_timeout,
		));

		let production_handler = Arc::new(ProductionHandler::new(
			state_machine.clone(),
			event_bus.clone(),
		));

		let reconciler = Arc::new(PaymentReconciler::new(
			payment.clone(),
			store.clone(),
			queue.clone(),
			payment_handler.clone(),
			event_bus.clone(),
			config.clone(),
		));

		Self {
			config,
			store,
			queue,
			payment,
			production,
			state_machine,
			event_bus,
			checkout_handler,
			payment_handler,
			production_handler,
			reconciler,
		}
	}

	/// Creates an `OPEN` order from product snapshots.
	pub async fn create_order(
		&self,
		user_id: Option<String>,
		products: Vec<ProductSnapshot>,
	) -> Result<Order, EngineError> {
		validate_products(&products)?;

		let order = Order::new(uuid::Uuid::new_v4().to_string(), user_id, products);
		self.state_machine.store_order(&order).await?;

		tracing::info!(
			order_id = %truncate_id(&order.id),
			price = %order.price,
			items = order.products.len(),
			"Order created"
		);
		self.event_bus
			.publish(OrderEvent::StatusChanged {
				order_id: order.id.clone(),
				from: OrderStatus::Unset,
				to: OrderStatus::Open,
			})
			.ok();

		Ok(order)
	}

	/// Appends product snapshots to an order that is still `OPEN`.
	pub async fn add_items(
		&self,
		order_id: &str,
		products: Vec<ProductSnapshot>,
	) -> Result<Order, EngineError> {
		validate_products(&products)?;

		let order = self
			.state_machine
			.update_order_with(order_id, |order| {
				if order.is_deleted() {
					return Err(OrderStateError::OrderNotFound(order.id.clone()));
				}
				if order.status != OrderStatus::Open {
					return Err(OrderStateError::InvalidUpdate(format!(
						"items can only be added while the order is {}, it is {}",
						OrderStatus::Open,
						order.status
					)));
				}
				order.add_products(products);
				Ok(())
			})
			.await?;

		tracing::debug!(
			order_id = %truncate_id(order_id),
			price = %order.price,
			items = order.products.len(),
			"Items added to order"
		);
		Ok(order)
	}

	/// Commits an order's items and starts payment.
	pub async fn checkout(&self, order_id: &str) -> Result<Order, EngineError> {
		self.checkout_handler.checkout(order_id).await
	}

	/// Gets a live order by id.
	pub async fn get_order(&self, order_id: &str) -> Result<Order, EngineError> {
		let order = self.state_machine.get_order(order_id).await?;
		if order.is_deleted() {
			return Err(EngineError::OrderNotFound(order_id.to_string()));
		}
		Ok(order)
	}

	/// Gets a live order by the payment id recorded at checkout.
	pub async fn get_order_by_payment_id(&self, payment_id: &str) -> Result<Order, EngineError> {
		match self.store.get_by_payment_id(payment_id).await {
			Ok(order) if !order.is_deleted() => Ok(order),
			Ok(_) | Err(StorageError::NotFound) => Err(EngineError::OrderNotFound(format!(
				"no order for payment {}",
				payment_id
			))),
			Err(e) => Err(EngineError::Storage(e.to_string())),
		}
	}

	/// Lists live orders, oldest first.
	pub async fn list_orders(&self, limit: usize, offset: usize) -> Result<OrderList, EngineError> {
		self.store
			.list(limit, offset)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))
	}

	/// Lists live orders of one user, oldest first.
	pub async fn list_orders_by_user(
		&self,
		user_id: &str,
		limit: usize,
		offset: usize,
	) -> Result<OrderList, EngineError> {
		self.store
			.list_by_user(user_id, limit, offset)
			.await
			.map_err(|e| EngineError::Storage(e.to_string()))
	}

	/// Soft-deletes an order.
	pub async fn delete_order(&self, order_id: &str) -> Result<Order, EngineError> {
		let order = self.store.delete(order_id).await.map_err(|e| match e {
			StorageError::NotFound => EngineError::OrderNotFound(order_id.to_string()),
			e => EngineError::Storage(e.to_string()),
		})?;
		tracing::info!(order_id = %truncate_id(order_id), "Order deleted");
		Ok(order)
	}

	/// Applies a payment decision to the order holding `payment_id`.
	pub async fn apply_payment_result(
		&self,
		payment_id: &str,
		outcome: PaymentOutcome,
	) -> Result<Settlement, EngineError> {
		self.payment_handler
			.apply_payment_result(payment_id, outcome, SettlementSource::Listener)
			.await
	}

	/// Applies a kitchen status update to an order.
	pub async fn apply_production_result(
		&self,
		order_id: &str,
		status: OrderStatus,
	) -> Result<ProductionUpdate, EngineError> {
		self.production_handler
			.apply_production_result(order_id, status)
			.await
	}

	/// Asks the kitchen again to prepare an order left at `RECEIVED`.
	pub async fn redrive_preparation(&self, order_id: &str) -> Result<Order, EngineError> {
		self.payment_handler.redrive_preparation(order_id).await
	}

	/// Returns a reference to the event bus.
	pub fn event_bus(&self) -> &EventBus {
		&self.event_bus
	}

	/// Returns a reference to the worker configuration.
	pub fn config(&self) -> &OrchestratorConfig {
		&self.config
	}

	/// Returns a reference to the pending work queue.
	pub fn queue(&self) -> &Arc<PendingWorkQueue> {
		&self.queue
	}

	/// Returns a reference to the polling reconciler.
	pub fn reconciler(&self) -> &Arc<PaymentReconciler> {
		&self.reconciler
	}

	/// Helper method to spawn handler tasks with semaphore-based concurrency control.
	///
	/// This method:
	/// 1. Acquires a permit from the semaphore to limit concurrent tasks
	/// 2. Clones the engine and spawns the handler in a new task
	/// 3. Handles errors by logging them appropriately
	pub(crate) async fn spawn_handler<F, Fut>(&self, semaphore: &Arc<Semaphore>, handler: F)
	where
		F: FnOnce(OrderEngine) -> Fut + Send + 'static,
		Fut: Future<Output = Result<(), EngineError>> + Send + 'static,
	{
		let engine = self.clone();
		match semaphore.clone().acquire_owned().await {
			Ok(permit) => {
				tokio::spawn(async move {
					let _permit = permit; // Keep permit alive for duration of task
					if let Err(e) = handler(engine).await {
						tracing::warn!(error = %e, "Handler error");
					}
				});
			}
			Err(e) => {
				tracing::error!("Failed to acquire semaphore permit: {}", e);
			}
		}
	}
}

fn validate_products(products: &[ProductSnapshot]) -> Result<(), EngineError> {
	if products.is_empty() {
		return Err(EngineError::InvalidInput(
			"order has no line items".to_string(),
		));
	}
	if let Some(product) = products.iter().find(|p| p.price < Decimal::ZERO) {
		return Err(EngineError::InvalidInput(format!(
			"product {} has a negative price",
			product.id
		)));
	}
	Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
	use super::*;
	use orders_payment::implementations::memory::{MemoryPayment, MemoryPaymentHandle};
	use orders_production::implementations::memory::{MemoryProduction, MemoryProductionHandle};
	use orders_storage::implementations::memory::MemoryStorage;

	/// Engine wired to in-memory gateways, plus their control handles.
	pub(crate) struct Harness {
		pub engine: OrderEngine,
		pub payments: MemoryPaymentHandle,
		pub kitchen: MemoryProductionHandle,
	}

	pub(crate) fn test_config() -> OrchestratorConfig {
		OrchestratorConfig {
			poll_interval_ms: 20,
			gateway_timeout_seconds: 1,
			redrive_after_seconds: 3600,
			max_concurrent_handlers: 8,
		}
	}

	pub(crate) fn harness_with(config: OrchestratorConfig) -> Harness {
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		harness_on(storage, config)
	}

	pub(crate) fn harness_on(storage: Arc<StorageService>, config: OrchestratorConfig) -> Harness {
		let payment = MemoryPayment::new();
		let payments = payment.handle();
		let production = MemoryProduction::new();
		let kitchen = production.handle();

		let engine = OrderEngine::new(
			config,
			storage,
			Arc::new(PaymentService::new(Box::new(payment))),
			Arc::new(ProductionService::new(Box::new(production))),
			EventBus::new(256),
		);

		Harness {
			engine,
			payments,
			kitchen,
		}
	}

	pub(crate) fn harness() -> Harness {
		harness_with(test_config())
	}

	pub(crate) fn product(id: &str, cents: i64) -> ProductSnapshot {
		ProductSnapshot {
			id: id.to_string(),
			name: format!("Product {}", id),
			description: String::new(),
			category_id: "snacks".to_string(),
			price: Decimal::new(cents, 2),
		}
	}

	#[tokio::test]
	async fn test_create_order_sums_prices() {
		let h = harness();
		let order = h
			.engine
			.create_order(
				Some("user-1".into()),
				vec![product("burger", 3000), product("soda", 1200)],
			)
			.await
			.unwrap();

		assert_eq!(order.status, OrderStatus::Open);
		assert_eq!(order.price, Decimal::new(4200, 2));
		assert_eq!(order.payment_id, None);
		assert_eq!(h.engine.get_order(&order.id).await.unwrap(), order);
	}

	#[tokio::test]
	async fn test_create_order_rejects_empty_and_negative() {
		let h = harness();
		assert!(matches!(
			h.engine.create_order(None, vec![]).await,
			Err(EngineError::InvalidInput(_))
		));
		assert!(matches!(
			h.engine.create_order(None, vec![product("refund", -100)]).await,
			Err(EngineError::InvalidInput(_))
		));
	}

	#[tokio::test]
	async fn test_add_items_only_while_open() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("burger", 3000)])
			.await
			.unwrap();

		let order = h
			.engine
			.add_items(&order.id, vec![product("fries", 1200)])
			.await
			.unwrap();
		assert_eq!(order.products.len(), 2);
		assert_eq!(order.price, Decimal::new(4200, 2));

		h.engine.checkout(&order.id).await.unwrap();
		assert!(matches!(
			h.engine.add_items(&order.id, vec![product("shake", 900)]).await,
			Err(EngineError::InvalidInput(_))
		));
		assert_eq!(
			h.engine.get_order(&order.id).await.unwrap().price,
			Decimal::new(4200, 2)
		);
	}

	#[tokio::test]
	async fn test_deleted_orders_are_hidden() {
		let h = harness();
		let kept = h
			.engine
			.create_order(Some("user-1".into()), vec![product("burger", 3000)])
			.await
			.unwrap();
		let gone = h
			.engine
			.create_order(Some("user-1".into()), vec![product("fries", 1200)])
			.await
			.unwrap();

		h.engine.delete_order(&gone.id).await.unwrap();

		assert!(matches!(
			h.engine.get_order(&gone.id).await,
			Err(EngineError::OrderNotFound(_))
		));
		assert!(matches!(
			h.engine.checkout(&gone.id).await,
			Err(EngineError::OrderNotFound(_))
		));
		assert!(matches!(
			h.engine.add_items(&gone.id, vec![product("x", 100)]).await,
			Err(EngineError::OrderNotFound(_))
		));

		let page = h.engine.list_orders_by_user("user-1", 10, 0).await.unwrap();
		assert_eq!(page.total, 1);
		assert_eq!(page.orders[0].id, kept.id);
		assert_eq!(h.engine.list_orders(10, 0).await.unwrap().total, 1);
	}

	#[tokio::test]
	async fn test_delete_missing_order() {
		let h = harness();
		assert!(matches!(
			h.engine.delete_order("ghost").await,
			Err(EngineError::OrderNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_get_order_by_payment_id() {
		let h = harness();
		let order = h
			.engine
			.create_order(None, vec![product("burger", 4200)])
			.await
			.unwrap();
		let order = h.engine.checkout(&order.id).await.unwrap();
		let payment_id = order.payment_id.clone().unwrap();

		assert_eq!(
			h.engine.get_order_by_payment_id(&payment_id).await.unwrap().id,
			order.id
		);
		assert!(matches!(
			h.engine.get_order_by_payment_id("pay-404").await,
			Err(EngineError::OrderNotFound(_))
		));
	}

	#[tokio::test]
	async fn test_with_deadline_maps_timeouts() {
		let result: Result<(), EngineError> = with_deadline(
			Duration::from_millis(10),
			"slow call",
			async {
				tokio::time::sleep(Duration::from_secs(5)).await;
				Ok::<(), String>(())
			},
		)
		.await;
		assert!(matches!(result, Err(EngineError::Timeout(_))));

		let result: Result<(), EngineError> =
			with_deadline(Duration::from_secs(1), "failing call", async {
				Err::<(), String>("boom".into())
			})
			.await;
		assert!(matches!(result, Err(EngineError::Gateway(msg)) if msg.contains("boom")));
	}
}
