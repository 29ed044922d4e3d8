//! In-process payment clearing.
//!
//! Payments are kept in memory and never settle on their own unless an
//! `initial_status` other than `pending` is configured. A
//! [`MemoryPaymentHandle`] drives the simulated clearing service from the
//! outside: settle payments, publish status messages, inject failures and
//! count calls.

use crate::{PaymentError, PaymentFactory, PaymentInterface, PaymentRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use orders_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, PaymentReceipt, PaymentStatus,
	PaymentStatusChangedMessage, Schema, ValidationError,
};
use rust_decimal::Decimal;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
struct Clearing {
	payments: DashMap<String, (PaymentReceipt, Decimal)>,
	next_id: AtomicU64,
	fail_next_create: AtomicBool,
	unavailable: AtomicBool,
	create_calls: AtomicUsize,
	get_calls: AtomicUsize,
	listener: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// In-memory payment gateway.
pub struct MemoryPayment {
	clearing: Arc<Clearing>,
	initial_status: PaymentStatus,
}

impl MemoryPayment {
	/// Creates a gateway whose payments start out pending.
	pub fn new() -> Self {
		Self::with_initial_status(PaymentStatus::Open)
	}

	/// Creates a gateway whose payments start out at `status`.
	pub fn with_initial_status(status: PaymentStatus) -> Self {
		Self {
			clearing: Arc::new(Clearing::default()),
			initial_status: status,
		}
	}

	/// Returns a handle controlling this gateway.
	pub fn handle(&self) -> MemoryPaymentHandle {
		MemoryPaymentHandle {
			clearing: self.clearing.clone(),
		}
	}
}

impl Default for MemoryPayment {
	fn default() -> Self {
		Self::new()
	}
}

/// Cloneable control handle for a [`MemoryPayment`].
#[derive(Clone)]
pub struct MemoryPaymentHandle {
	clearing: Arc<Clearing>,
}

impl MemoryPaymentHandle {
	/// Changes a payment's status without notifying anyone.
	pub fn set_status(&self, payment_id: &str, status: PaymentStatus) -> bool {
		match self.clearing.payments.get_mut(payment_id) {
			Some(mut entry) => {
				entry.0.status = status;
				true
			}
			None => false,
		}
	}

	/// Publishes a raw payload on the status channel.
	///
	/// Returns false when nobody is listening.
	pub async fn publish_raw(&self, payload: impl Into<String>) -> bool {
		match self.clearing.listener.lock().await.as_ref() {
			Some(sender) => sender.send(payload.into()).is_ok(),
			None => false,
		}
	}

	/// Publishes a status message in the clearing service's vocabulary.
	pub async fn publish(&self, payment_id: &str, clearing_status: &str) -> bool {
		let message = PaymentStatusChangedMessage {
			payment_id: Some(payment_id.to_string()),
			order_id: None,
			status: clearing_status.to_string(),
		};
		match serde_json::to_string(&message) {
			Ok(payload) => self.publish_raw(payload).await,
			Err(_) => false,
		}
	}

	/// Makes the next `create_payment` call fail with a transport error.
	pub fn fail_next_create(&self) {
		self.clearing.fail_next_create.store(true, Ordering::SeqCst);
	}

	/// Makes every `get_payment` call fail until cleared.
	pub fn set_unavailable(&self, unavailable: bool) {
		self.clearing.unavailable.store(unavailable, Ordering::SeqCst);
	}

	/// Number of `create_payment` calls, successful or not.
	pub fn create_calls(&self) -> usize {
		self.clearing.create_calls.load(Ordering::SeqCst)
	}

	/// Number of `get_payment` calls, successful or not.
	pub fn get_calls(&self) -> usize {
		self.clearing.get_calls.load(Ordering::SeqCst)
	}

	/// Amount a payment was created for.
	pub fn amount(&self, payment_id: &str) -> Option<Decimal> {
		self.clearing.payments.get(payment_id).map(|entry| entry.1)
	}
}

#[async_trait]
impl PaymentInterface for MemoryPayment {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryPaymentSchema)
	}

	async fn create_payment(&self, order_id: &str, price: Decimal) -> Result<String, PaymentError> {
		self.clearing.create_calls.fetch_add(1, Ordering::SeqCst);
		if self.clearing.fail_next_create.swap(false, Ordering::SeqCst) {
			return Err(PaymentError::Transport(
				"clearing service unavailable".into(),
			));
		}

		let seq = self.clearing.next_id.fetch_add(1, Ordering::SeqCst) + 1;
		let payment_id = format!("pay-{}", seq);
		let receipt = PaymentReceipt {
			payment_id: payment_id.clone(),
			order_id: order_id.to_string(),
			status: self.initial_status,
		};
		self.clearing
			.payments
			.insert(payment_id.clone(), (receipt, price));

		tracing::debug!(payment_id = %payment_id, order_id = %order_id, "Created in-memory payment");
		Ok(payment_id)
	}

	async fn get_payment(&self, payment_id: &str) -> Result<PaymentReceipt, PaymentError> {
		self.clearing.get_calls.fetch_add(1, Ordering::SeqCst);
		if self.clearing.unavailable.load(Ordering::SeqCst) {
			return Err(PaymentError::Transport(
				"clearing service unavailable".into(),
			));
		}

		self.clearing
			.payments
			.get(payment_id)
			.map(|entry| entry.0.clone())
			.ok_or_else(|| PaymentError::NotFound(payment_id.to_string()))
	}

	async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), PaymentError> {
		let mut listener = self.clearing.listener.lock().await;
		if listener.is_some() {
			return Err(PaymentError::AlreadyListening);
		}
		*listener = Some(sender);
		Ok(())
	}

	async fn stop_listening(&self) -> Result<(), PaymentError> {
		self.clearing.listener.lock().await.take();
		Ok(())
	}
}

/// Configuration schema for MemoryPayment.
pub struct MemoryPaymentSchema;

impl ConfigSchema for MemoryPaymentSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("initial_status", FieldType::String).with_validator(|value| {
				let status = value.as_str().unwrap_or_default();
				PaymentStatus::from_clearing(status)
					.map(|_| ())
					.map_err(|e| e.to_string())
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create an in-memory payment gateway.
///
/// Configuration parameters:
/// - `initial_status`: clearing status new payments start at (default: "pending")
pub fn create_payment(config: &toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError> {
	MemoryPaymentSchema
		.validate(config)
		.map_err(|e| PaymentError::Configuration(e.to_string()))?;

	let initial_status = match config.get("initial_status").and_then(|v| v.as_str()) {
		Some(status) => PaymentStatus::from_clearing(status)
			.map_err(|e| PaymentError::Configuration(e.to_string()))?,
		None => PaymentStatus::Open,
	};

	Ok(Box::new(MemoryPayment::with_initial_status(initial_status)))
}

/// Registry for the in-memory payment implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = PaymentFactory;

	fn factory() -> Self::Factory {
		create_payment
	}
}

impl PaymentRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_payments_get_sequential_ids() {
		let gateway = MemoryPayment::new();
		let handle = gateway.handle();

		let first = gateway.create_payment("o-1", Decimal::new(4200, 2)).await.unwrap();
		let second = gateway.create_payment("o-2", Decimal::new(100, 2)).await.unwrap();
		assert_eq!(first, "pay-1");
		assert_eq!(second, "pay-2");
		assert_eq!(handle.amount("pay-1"), Some(Decimal::new(4200, 2)));

		let receipt = gateway.get_payment("pay-1").await.unwrap();
		assert_eq!(receipt.order_id, "o-1");
		assert_eq!(receipt.status, PaymentStatus::Open);
	}

	#[tokio::test]
	async fn test_failure_injection() {
		let gateway = MemoryPayment::new();
		let handle = gateway.handle();

		handle.fail_next_create();
		assert!(matches!(
			gateway.create_payment("o-1", Decimal::ONE).await,
			Err(PaymentError::Transport(_))
		));
		assert_eq!(gateway.create_payment("o-1", Decimal::ONE).await.unwrap(), "pay-1");
		assert_eq!(handle.create_calls(), 2);

		handle.set_unavailable(true);
		assert!(gateway.get_payment("pay-1").await.is_err());
		handle.set_unavailable(false);
		assert!(matches!(
			gateway.get_payment("pay-9").await,
			Err(PaymentError::NotFound(_))
		));
	}

	#[tokio::test]
	async fn test_publish_reaches_listener() {
		let gateway = MemoryPayment::new();
		let handle = gateway.handle();
		assert!(!handle.publish("pay-1", "paid").await);

		let (tx, mut rx) = mpsc::unbounded_channel();
		gateway.start_listening(tx.clone()).await.unwrap();
		assert!(matches!(
			gateway.start_listening(tx).await,
			Err(PaymentError::AlreadyListening)
		));

		assert!(handle.publish("pay-1", "paid").await);
		let payload = rx.recv().await.unwrap();
		let message: PaymentStatusChangedMessage = serde_json::from_str(&payload).unwrap();
		assert_eq!(message.payment_id.as_deref(), Some("pay-1"));
		assert_eq!(message.status, "paid");

		gateway.stop_listening().await.unwrap();
		assert!(!handle.publish("pay-1", "paid").await);
	}

	#[test]
	fn test_factory_validates_initial_status() {
		let config: toml::Value = toml::from_str(r#"initial_status = "paid""#).unwrap();
		assert!(create_payment(&config).is_ok());

		let config: toml::Value = toml::from_str(r#"initial_status = "chargeback""#).unwrap();
		assert!(matches!(
			create_payment(&config),
			Err(PaymentError::Configuration(_))
		));
	}
}
