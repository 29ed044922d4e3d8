//! Payment gateway module for the order lifecycle orchestrator.
//!
//! The payment-clearing service is an external collaborator. This module
//! defines the narrow client the orchestrator needs from it: creating a
//! payment for an order, reading a payment's current status, and receiving
//! the raw payment-status-changed messages the service publishes.
//!
//! Messages are forwarded undecoded so the consumer decides what to do with
//! malformed payloads.

use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry, PaymentReceipt};
use rust_decimal::Decimal;
use thiserror::Error;
use tokio::sync::mpsc;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod memory;
}

/// Errors that can occur during payment gateway operations.
#[derive(Debug, Error)]
pub enum PaymentError {
	/// The clearing service could not be reached or answered with an error.
	#[error("Transport error: {0}")]
	Transport(String),
	/// The clearing service has no payment with this id.
	#[error("Payment not found: {0}")]
	NotFound(String),
	/// The clearing service answered with something that could not be understood.
	#[error("Invalid response: {0}")]
	InvalidResponse(String),
	/// Listening was requested while already listening.
	#[error("Already listening")]
	AlreadyListening,
	/// The webhook receiving status messages could not be started.
	#[error("Listener error: {0}")]
	Listener(String),
	/// The implementation configuration is invalid.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

/// Trait defining the interface for payment gateway implementations.
#[async_trait]
pub trait PaymentInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Creates a payment sized to `price` for an order and returns its id.
	async fn create_payment(&self, order_id: &str, price: Decimal) -> Result<String, PaymentError>;

	/// Reads the current status of a payment.
	async fn get_payment(&self, payment_id: &str) -> Result<PaymentReceipt, PaymentError>;

	/// Starts forwarding raw payment-status-changed payloads to `sender`.
	async fn start_listening(&self, sender: mpsc::UnboundedSender<String>)
		-> Result<(), PaymentError>;

	/// Stops forwarding payloads. Calling it while not listening is a no-op.
	async fn stop_listening(&self) -> Result<(), PaymentError>;
}

/// Type alias for payment factory functions.
pub type PaymentFactory = fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>;

/// Registry trait for payment implementations.
pub trait PaymentRegistry: ImplementationRegistry<Factory = PaymentFactory> {}

/// Get all registered payment implementations.
///
/// Returns a vector of (name, factory) tuples for all available payment implementations.
pub fn get_all_implementations() -> Vec<(&'static str, PaymentFactory)> {
	use implementations::{http, memory};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Service wrapping the configured payment gateway.
pub struct PaymentService {
	implementation: Box<dyn PaymentInterface>,
}

impl PaymentService {
	pub fn new(implementation: Box<dyn PaymentInterface>) -> Self {
		Self { implementation }
	}

	/// Creates a payment for an order.
	pub async fn create_payment(
		&self,
		order_id: &str,
		price: Decimal,
	) -> Result<String, PaymentError> {
		let payment_id = self.implementation.create_payment(order_id, price).await?;
		if payment_id.trim().is_empty() {
			return Err(PaymentError::InvalidResponse(
				"clearing service returned an empty payment id".into(),
			));
		}
		Ok(payment_id)
	}

	/// Reads a payment's current status.
	pub async fn get_payment(&self, payment_id: &str) -> Result<PaymentReceipt, PaymentError> {
		self.implementation.get_payment(payment_id).await
	}

	/// Starts forwarding payment-status-changed payloads.
	pub async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), PaymentError> {
		self.implementation.start_listening(sender).await
	}

	/// Stops forwarding payloads.
	pub async fn stop_listening(&self) -> Result<(), PaymentError> {
		self.implementation.stop_listening().await
	}
}
