//! Production gateway module for the order lifecycle orchestrator.
//!
//! The kitchen (production) service is an external collaborator. The
//! orchestrator asks it to start preparing paid orders and listens to the
//! production-status-changed messages it publishes as orders move through
//! the kitchen.

use async_trait::async_trait;
use orders_types::{ConfigSchema, ImplementationRegistry};
use thiserror::Error;
use tokio::sync::mpsc;

/// Re-export implementations
pub mod implementations {
	pub mod http;
	pub mod memory;
}

/// Errors that can occur during production gateway operations.
#[derive(Debug, Error)]
pub enum ProductionError {
	/// The kitchen service could not be reached or answered with an error.
	#[error("Transport error: {0}")]
	Transport(String),
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

/// Trait defining the interface for production gateway implementations.
#[async_trait]
pub trait ProductionInterface: Send + Sync {
	/// Returns the configuration schema for this implementation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;

	/// Asks the kitchen to start preparing a paid order.
	async fn request_preparation(&self, order_id: &str) -> Result<(), ProductionError>;

	/// Starts forwarding raw production-status-changed payloads to `sender`.
	async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), ProductionError>;

	/// Stops forwarding payloads. Calling it while not listening is a no-op.
	async fn stop_listening(&self) -> Result<(), ProductionError>;
}

/// Type alias for production factory functions.
pub type ProductionFactory =
	fn(&toml::Value) -> Result<Box<dyn ProductionInterface>, ProductionError>;

/// Registry trait for production implementations.
pub trait ProductionRegistry: ImplementationRegistry<Factory = ProductionFactory> {}

/// Get all registered production implementations.
pub fn get_all_implementations() -> Vec<(&'static str, ProductionFactory)> {
	use implementations::{http, memory};

	vec![
		(http::Registry::NAME, http::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

/// Service wrapping the configured production gateway.
pub struct ProductionService {
	implementation: Box<dyn ProductionInterface>,
}

impl ProductionService {
	pub fn new(implementation: Box<dyn ProductionInterface>) -> Self {
		Self { implementation }
	}

	/// Asks the kitchen to start preparing an order.
	pub async fn request_preparation(&self, order_id: &str) -> Result<(), ProductionError> {
		self.implementation.request_preparation(order_id).await
	}

	/// Starts forwarding production-status-changed payloads.
	pub async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), ProductionError> {
		self.implementation.start_listening(sender).await
	}

	/// Stops forwarding payloads.
	pub async fn stop_listening(&self) -> Result<(), ProductionError> {
		self.implementation.stop_listening().await
	}
}
