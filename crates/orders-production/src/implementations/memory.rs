//! In-process kitchen.
//!
//! Records every preparation request and lets a [`MemoryProductionHandle`]
//! publish status messages and switch request failures on and off.

use crate::{ProductionError, ProductionFactory, ProductionInterface, ProductionRegistry};
use async_trait::async_trait;
use orders_types::{
	ConfigSchema, ImplementationRegistry, ProductionStatusChangedMessage, Schema, ValidationError,
};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};

#[derive(Default)]
struct Kitchen {
	requests: Mutex<Vec<String>>,
	failing: AtomicBool,
	listener: Mutex<Option<mpsc::UnboundedSender<String>>>,
}

/// In-memory production gateway.
#[derive(Default)]
pub struct MemoryProduction {
	kitchen: Arc<Kitchen>,
}

impl MemoryProduction {
	pub fn new() -> Self {
		Self::default()
	}

	/// Returns a handle controlling this gateway.
	pub fn handle(&self) -> MemoryProductionHandle {
		MemoryProductionHandle {
			kitchen: self.kitchen.clone(),
		}
	}
}

/// Cloneable control handle for a [`MemoryProduction`].
#[derive(Clone)]
pub struct MemoryProductionHandle {
	kitchen: Arc<Kitchen>,
}

impl MemoryProductionHandle {
	/// Order ids of every accepted preparation request, in arrival order.
	pub async fn requests(&self) -> Vec<String> {
		self.kitchen.requests.lock().await.clone()
	}

	/// Number of accepted preparation requests for one order.
	pub async fn requests_for(&self, order_id: &str) -> usize {
		self.kitchen
			.requests
			.lock()
			.await
			.iter()
			.filter(|id| id.as_str() == order_id)
			.count()
	}

	/// Makes preparation requests fail until switched off again.
	pub fn set_failing(&self, failing: bool) {
		self.kitchen.failing.store(failing, Ordering::SeqCst);
	}

	/// Publishes a raw payload on the status channel.
	///
	/// Returns false when nobody is listening.
	pub async fn publish_raw(&self, payload: impl Into<String>) -> bool {
		match self.kitchen.listener.lock().await.as_ref() {
			Some(sender) => sender.send(payload.into()).is_ok(),
			None => false,
		}
	}

	/// Publishes a status message for an order.
	pub async fn publish(&self, order_id: &str, status: &str) -> bool {
		let message = ProductionStatusChangedMessage {
			order_id: order_id.to_string(),
			status: status.to_string(),
			updated_at: Some(chrono::Utc::now()),
		};
		match serde_json::to_string(&message) {
			Ok(payload) => self.publish_raw(payload).await,
			Err(_) => false,
		}
	}
}

#[async_trait]
impl ProductionInterface for MemoryProduction {
	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryProductionSchema)
	}

	async fn request_preparation(&self, order_id: &str) -> Result<(), ProductionError> {
		if self.kitchen.failing.load(Ordering::SeqCst) {
			return Err(ProductionError::Transport(
				"kitchen service unavailable".into(),
			));
		}
		self.kitchen.requests.lock().await.push(order_id.to_string());
		tracing::debug!(order_id = %order_id, "Kitchen accepted preparation request");
		Ok(())
	}

	async fn start_listening(
		&self,
		sender: mpsc::UnboundedSender<String>,
	) -> Result<(), ProductionError> {
		let mut listener = self.kitchen.listener.lock().await;
		if listener.is_some() {
			return Err(ProductionError::AlreadyListening);
		}
		*listener = Some(sender);
		Ok(())
	}

	async fn stop_listening(&self) -> Result<(), ProductionError> {
		self.kitchen.listener.lock().await.take();
		Ok(())
	}
}

/// Configuration schema for MemoryProduction.
pub struct MemoryProductionSchema;

impl ConfigSchema for MemoryProductionSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create an in-memory production gateway.
///
/// No configuration parameters.
pub fn create_production(
	config: &toml::Value,
) -> Result<Box<dyn ProductionInterface>, ProductionError> {
	MemoryProductionSchema
		.validate(config)
		.map_err(|e| ProductionError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryProduction::new()))
}

/// Registry for the in-memory production implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = ProductionFactory;

	fn factory() -> Self::Factory {
		create_production
	}
}

impl ProductionRegistry for Registry {}
