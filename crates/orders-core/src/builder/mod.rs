//! Builder pattern for constructing order engines.
//!
//! Composes an OrderEngine from storage, payment and production
//! implementations selected by name in the configuration. Each section's
//! `primary` implementation is created through its factory; factories validate
//! their own configuration.

use crate::engine::{event_bus::EventBus, OrderEngine};
use orders_config::Config;
use orders_payment::{PaymentError, PaymentInterface, PaymentService};
use orders_production::{ProductionError, ProductionInterface, ProductionService};
use orders_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::fmt::Display;
use std::sync::Arc;
use thiserror::Error;

// Events buffered per subscriber before slow subscribers start lagging.
const EVENT_BUS_CAPACITY: usize = 1000;

/// Errors that can occur during order engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Container for all factory functions needed to build an OrderEngine.
pub struct OrdersFactories<SF, PF, PRF> {
	pub storage_factories: HashMap<String, SF>,
	pub payment_factories: HashMap<String, PF>,
	pub production_factories: HashMap<String, PRF>,
}

/// Builder for constructing an OrderEngine with pluggable implementations.
pub struct OrdersBuilder {
	config: Config,
}

impl OrdersBuilder {
	/// Creates a new OrdersBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self { config }
	}

	/// Builds the OrderEngine using factories for each component type.
	pub fn build<SF, PF, PRF>(
		self,
		factories: OrdersFactories<SF, PF, PRF>,
	) -> Result<OrderEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
		PF: Fn(&toml::Value) -> Result<Box<dyn PaymentInterface>, PaymentError>,
		PRF: Fn(&toml::Value) -> Result<Box<dyn ProductionInterface>, ProductionError>,
	{
		let storage = load_primary(
			"storage",
			&self.config.storage.primary,
			&self.config.storage.implementations,
			&factories.storage_factories,
		)?;
		let payment = load_primary(
			"payment",
			&self.config.payment.primary,
			&self.config.payment.implementations,
			&factories.payment_factories,
		)?;
		let production = load_primary(
			"production",
			&self.config.production.primary,
			&self.config.production.implementations,
			&factories.production_factories,
		)?;

		tracing::info!(
			service_id = %self.config.service.id,
			poll_interval_ms = self.config.orchestrator.poll_interval_ms,
			"Order engine built"
		);

		Ok(OrderEngine::new(
			self.config.orchestrator,
			Arc::new(StorageService::new(storage)),
			Arc::new(PaymentService::new(payment)),
			Arc::new(ProductionService::new(production)),
			EventBus::new(EVENT_BUS_CAPACITY),
		))
	}
}

fn load_primary<I, E, F>(
	component: &str,
	primary: &str,
	implementations: &HashMap<String, toml::Value>,
	factories: &HashMap<String, F>,
) -> Result<Box<I>, BuilderError>
where
	I: ?Sized,
	E: Display,
	F: Fn(&toml::Value) -> Result<Box<I>, E>,
{
	let config = implementations.get(primary).ok_or_else(|| {
		BuilderError::Config(format!(
			"Primary {} implementation '{}' has no configuration",
			component, primary
		))
	})?;

	let factory = factories.get(primary).ok_or_else(|| {
		BuilderError::MissingComponent(format!(
			"no {} implementation named '{}'",
			component, primary
		))
	})?;

	match factory(config) {
		Ok(implementation) => {
			tracing::info!(component = %component, implementation = %primary, "Loaded");
			Ok(implementation)
		}
		Err(e) => {
			tracing::error!(
				component = %component,
				implementation = %primary,
				error = %e,
				"Failed to create implementation"
			);
			Err(BuilderError::Config(format!(
				"Failed to create {} implementation '{}': {}",
				component, primary, e
			)))
		}
	}
}
