//! Main entry point for the order lifecycle service.
//!
//! This binary runs the orchestrator that checks orders out, follows their
//! payments and hands paid orders to the kitchen. Storage and both gateways
//! are pluggable and selected by name in the configuration file.

use clap::Parser;
use orders_config::Config;
use orders_core::{OrderEngine, OrdersBuilder, OrdersFactories};
use std::path::PathBuf;

// Import implementations from individual crates
use orders_payment::implementations::http::create_payment as create_http_payment;
use orders_payment::implementations::memory::create_payment as create_memory_payment;
use orders_production::implementations::http::create_production as create_http_production;
use orders_production::implementations::memory::create_production as create_memory_production;
use orders_storage::implementations::file::create_storage as create_file_storage;
use orders_storage::implementations::memory::create_storage as create_memory_storage;

/// Command-line arguments for the order service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

/// Main entry point for the order service.
///
/// This function:
/// 1. Parses command-line arguments
/// 2. Initializes logging infrastructure
/// 3. Loads configuration from file
/// 4. Builds the order engine with all implementations
/// 5. Runs the workers until interrupted
#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};

	let default_directive = args.log_level.to_string();
	let env_filter =
		EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_directive));

	fmt()
		.with_env_filter(env_filter)
		.with_thread_ids(true)
		.with_target(true)
		.init();

	tracing::info!("Started order service");

	let config_path = args
		.config
		.to_str()
		.ok_or("configuration path is not valid UTF-8")?;
	let config = Config::from_file(config_path).await?;
	tracing::info!("Loaded configuration [{}]", config.service.id);

	let engine = build_engine(config)?;
	engine.run().await?;

	tracing::info!("Stopped order service");
	Ok(())
}

/// Macro to create a factory HashMap with the appropriate type aliases
macro_rules! create_factory_map {
    ($interface:path, $error:path, $( $name:literal => $factory:expr ),* $(,)?) => {{
        let mut factories = std::collections::HashMap::new();
        $(
            factories.insert(
                $name.to_string(),
                $factory as fn(&toml::Value) -> Result<Box<dyn $interface>, $error>
            );
        )*
        factories
    }};
}

/// Builds the order engine with all necessary implementations.
///
/// This function wires up the concrete implementations for:
/// - Storage backends (in-memory, file)
/// - Payment gateways (in-memory clearing, HTTP clearing service)
/// - Production gateways (in-memory kitchen, HTTP kitchen service)
fn build_engine(config: Config) -> Result<OrderEngine, Box<dyn std::error::Error>> {
	let builder = OrdersBuilder::new(config);

	let storage_factories = create_factory_map!(
		orders_storage::StorageInterface,
		orders_storage::StorageError,
		"file" => create_file_storage,
		"memory" => create_memory_storage,
	);

	let payment_factories = create_factory_map!(
		orders_payment::PaymentInterface,
		orders_payment::PaymentError,
		"http" => create_http_payment,
		"memory" => create_memory_payment,
	);

	let production_factories = create_factory_map!(
		orders_production::ProductionInterface,
		orders_production::ProductionError,
		"http" => create_http_production,
		"memory" => create_memory_production,
	);

	let factories = OrdersFactories {
		storage_factories,
		payment_factories,
		production_factories,
	};

	Ok(builder.build(factories)?)
}

#[cfg(test)]
mod tests {
	use super::*;
	use orders_types::{OrderStatus, ProductSnapshot};
	use tempfile::tempdir;

	fn memory_config() -> Config {
		r#"
[service]
id = "orders-test"

[storage]
primary = "memory"
[storage.implementations.memory]

[payment]
primary = "memory"
[payment.implementations.memory]
initial_status = "paid"

[production]
primary = "memory"
[production.implementations.memory]

[orchestrator]
poll_interval_ms = 10
"#
		.parse()
		.unwrap()
	}

	#[test]
	fn test_args_default_values() {
		let args = Args::parse_from(["orders"]);
		assert_eq!(args.config, PathBuf::from("config.toml"));
		assert_eq!(args.log_level, "info");
	}

	#[test]
	fn test_args_custom_values() {
		let args = Args::parse_from(["orders", "--config", "custom.toml", "-l", "debug"]);
		assert_eq!(args.config, PathBuf::from("custom.toml"));
		assert_eq!(args.log_level, "debug");
	}

	#[test]
	fn test_create_factory_map_multiple_entries() {
		let factories = create_factory_map!(
			orders_storage::StorageInterface,
			orders_storage::StorageError,
			"memory" => create_memory_storage,
			"file" => create_file_storage,
		);

		assert_eq!(factories.len(), 2);
		assert!(factories.contains_key("memory"));
		assert!(factories.contains_key("file"));
	}

	#[tokio::test]
	async fn test_build_and_settle_through_reconciler() {
		let engine = build_engine(memory_config()).unwrap();
		let order = engine
			.create_order(
				None,
				vec![ProductSnapshot {
					id: "p1".into(),
					name: "Pastel".into(),
					description: String::new(),
					category_id: "snacks".into(),
					price: rust_decimal::Decimal::new(900, 2),
				}],
			)
			.await
			.unwrap();
		engine.checkout(&order.id).await.unwrap();

		let report = engine.reconciler().reconcile_once().await;
		assert_eq!(report.settled, 1);
		assert_eq!(
			engine.get_order(&order.id).await.unwrap().status,
			OrderStatus::Preparing
		);
	}

	#[tokio::test]
	async fn test_shipped_configuration_loads() {
		let path = PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../config/orders.toml");
		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();

		assert_eq!(config.service.id, "orders-local");
		assert_eq!(config.payment.primary, "http");
		assert_eq!(config.production.primary, "http");
		assert_eq!(config.orchestrator.poll_interval_ms, 1000);
	}

	#[tokio::test]
	async fn test_build_with_file_storage() {
		let dir = tempdir().unwrap();
		let path = dir.path().join("config.toml");
		std::fs::write(
			&path,
			format!(
				r#"
[service]
id = "orders-file"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "{}"

[payment]
primary = "memory"
[payment.implementations.memory]

[production]
primary = "memory"
[production.implementations.memory]
"#,
				dir.path().join("data").display()
			),
		)
		.unwrap();

		let config = Config::from_file(path.to_str().unwrap()).await.unwrap();
		assert_eq!(config.service.id, "orders-file");
		assert!(build_engine(config).is_ok());
	}
}
