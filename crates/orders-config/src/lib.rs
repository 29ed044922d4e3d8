//! Configuration for the order lifecycle orchestrator.
//!
//! Configuration is read from TOML. `${VAR}` and `${VAR:-default}` references
//! are resolved from the environment before parsing, and a file may pull in
//! other files with `include = ["payment.toml", ...]` as long as every
//! top-level section is defined exactly once across all of them.

mod loader;

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	#[error("Configuration error: {0}")]
	Parse(String),
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		ConfigError::Parse(err.message().to_string())
	}
}

/// Top-level configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of this service instance.
	pub service: ServiceConfig,
	/// Storage backend holding orders and the pending work queue.
	pub storage: StorageConfig,
	/// Payment-clearing gateway.
	pub payment: GatewayConfig,
	/// Production (kitchen) gateway.
	pub production: GatewayConfig,
	/// Worker tuning. Every field has a default.
	#[serde(default)]
	pub orchestrator: OrchestratorConfig,
}

/// Configuration specific to the service instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServiceConfig {
	/// Identifier used in logs.
	pub id: String,
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Configuration for an external gateway (payment or production).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GatewayConfig {
	/// Which implementation to use.
	pub primary: String,
	/// Map of implementation names to their raw configurations.
	pub implementations: HashMap<String, toml::Value>,
}

impl GatewayConfig {
	/// Raw configuration of the primary implementation.
	pub fn primary_config(&self) -> Option<&toml::Value> {
		self.implementations.get(&self.primary)
	}
}

/// Tuning for the background workers.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OrchestratorConfig {
	/// Reconciler cadence in milliseconds.
	#[serde(default = "default_poll_interval_ms")]
	pub poll_interval_ms: u64,
	/// Deadline applied to every gateway call.
	#[serde(default = "default_gateway_timeout_seconds")]
	pub gateway_timeout_seconds: u64,
	/// How long an order may sit at RECEIVED before the reconciler asks the
	/// kitchen again.
	#[serde(default = "default_redrive_after_seconds")]
	pub redrive_after_seconds: u64,
	/// Upper bound on event handlers running at once.
	#[serde(default = "default_max_concurrent_handlers")]
	pub max_concurrent_handlers: usize,
}

impl OrchestratorConfig {
	pub fn poll_interval(&self) -> Duration {
		Duration::from_millis(self.poll_interval_ms)
	}

	pub fn gateway_timeout(&self) -> Duration {
		Duration::from_secs(self.gateway_timeout_seconds)
	}

	pub fn redrive_after(&self) -> Duration {
		Duration::from_secs(self.redrive_after_seconds)
	}
}

impl Default for OrchestratorConfig {
	fn default() -> Self {
		Self {
			poll_interval_ms: default_poll_interval_ms(),
			gateway_timeout_seconds: default_gateway_timeout_seconds(),
			redrive_after_seconds: default_redrive_after_seconds(),
			max_concurrent_handlers: default_max_concurrent_handlers(),
		}
	}
}

fn default_poll_interval_ms() -> u64 {
	1000
}

fn default_gateway_timeout_seconds() -> u64 {
	10
}

fn default_redrive_after_seconds() -> u64 {
	30
}

fn default_max_concurrent_handlers() -> usize {
	100
}

/// Resolves environment variables in a string.
///
/// Replaces `${VAR_NAME}` with the value of `VAR_NAME` and supports defaults
/// with `${VAR_NAME:-default_value}`. Inputs are capped at 1MB.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut resolved = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match std::env::var(name.as_str()) {
			Ok(v) => v,
			Err(_) => match cap.get(2) {
				Some(default) => default.as_str().to_string(),
				None => {
					return Err(ConfigError::Validation(format!(
						"Environment variable '{}' not found",
						name.as_str()
					)))
				}
			},
		};
		resolved.push_str(&input[last..whole.start()]);
		resolved.push_str(&value);
		last = whole.end();
	}
	resolved.push_str(&input[last..]);

	Ok(resolved)
}

impl Config {
	/// Loads configuration from a file, following `include` directives.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| ConfigError::Validation(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Checks cross-field constraints serde cannot express.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.service.id.is_empty() {
			return Err(ConfigError::Validation("Service ID cannot be empty".into()));
		}

		Self::validate_primary("storage", &self.storage.primary, &self.storage.implementations)?;
		Self::validate_primary("payment", &self.payment.primary, &self.payment.implementations)?;
		Self::validate_primary(
			"production",
			&self.production.primary,
			&self.production.implementations,
		)?;

		let orchestrator = &self.orchestrator;
		if orchestrator.poll_interval_ms == 0 {
			return Err(ConfigError::Validation(
				"orchestrator.poll_interval_ms must be greater than zero".into(),
			));
		}
		if orchestrator.gateway_timeout_seconds == 0 {
			return Err(ConfigError::Validation(
				"orchestrator.gateway_timeout_seconds must be greater than zero".into(),
			));
		}
		if orchestrator.max_concurrent_handlers == 0 {
			return Err(ConfigError::Validation(
				"orchestrator.max_concurrent_handlers must be greater than zero".into(),
			));
		}

		Ok(())
	}

	fn validate_primary(
		section: &str,
		primary: &str,
		implementations: &HashMap<String, toml::Value>,
	) -> Result<(), ConfigError> {
		if implementations.is_empty() {
			return Err(ConfigError::Validation(format!(
				"At least one {} implementation must be configured",
				section
			)));
		}
		if primary.is_empty() {
			return Err(ConfigError::Validation(format!(
				"{} primary implementation cannot be empty",
				section
			)));
		}
		if !implementations.contains_key(primary) {
			return Err(ConfigError::Validation(format!(
				"Primary {} '{}' not found in implementations",
				section, primary
			)));
		}
		Ok(())
	}
}

/// Parses configuration from a TOML string.
///
/// Environment variables are resolved first and the result is validated.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const BASE: &str = r#"
[service]
id = "orders-test"

[storage]
primary = "memory"
[storage.implementations.memory]

[payment]
primary = "memory"
[payment.implementations.memory]

[production]
primary = "memory"
[production.implementations.memory]
"#;

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ORDERS_TEST_HOST", "payments");
		std::env::set_var("ORDERS_TEST_PORT", "8080");

		let input = "url = \"http://${ORDERS_TEST_HOST}:${ORDERS_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "url = \"http://payments:8080\"");

		std::env::remove_var("ORDERS_TEST_HOST");
		std::env::remove_var("ORDERS_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${ORDERS_MISSING_VAR:-fallback}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"fallback\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${ORDERS_MISSING_VAR}\"");
		assert!(result.unwrap_err().to_string().contains("ORDERS_MISSING_VAR"));
	}

	#[test]
	fn test_orchestrator_defaults() {
		let config: Config = BASE.parse().unwrap();
		assert_eq!(config.service.id, "orders-test");
		assert_eq!(config.orchestrator.poll_interval(), Duration::from_secs(1));
		assert_eq!(config.orchestrator.gateway_timeout(), Duration::from_secs(10));
		assert_eq!(config.orchestrator.redrive_after(), Duration::from_secs(30));
		assert!(config.payment.primary_config().is_some());
	}

	#[test]
	fn test_orchestrator_overrides() {
		let input = format!(
			"{}\n[orchestrator]\npoll_interval_ms = 250\nredrive_after_seconds = 5\n",
			BASE
		);
		let config: Config = input.parse().unwrap();
		assert_eq!(config.orchestrator.poll_interval(), Duration::from_millis(250));
		assert_eq!(config.orchestrator.redrive_after(), Duration::from_secs(5));
		assert_eq!(config.orchestrator.gateway_timeout_seconds, 10);
	}

	#[test]
	fn test_primary_must_be_configured() {
		let input = BASE.replace(
			"[payment]\nprimary = \"memory\"",
			"[payment]\nprimary = \"http\"",
		);
		let err = input.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary payment 'http'"));
	}

	#[test]
	fn test_zero_poll_interval_rejected() {
		let input = format!("{}\n[orchestrator]\npoll_interval_ms = 0\n", BASE);
		assert!(input.parse::<Config>().is_err());
	}
}
