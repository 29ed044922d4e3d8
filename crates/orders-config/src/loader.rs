//! Multi-file configuration loading.
//!
//! A configuration file may list other files under `include`. Their top-level
//! sections are merged into the main file; defining the same section twice is
//! an error, as is including a file that was already loaded.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Loads a configuration file together with its includes.
pub struct ConfigLoader {
	/// Directory relative includes are resolved against.
	base_path: PathBuf,
	/// Canonical paths already read, to catch include cycles.
	loaded_files: HashSet<PathBuf>,
	/// Which file defined each top-level section.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads and validates a configuration file and everything it includes.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let main_path = self.resolve_path(config_path)?;
		let mut merged = self.read_toml(&main_path).await?;

		let includes = Self::take_includes(&mut merged)?;
		self.record_sections(&merged, &main_path)?;

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let included = self.read_toml(&include_path).await?;
			self.record_sections(&included, &include_path)?;

			if let (Some(target), toml::Value::Table(source)) = (merged.as_table_mut(), included)
			{
				target.extend(source);
			}
		}

		let rendered = toml::to_string(&merged).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		rendered.parse()
	}

	/// Reads a file, resolves environment variables and parses it as TOML.
	async fn read_toml(&mut self, path: &Path) -> Result<toml::Value, ConfigError> {
		let canonical = path.canonicalize().map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		let resolved = resolve_env_vars(&content)?;
		Ok(toml::from_str(&resolved)?)
	}

	/// Removes the `include` directive and returns the listed paths.
	fn take_includes(toml: &mut toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
		let Some(include) = toml.as_table_mut().and_then(|t| t.remove("include")) else {
			return Ok(Vec::new());
		};

		match include {
			toml::Value::String(path) => Ok(vec![PathBuf::from(path)]),
			toml::Value::Array(items) => items
				.into_iter()
				.map(|item| match item {
					toml::Value::String(path) => Ok(PathBuf::from(path)),
					_ => Err(ConfigError::Validation(
						"Include array must contain only strings".into(),
					)),
				})
				.collect(),
			_ => Err(ConfigError::Validation(
				"Include must be a string or array of strings".into(),
			)),
		}
	}

	fn record_sections(&mut self, toml: &toml::Value, source: &Path) -> Result<(), ConfigError> {
		let Some(table) = toml.as_table() else {
			return Ok(());
		};

		for key in table.keys() {
			if let Some(existing) = self.section_sources.get(key) {
				return Err(ConfigError::Validation(format!(
					"Duplicate section '{}' found in {} and {}",
					key,
					existing.display(),
					source.display()
				)));
			}
			self.section_sources.insert(key.clone(), source.to_path_buf());
		}
		Ok(())
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}

		Ok(resolved)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const GATEWAYS: &str = r#"
[payment]
primary = "http"
[payment.implementations.http]
base_url = "http://payments:8080"

[production]
primary = "memory"
[production.implementations.memory]
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let content = format!(
			r#"
[service]
id = "orders-single"

[storage]
primary = "file"
[storage.implementations.file]
storage_path = "./data"
{}"#,
			GATEWAYS
		);
		fs::write(temp_dir.path().join("config.toml"), content).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("config.toml").await.unwrap();

		assert_eq!(config.service.id, "orders-single");
		assert_eq!(config.storage.primary, "file");
		assert_eq!(config.payment.primary, "http");
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		let main = r#"
include = ["gateways.toml"]

[service]
id = "orders-split"

[storage]
primary = "memory"
[storage.implementations.memory]

[orchestrator]
poll_interval_ms = 500
"#;
		fs::write(temp_dir.path().join("main.toml"), main).unwrap();
		fs::write(temp_dir.path().join("gateways.toml"), GATEWAYS).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config("main.toml").await.unwrap();

		assert_eq!(config.service.id, "orders-split");
		assert_eq!(config.production.primary, "memory");
		assert_eq!(config.orchestrator.poll_interval_ms, 500);
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		let main = r#"
include = ["duplicate.toml"]

[service]
id = "orders-a"
"#;
		let duplicate = r#"
[service]
id = "orders-b"
"#;
		fs::write(temp_dir.path().join("main.toml"), main).unwrap();
		fs::write(temp_dir.path().join("duplicate.toml"), duplicate).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(err.to_string().contains("Duplicate section 'service'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		let config = r#"
include = ["self.toml"]

[service]
id = "orders-loop"
"#;
		fs::write(temp_dir.path().join("self.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("self.toml").await.unwrap_err();
		assert!(err.to_string().contains("already loaded"));
	}
}
