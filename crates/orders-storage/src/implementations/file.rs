//! File-based storage backend.
//!
//! Each namespace gets its own directory under the configured base path and
//! every record is a JSON file inside it. Writes go to a temporary file that is
//! renamed over the target, so readers never observe a half-written record.
//! The base directory is locked exclusively for the lifetime of the backend;
//! two processes sharing one directory would break per-order atomicity.

use crate::{StorageError, StorageFactory, StorageInterface, StorageRegistry};
use async_trait::async_trait;
use fs2::FileExt;
use orders_types::{ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::fs;

const LOCK_FILE: &str = ".lock";
const DEFAULT_NAMESPACE: &str = "default";
const DEFAULT_STORAGE_PATH: &str = "./data/orders";

/// File-based storage implementation.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
	/// Held open so the exclusive lock lives as long as the backend.
	_lock: std::fs::File,
	/// Disambiguates temporary files of concurrent writers.
	write_seq: AtomicU64,
}

impl FileStorage {
	/// Opens (creating if needed) a storage directory and locks it.
	pub fn open(base_path: impl Into<PathBuf>) -> Result<Self, StorageError> {
		let base_path = base_path.into();
		std::fs::create_dir_all(&base_path).map_err(|e| StorageError::Backend(e.to_string()))?;

		let lock = std::fs::OpenOptions::new()
			.create(true)
			.truncate(false)
			.write(true)
			.open(base_path.join(LOCK_FILE))
			.map_err(|e| StorageError::Backend(e.to_string()))?;
		lock.try_lock_exclusive().map_err(|e| {
			StorageError::Backend(format!(
				"Storage directory {} is locked by another process: {}",
				base_path.display(),
				e
			))
		})?;

		tracing::debug!(path = %base_path.display(), "Opened file storage");

		Ok(Self {
			base_path,
			_lock: lock,
			write_seq: AtomicU64::new(0),
		})
	}

	/// Splits a key into its namespace and a filesystem-safe file name.
	fn split_key(key: &str) -> (&str, String) {
		let (namespace, id) = key.split_once(':').unwrap_or((DEFAULT_NAMESPACE, key));
		(namespace, id.replace(['/', '\\'], "_"))
	}

	fn get_file_path(&self, key: &str) -> PathBuf {
		let (namespace, id) = Self::split_key(key);
		self.base_path
			.join(namespace)
			.join(format!("{}.json", id))
	}

	fn is_record(path: &Path) -> bool {
		path.extension() == Some(std::ffi::OsStr::new("json"))
	}
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get_bytes(&self, key: &str) -> Result<Vec<u8>, StorageError> {
		let path = self.get_file_path(key);

		match fs::read(&path).await {
			Ok(data) => Ok(data),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(StorageError::NotFound),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn set_bytes(&self, key: &str, value: Vec<u8>) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		if let Some(parent) = path.parent() {
			fs::create_dir_all(parent)
				.await
				.map_err(|e| StorageError::Backend(e.to_string()))?;
		}

		// Write atomically by writing to a temp file then renaming
		let seq = self.write_seq.fetch_add(1, Ordering::Relaxed);
		let temp_path = path.with_extension(format!("{}.tmp", seq));
		fs::write(&temp_path, value)
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?;

		if let Err(e) = fs::rename(&temp_path, &path).await {
			let _ = fs::remove_file(&temp_path).await;
			return Err(StorageError::Backend(e.to_string()));
		}

		Ok(())
	}

	async fn delete(&self, key: &str) -> Result<(), StorageError> {
		let path = self.get_file_path(key);

		match fs::remove_file(&path).await {
			Ok(_) => Ok(()),
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
			Err(e) => Err(StorageError::Backend(e.to_string())),
		}
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		fs::try_exists(self.get_file_path(key))
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))
	}

	async fn list_keys(&self, prefix: &str) -> Result<Vec<String>, StorageError> {
		let (namespace, _) = Self::split_key(prefix);
		let dir = self.base_path.join(namespace);

		let mut entries = match fs::read_dir(&dir).await {
			Ok(entries) => entries,
			Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
			Err(e) => return Err(StorageError::Backend(e.to_string())),
		};

		let mut keys = Vec::new();
		while let Some(entry) = entries
			.next_entry()
			.await
			.map_err(|e| StorageError::Backend(e.to_string()))?
		{
			let path = entry.path();
			if !Self::is_record(&path) {
				continue;
			}
			let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
				tracing::debug!("Skipping file {:?}: name is not valid UTF-8", path);
				continue;
			};
			let key = format!("{}:{}", namespace, stem);
			if key.starts_with(prefix) {
				keys.push(key);
			}
		}
		Ok(keys)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(FileStorageSchema)
	}
}

/// Configuration schema for FileStorage.
pub struct FileStorageSchema;

impl ConfigSchema for FileStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		let schema = Schema::new(
			vec![],
			vec![Field::new("storage_path", FieldType::String).with_validator(|value| {
				match value.as_str() {
					Some(path) if !path.trim().is_empty() => Ok(()),
					_ => Err("storage_path cannot be empty".to_string()),
				}
			})],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for file storage (default: "./data/orders")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or(DEFAULT_STORAGE_PATH);

	Ok(Box::new(FileStorage::open(storage_path)?))
}

/// Registry for the file storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "file";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl StorageRegistry for Registry {}
