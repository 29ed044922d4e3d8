//! Durable queue of checkouts awaiting payment settlement.
//!
//! The queue is a single ordered list stored under one key. Every mutation
//! rewrites the whole list under a mutex, which keeps append and remove atomic
//! with respect to each other and is cheap for the handful of orders that are
//! in flight at any moment.

use crate::{StorageError, StorageService};
use orders_types::{PendingWorkEntry, StorageKey};
use std::sync::Arc;
use tokio::sync::Mutex;

const QUEUE_ID: &str = "queue";

/// Pending work queue backed by a [`StorageService`].
pub struct PendingWorkQueue {
	storage: Arc<StorageService>,
	write_lock: Mutex<()>,
}

impl PendingWorkQueue {
	pub fn new(storage: Arc<StorageService>) -> Self {
		Self {
			storage,
			write_lock: Mutex::new(()),
		}
	}

	async fn load(&self) -> Result<Vec<PendingWorkEntry>, StorageError> {
		match self
			.storage
			.retrieve(StorageKey::PendingWork.as_str(), QUEUE_ID)
			.await
		{
			Ok(entries) => Ok(entries),
			Err(StorageError::NotFound) => Ok(Vec::new()),
			Err(e) => Err(e),
		}
	}

	async fn save(&self, entries: &[PendingWorkEntry]) -> Result<(), StorageError> {
		self.storage
			.store(StorageKey::PendingWork.as_str(), QUEUE_ID, &entries)
			.await
	}

	/// Appends an entry.
	///
	/// Fails with `AlreadyExists` if the order already has a live entry.
	pub async fn append(&self, entry: PendingWorkEntry) -> Result<(), StorageError> {
		let _guard = self.write_lock.lock().await;

		let mut entries = self.load().await?;
		if entries.iter().any(|e| e.order_id == entry.order_id) {
			return Err(StorageError::AlreadyExists(entry.order_id));
		}
		entries.push(entry);
		self.save(&entries).await
	}

	/// Returns every entry in insertion order.
	pub async fn read_all(&self) -> Result<Vec<PendingWorkEntry>, StorageError> {
		self.load().await
	}

	/// Returns the live entry for an order, if any.
	pub async fn find(&self, order_id: &str) -> Result<Option<PendingWorkEntry>, StorageError> {
		Ok(self
			.load()
			.await?
			.into_iter()
			.find(|entry| entry.order_id == order_id))
	}

	/// Removes an entry by value.
	///
	/// Returns whether anything was removed; removing an absent entry is not an
	/// error.
	pub async fn remove(&self, entry: &PendingWorkEntry) -> Result<bool, StorageError> {
		let _guard = self.write_lock.lock().await;

		let mut entries = self.load().await?;
		let before = entries.len();
		entries.retain(|e| e != entry);
		if entries.len() == before {
			return Ok(false);
		}
		self.save(&entries).await?;
		Ok(true)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::implementations::file::FileStorage;
	use crate::implementations::memory::MemoryStorage;
	use tempfile::TempDir;

	fn queue() -> PendingWorkQueue {
		PendingWorkQueue::new(Arc::new(StorageService::new(Box::new(MemoryStorage::new()))))
	}

	#[tokio::test]
	async fn test_append_read_remove() {
		let queue = queue();
		assert!(queue.read_all().await.unwrap().is_empty());

		queue.append(PendingWorkEntry::new("o-1", "pay-1")).await.unwrap();
		queue.append(PendingWorkEntry::new("o-2", "pay-2")).await.unwrap();
		assert_eq!(
			queue.read_all().await.unwrap(),
			vec![
				PendingWorkEntry::new("o-1", "pay-1"),
				PendingWorkEntry::new("o-2", "pay-2")
			]
		);

		assert!(queue.remove(&PendingWorkEntry::new("o-1", "pay-1")).await.unwrap());
		assert!(!queue.remove(&PendingWorkEntry::new("o-1", "pay-1")).await.unwrap());
		assert_eq!(
			queue.read_all().await.unwrap(),
			vec![PendingWorkEntry::new("o-2", "pay-2")]
		);
	}

	#[tokio::test]
	async fn test_one_live_entry_per_order() {
		let queue = queue();
		queue.append(PendingWorkEntry::new("o-1", "pay-1")).await.unwrap();

		let result = queue.append(PendingWorkEntry::new("o-1", "pay-9")).await;
		assert!(matches!(result, Err(StorageError::AlreadyExists(id)) if id == "o-1"));
		assert_eq!(
			queue.find("o-1").await.unwrap(),
			Some(PendingWorkEntry::new("o-1", "pay-1"))
		);
	}

	#[tokio::test]
	async fn test_remove_matches_whole_entry() {
		let queue = queue();
		queue.append(PendingWorkEntry::new("o-1", "pay-1")).await.unwrap();

		assert!(!queue.remove(&PendingWorkEntry::new("o-1", "pay-2")).await.unwrap());
		assert!(queue.find("o-1").await.unwrap().is_some());
	}

	#[tokio::test]
	async fn test_entries_survive_restart() {
		let temp_dir = TempDir::new().unwrap();
		{
			let storage = FileStorage::open(temp_dir.path()).unwrap();
			let queue = PendingWorkQueue::new(Arc::new(StorageService::new(Box::new(storage))));
			queue.append(PendingWorkEntry::new("o-1", "pay-1")).await.unwrap();
		}

		let storage = FileStorage::open(temp_dir.path()).unwrap();
		let queue = PendingWorkQueue::new(Arc::new(StorageService::new(Box::new(storage))));
		assert_eq!(
			queue.read_all().await.unwrap(),
			vec![PendingWorkEntry::new("o-1", "pay-1")]
		);
	}

	#[tokio::test]
	async fn test_concurrent_appends_keep_every_entry() {
		let queue = Arc::new(queue());
		let mut handles = Vec::new();
		for i in 0..20 {
			let queue = queue.clone();
			handles.push(tokio::spawn(async move {
				queue
					.append(PendingWorkEntry::new(format!("o-{}", i), format!("pay-{}", i)))
					.await
					.unwrap();
			}));
		}
		for handle in handles {
			handle.await.unwrap();
		}
		assert_eq!(queue.read_all().await.unwrap().len(), 20);
	}
}
