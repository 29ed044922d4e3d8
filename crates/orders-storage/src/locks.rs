//! Per-key async locks.
//!
//! A key's mutex exists only while somebody holds or waits for it; the last
//! guard to go removes the entry, so the map stays as small as the set of
//! keys in use.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Map of async mutexes keyed by string.
#[derive(Default)]
pub struct KeyedLocks {
	locks: DashMap<String, Arc<Mutex<()>>>,
}

impl KeyedLocks {
	pub fn new() -> Self {
		Self::default()
	}

	/// Waits for and takes the lock of `key`.
	pub async fn lock(&self, key: &str) -> KeyedGuard<'_> {
		let mutex = self
			.locks
			.entry(key.to_string())
			.or_insert_with(|| Arc::new(Mutex::new(())))
			.clone();

		KeyedGuard {
			locks: &self.locks,
			key: key.to_string(),
			guard: Some(mutex.lock_owned().await),
		}
	}

	/// Number of keys currently locked or waited on.
	pub fn len(&self) -> usize {
		self.locks.len()
	}

	pub fn is_empty(&self) -> bool {
		self.locks.is_empty()
	}
}

/// Holds one key's lock until dropped.
pub struct KeyedGuard<'a> {
	locks: &'a DashMap<String, Arc<Mutex<()>>>,
	key: String,
	guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard<'_> {
	fn drop(&mut self) {
		// Releases the mutex and this guard's reference to it.
		self.guard.take();
		// Only the map's reference left means nobody else holds or waits.
		self.locks
			.remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
	}
}
