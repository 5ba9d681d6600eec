//! Typed, retried access to the three record collections.

use crate::retry::{with_store_retry, RetryPolicy};
use crate::CoreError;
use atelier_storage::StorageService;
use atelier_types::{StorageKey, Versioned};
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;

/// Wraps the storage service so every call is retried on transient store
/// failures and every error arrives in the core taxonomy.
#[derive(Clone)]
pub struct Records {
	storage: Arc<StorageService>,
	retry: RetryPolicy,
}

impl Records {
	pub fn new(storage: Arc<StorageService>, retry: RetryPolicy) -> Self {
		Self { storage, retry }
	}

	pub async fn get<T: DeserializeOwned>(
		&self,
		key: StorageKey,
		id: &str,
	) -> Result<Versioned<T>, CoreError> {
		let storage = &self.storage;
		with_store_retry(&self.retry, move || async move {
			storage
				.retrieve(key.as_str(), id)
				.await
				.map_err(|e| CoreError::from_storage(e, key, id))
		})
		.await
	}

	/// Like `get`, but a missing record is `None` rather than an error.
	pub async fn find<T: DeserializeOwned>(
		&self,
		key: StorageKey,
		id: &str,
	) -> Result<Option<Versioned<T>>, CoreError> {
		match self.get(key, id).await {
			Ok(record) => Ok(Some(record)),
			Err(CoreError::NotFound(_)) => Ok(None),
			Err(e) => Err(e),
		}
	}

	pub async fn insert<T: Serialize + Sync>(
		&self,
		key: StorageKey,
		id: &str,
		data: &T,
	) -> Result<u64, CoreError> {
		let storage = &self.storage;
		with_store_retry(&self.retry, move || async move {
			storage
				.insert(key.as_str(), id, data)
				.await
				.map_err(|e| CoreError::from_storage(e, key, id))
		})
		.await
	}

	/// Conditional write on `version`. A lost race is `ConcurrentModification`.
	pub async fn update<T: Serialize + Sync>(
		&self,
		key: StorageKey,
		id: &str,
		data: &T,
		version: u64,
	) -> Result<u64, CoreError> {
		let storage = &self.storage;
		with_store_retry(&self.retry, move || async move {
			storage
				.update(key.as_str(), id, data, version)
				.await
				.map_err(|e| CoreError::from_storage(e, key, id))
		})
		.await
	}

	pub async fn list<T: DeserializeOwned>(
		&self,
		key: StorageKey,
	) -> Result<Vec<Versioned<T>>, CoreError> {
		let storage = &self.storage;
		with_store_retry(&self.retry, move || async move {
			storage
				.list(key.as_str())
				.await
				.map_err(|e| CoreError::from_storage(e, key, "*"))
		})
		.await
	}

	pub async fn exists(&self, key: StorageKey, id: &str) -> Result<bool, CoreError> {
		let storage = &self.storage;
		with_store_retry(&self.retry, move || async move {
			storage
				.exists(key.as_str(), id)
				.await
				.map_err(|e| CoreError::from_storage(e, key, id))
		})
		.await
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::FaultyStorage;
	use std::time::Duration;

	fn records(failures: u32, attempts: u32) -> Records {
		let (backend, faults) = FaultyStorage::new();
		faults.fail_reads(failures);
		Records::new(
			Arc::new(StorageService::new(Box::new(backend))),
			RetryPolicy::new(attempts, Duration::from_millis(1), Duration::from_millis(2)),
		)
	}

	#[tokio::test]
	async fn test_transient_read_failures_are_retried() {
		let records = records(2, 3);
		records.insert(StorageKey::Orders, "o-1", &"hello").await.unwrap();

		let stored: Versioned<String> = records.get(StorageKey::Orders, "o-1").await.unwrap();
		assert_eq!(stored.data, "hello");
		assert_eq!(stored.version, 1);
	}

	#[tokio::test]
	async fn test_persistent_failure_is_store_unavailable() {
		let records = records(10, 3);
		records.insert(StorageKey::Orders, "o-1", &"hello").await.unwrap();

		let result = records.get::<String>(StorageKey::Orders, "o-1").await;
		assert_eq!(result, Err(CoreError::StoreUnavailable("connection reset".into())));
	}

	#[tokio::test]
	async fn test_find_and_stale_update() {
		let records = records(0, 1);
		assert!(records
			.find::<String>(StorageKey::Tailors, "t-1")
			.await
			.unwrap()
			.is_none());

		records.insert(StorageKey::Tailors, "t-1", &1u32).await.unwrap();
		records.update(StorageKey::Tailors, "t-1", &2u32, 1).await.unwrap();
		let stale = records.update(StorageKey::Tailors, "t-1", &3u32, 1).await;
		assert!(matches!(stale, Err(CoreError::ConcurrentModification(_))));
	}
}
