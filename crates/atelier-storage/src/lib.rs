//! Storage module for the atelier system.
//!
//! This module provides the persistent store abstraction shared by every
//! stateless atelier instance. Besides plain reads, backends offer a single
//! conditional write primitive (insert-if-absent or compare-and-set on a
//! record version), which is what lets concurrent instances mutate orders,
//! queue items and tailor capacity without in-process locks.

use async_trait::async_trait;
use atelier_types::{ConfigSchema, ImplementationRegistry, Versioned};
use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

/// Re-export implementations
pub mod implementations {
	pub mod file;
	pub mod memory;
}

/// Errors that can occur during storage operations.
#[derive(Debug, Error)]
pub enum StorageError {
	/// Error that occurs when a requested item is not found.
	#[error("Not found")]
	NotFound,
	/// An insert found a record already stored under the key.
	#[error("Already exists")]
	AlreadyExists,
	/// A conditional write found a different version than expected.
	#[error("Version conflict: expected {expected}, found {actual}")]
	VersionConflict { expected: u64, actual: u64 },
	/// Error that occurs during serialization/deserialization.
	#[error("Serialization error: {0}")]
	Serialization(String),
	/// Error that occurs in the storage backend.
	#[error("Backend error: {0}")]
	Backend(String),
	/// Error that occurs during configuration validation.
	#[error("Configuration error: {0}")]
	Configuration(String),
}

impl StorageError {
	/// Backend failures may clear up on their own; everything else is final.
	pub fn is_transient(&self) -> bool {
		matches!(self, StorageError::Backend(_))
	}
}

/// Condition attached to a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExpectedVersion {
	/// The key must not exist yet.
	Absent,
	/// The stored record must be at exactly this version.
	Exact(u64),
}

/// Raw record bytes with their version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBytes {
	pub version: u64,
	pub bytes: Vec<u8>,
}

/// Trait defining the low-level interface for storage backends.
///
/// Implementations must make the version check and the write in `put` one
/// atomic step with respect to every other caller of the same store.
#[async_trait]
pub trait StorageInterface: Send + Sync {
	/// Retrieves raw bytes and the current version for the given key.
	async fn get(&self, key: &str) -> Result<VersionedBytes, StorageError>;

	/// Writes raw bytes if the stored version matches `expected`.
	/// Returns the new version.
	async fn put(
		&self,
		key: &str,
		value: Vec<u8>,
		expected: ExpectedVersion,
	) -> Result<u64, StorageError>;

	/// Checks if a key exists in storage.
	async fn exists(&self, key: &str) -> Result<bool, StorageError>;

	/// Lists the ids stored under a namespace.
	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError>;

	/// Returns the configuration schema for validation.
	fn config_schema(&self) -> Box<dyn ConfigSchema>;
}

/// Type alias for storage factory functions.
pub type StorageFactory = fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>;

/// Registry trait for storage implementations.
pub trait StorageRegistry: ImplementationRegistry<Factory = StorageFactory> {}

/// Get all registered storage implementations.
///
/// Returns a vector of (name, factory) tuples, used by the service's factory
/// registry to resolve `[storage.implementations.<name>]` tables.
pub fn get_all_implementations() -> Vec<(&'static str, StorageFactory)> {
	use implementations::{file, memory};

	vec![
		(file::Registry::NAME, file::Registry::factory()),
		(memory::Registry::NAME, memory::Registry::factory()),
	]
}

fn record_key(namespace: &str, id: &str) -> String {
	format!("{}:{}", namespace, id)
}

/// High-level storage service that provides typed, versioned operations.
///
/// Records are stored as JSON. Every read returns the record's version and
/// every update must name the version it was derived from.
pub struct StorageService {
	/// The underlying storage backend implementation.
	backend: Box<dyn StorageInterface>,
}

impl StorageService {
	/// Creates a new StorageService with the specified backend.
	pub fn new(backend: Box<dyn StorageInterface>) -> Self {
		Self { backend }
	}

	/// Stores a new record. Fails with `AlreadyExists` if the id is taken.
	pub async fn insert<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
	) -> Result<u64, StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.put(&record_key(namespace, id), bytes, ExpectedVersion::Absent)
			.await
	}

	/// Retrieves and deserializes a record together with its version.
	pub async fn retrieve<T: DeserializeOwned>(
		&self,
		namespace: &str,
		id: &str,
	) -> Result<Versioned<T>, StorageError> {
		let stored = self.backend.get(&record_key(namespace, id)).await?;
		let data = serde_json::from_slice(&stored.bytes)
			.map_err(|e| StorageError::Serialization(e.to_string()))?;
		Ok(Versioned::new(stored.version, data))
	}

	/// Replaces a record if it is still at `expected_version`.
	///
	/// Returns the new version, or `VersionConflict` if another writer got
	/// there first.
	pub async fn update<T: Serialize>(
		&self,
		namespace: &str,
		id: &str,
		data: &T,
		expected_version: u64,
	) -> Result<u64, StorageError> {
		let bytes =
			serde_json::to_vec(data).map_err(|e| StorageError::Serialization(e.to_string()))?;
		self.backend
			.put(
				&record_key(namespace, id),
				bytes,
				ExpectedVersion::Exact(expected_version),
			)
			.await
	}

	/// Checks if a record exists.
	pub async fn exists(&self, namespace: &str, id: &str) -> Result<bool, StorageError> {
		self.backend.exists(&record_key(namespace, id)).await
	}

	/// Retrieves every record in a namespace.
	///
	/// Records removed between listing and reading are skipped.
	pub async fn list<T: DeserializeOwned>(
		&self,
		namespace: &str,
	) -> Result<Vec<Versioned<T>>, StorageError> {
		let ids = self.backend.list_keys(namespace).await?;
		let mut records = Vec::with_capacity(ids.len());
		for id in ids {
			match self.retrieve(namespace, &id).await {
				Ok(record) => records.push(record),
				Err(StorageError::NotFound) => continue,
				Err(e) => return Err(e),
			}
		}
		Ok(records)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use implementations::memory::MemoryStorage;
	use serde::Deserialize;

	#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
	struct Counter {
		value: u32,
	}

	fn service() -> StorageService {
		StorageService::new(Box::new(MemoryStorage::new()))
	}

	#[tokio::test]
	async fn test_insert_then_retrieve() {
		let storage = service();
		let version = storage
			.insert("counters", "a", &Counter { value: 1 })
			.await
			.unwrap();
		assert_eq!(version, 1);

		let record: Versioned<Counter> = storage.retrieve("counters", "a").await.unwrap();
		assert_eq!(record.version, 1);
		assert_eq!(record.data, Counter { value: 1 });
	}

	#[tokio::test]
	async fn test_insert_twice_rejected() {
		let storage = service();
		storage
			.insert("counters", "a", &Counter { value: 1 })
			.await
			.unwrap();
		let result = storage.insert("counters", "a", &Counter { value: 2 }).await;
		assert!(matches!(result, Err(StorageError::AlreadyExists)));
	}

	#[tokio::test]
	async fn test_stale_update_rejected() {
		let storage = service();
		storage
			.insert("counters", "a", &Counter { value: 1 })
			.await
			.unwrap();
		let v2 = storage
			.update("counters", "a", &Counter { value: 2 }, 1)
			.await
			.unwrap();
		assert_eq!(v2, 2);

		let stale = storage
			.update("counters", "a", &Counter { value: 3 }, 1)
			.await;
		assert!(matches!(
			stale,
			Err(StorageError::VersionConflict {
				expected: 1,
				actual: 2
			})
		));

		let record: Versioned<Counter> = storage.retrieve("counters", "a").await.unwrap();
		assert_eq!(record.data.value, 2);
	}

	#[tokio::test]
	async fn test_update_missing_record() {
		let storage = service();
		let result = storage
			.update("counters", "missing", &Counter { value: 1 }, 1)
			.await;
		assert!(matches!(result, Err(StorageError::NotFound)));
	}

	#[tokio::test]
	async fn test_list_namespace() {
		let storage = service();
		storage
			.insert("counters", "a", &Counter { value: 1 })
			.await
			.unwrap();
		storage
			.insert("counters", "b", &Counter { value: 2 })
			.await
			.unwrap();
		storage
			.insert("others", "c", &Counter { value: 3 })
			.await
			.unwrap();

		let mut records: Vec<Versioned<Counter>> = storage.list("counters").await.unwrap();
		records.sort_by_key(|r| r.data.value);
		assert_eq!(records.len(), 2);
		assert_eq!(records[0].data.value, 1);
		assert_eq!(records[1].data.value, 2);
	}

	#[test]
	fn test_only_backend_errors_are_transient() {
		assert!(StorageError::Backend("io".into()).is_transient());
		assert!(!StorageError::NotFound.is_transient());
		assert!(!StorageError::VersionConflict {
			expected: 1,
			actual: 2
		}
		.is_transient());
	}
}
