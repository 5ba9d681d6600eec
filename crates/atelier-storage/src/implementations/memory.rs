//! In-memory storage backend implementation for the atelier service.
//!
//! This module provides a memory-based implementation of the StorageInterface trait,
//! useful for testing and single-process deployments where persistence is not required.

use crate::{ExpectedVersion, StorageError, StorageFactory, StorageInterface, VersionedBytes};
use async_trait::async_trait;
use atelier_types::{ConfigSchema, ImplementationRegistry, Schema, ValidationError};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// In-memory storage implementation.
///
/// Records live in a HashMap keyed by `namespace:id`, each paired with its
/// version. Conditional writes check and replace under the write guard.
pub struct MemoryStorage {
	/// The in-memory store protected by a read-write lock.
	store: Arc<RwLock<HashMap<String, (u64, Vec<u8>)>>>,
}

impl MemoryStorage {
	/// Creates a new MemoryStorage instance.
	pub fn new() -> Self {
		Self {
			store: Arc::new(RwLock::new(HashMap::new())),
		}
	}
}

impl Default for MemoryStorage {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl StorageInterface for MemoryStorage {
	async fn get(&self, key: &str) -> Result<VersionedBytes, StorageError> {
		let store = self.store.read().await;
		store
			.get(key)
			.map(|(version, bytes)| VersionedBytes {
				version: *version,
				bytes: bytes.clone(),
			})
			.ok_or(StorageError::NotFound)
	}

	async fn put(
		&self,
		key: &str,
		value: Vec<u8>,
		expected: ExpectedVersion,
	) -> Result<u64, StorageError> {
		let mut store = self.store.write().await;
		let current = store.get(key).map(|(version, _)| *version);

		let next = match (expected, current) {
			(ExpectedVersion::Absent, None) => 1,
			(ExpectedVersion::Absent, Some(_)) => return Err(StorageError::AlreadyExists),
			(ExpectedVersion::Exact(_), None) => return Err(StorageError::NotFound),
			(ExpectedVersion::Exact(expected), Some(actual)) if expected != actual => {
				return Err(StorageError::VersionConflict { expected, actual })
			},
			(ExpectedVersion::Exact(_), Some(actual)) => actual + 1,
		};

		store.insert(key.to_string(), (next, value));
		Ok(next)
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let store = self.store.read().await;
		Ok(store.contains_key(key))
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let prefix = format!("{}:", namespace);
		let store = self.store.read().await;
		let mut ids: Vec<String> = store
			.keys()
			.filter_map(|key| key.strip_prefix(&prefix).map(str::to_string))
			.collect();
		ids.sort();
		Ok(ids)
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		Box::new(MemoryStorageSchema)
	}
}

/// Configuration schema for MemoryStorage.
pub struct MemoryStorageSchema;

impl ConfigSchema for MemoryStorageSchema {
	fn validate(&self, config: &toml::Value) -> Result<(), ValidationError> {
		// No settings; any key is a typo
		Schema::new(vec![], vec![]).validate(config)
	}
}

/// Factory function to create a memory storage backend from configuration.
///
/// Configuration parameters:
/// - None required for memory storage
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	MemoryStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;
	Ok(Box::new(MemoryStorage::new()))
}

/// Registry for the memory storage implementation.
pub struct Registry;

impl ImplementationRegistry for Registry {
	const NAME: &'static str = "memory";
	type Factory = StorageFactory;

	fn factory() -> Self::Factory {
		create_storage
	}
}

impl crate::StorageRegistry for Registry {}

#[cfg(test)]
mod tests {
	use super::*;
	use futures::future::join_all;

	#[tokio::test]
	async fn test_basic_operations() {
		let storage = MemoryStorage::new();

		let key = "orders:o-1";
		let version = storage
			.put(key, b"first".to_vec(), ExpectedVersion::Absent)
			.await
			.unwrap();
		assert_eq!(version, 1);

		let stored = storage.get(key).await.unwrap();
		assert_eq!(stored.version, 1);
		assert_eq!(stored.bytes, b"first".to_vec());
		assert!(storage.exists(key).await.unwrap());

		let version = storage
			.put(key, b"second".to_vec(), ExpectedVersion::Exact(1))
			.await
			.unwrap();
		assert_eq!(version, 2);
		assert_eq!(storage.get(key).await.unwrap().bytes, b"second".to_vec());
	}

	#[tokio::test]
	async fn test_missing_key() {
		let storage = MemoryStorage::new();
		assert!(matches!(
			storage.get("orders:none").await,
			Err(StorageError::NotFound)
		));
		assert!(!storage.exists("orders:none").await.unwrap());
	}

	#[tokio::test]
	async fn test_conflicting_writes() {
		let storage = MemoryStorage::new();
		storage
			.put("tailors:t-1", b"a".to_vec(), ExpectedVersion::Absent)
			.await
			.unwrap();

		let again = storage
			.put("tailors:t-1", b"b".to_vec(), ExpectedVersion::Absent)
			.await;
		assert!(matches!(again, Err(StorageError::AlreadyExists)));

		let stale = storage
			.put("tailors:t-1", b"b".to_vec(), ExpectedVersion::Exact(7))
			.await;
		assert!(matches!(
			stale,
			Err(StorageError::VersionConflict {
				expected: 7,
				actual: 1
			})
		));
	}

	#[tokio::test]
	async fn test_only_one_concurrent_writer_wins() {
		let storage = Arc::new(MemoryStorage::new());
		storage
			.put("tailors:t-1", b"0".to_vec(), ExpectedVersion::Absent)
			.await
			.unwrap();

		let writers = (0..16).map(|i| {
			let storage = storage.clone();
			tokio::spawn(async move {
				storage
					.put(
						"tailors:t-1",
						i.to_string().into_bytes(),
						ExpectedVersion::Exact(1),
					)
					.await
			})
		});

		let results = join_all(writers).await;
		let winners = results
			.into_iter()
			.filter(|r| matches!(r, Ok(Ok(2))))
			.count();
		assert_eq!(winners, 1);
		assert_eq!(storage.get("tailors:t-1").await.unwrap().version, 2);
	}

	#[tokio::test]
	async fn test_list_keys_by_namespace() {
		let storage = MemoryStorage::new();
		for key in ["orders:b", "orders:a", "queue_items:pq-a"] {
			storage
				.put(key, vec![], ExpectedVersion::Absent)
				.await
				.unwrap();
		}
		assert_eq!(storage.list_keys("orders").await.unwrap(), vec!["a", "b"]);
		assert_eq!(
			storage.list_keys("queue_items").await.unwrap(),
			vec!["pq-a"]
		);
		assert!(storage.list_keys("tailors").await.unwrap().is_empty());
	}

	#[test]
	fn test_factory_rejects_unknown_settings() {
		let config: toml::Value = toml::from_str("ttl_orders = 10").unwrap();
		assert!(matches!(
			create_storage(&config),
			Err(StorageError::Configuration(_))
		));
		let empty = toml::Value::Table(toml::map::Map::new());
		assert!(create_storage(&empty).is_ok());
	}
}
