//! Storage backend with switchable faults for tests.

use async_trait::async_trait;
use atelier_storage::{
	implementations::memory::MemoryStorage, ExpectedVersion, StorageError, StorageInterface,
	VersionedBytes,
};
use atelier_types::ConfigSchema;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

/// Fault switches shared between a test and its [`FaultyStorage`].
#[derive(Default)]
pub struct Faults {
	read_failures: AtomicU32,
	failing_writes: Mutex<Option<String>>,
}

impl Faults {
	/// Fails the next `count` reads.
	pub fn fail_reads(&self, count: u32) {
		self.read_failures.store(count, Ordering::SeqCst);
	}

	/// Fails every write to a key in `namespace` until `recover` is called.
	pub fn fail_writes_to(&self, namespace: &str) {
		*self.failing_writes.lock().unwrap() = Some(format!("{}:", namespace));
	}

	pub fn recover(&self) {
		self.read_failures.store(0, Ordering::SeqCst);
		*self.failing_writes.lock().unwrap() = None;
	}

	fn take_read_failure(&self) -> bool {
		self.read_failures
			.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |left| left.checked_sub(1))
			.is_ok()
	}

	fn write_fails(&self, key: &str) -> bool {
		self.failing_writes
			.lock()
			.unwrap()
			.as_deref()
			.is_some_and(|prefix| key.starts_with(prefix))
	}
}

/// In-memory backend that returns backend errors while a fault is switched on.
pub struct FaultyStorage {
	inner: MemoryStorage,
	faults: Arc<Faults>,
}

impl FaultyStorage {
	pub fn new() -> (Self, Arc<Faults>) {
		let faults = Arc::new(Faults::default());
		(
			Self {
				inner: MemoryStorage::new(),
				faults: faults.clone(),
			},
			faults,
		)
	}
}

fn outage() -> StorageError {
	StorageError::Backend("connection reset".into())
}

#[async_trait]
impl StorageInterface for FaultyStorage {
	async fn get(&self, key: &str) -> Result<VersionedBytes, StorageError> {
		if self.faults.take_read_failure() {
			return Err(outage());
		}
		self.inner.get(key).await
	}

	async fn put(
		&self,
		key: &str,
		value: Vec<u8>,
		expected: ExpectedVersion,
	) -> Result<u64, StorageError> {
		if self.faults.write_fails(key) {
			return Err(outage());
		}
		self.inner.put(key, value, expected).await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		self.inner.exists(key).await
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		self.inner.list_keys(namespace).await
	}

	fn config_schema(&self) -> Box<dyn ConfigSchema> {
		self.inner.config_schema()
	}
}
