//! File-based storage backend for the atelier service.
//!
//! Each record is one file at `<storage_path>/<namespace>/<id>.bin`, prefixed
//! with a fixed header that carries the record version. Conditional writes
//! hold an exclusive advisory lock on a sibling `.lock` file while they read
//! the current version and swap in the new file, so several processes can
//! share one directory.

use crate::{ExpectedVersion, StorageError, StorageFactory, StorageInterface, VersionedBytes};
use async_trait::async_trait;
use atelier_types::{
	ConfigSchema, Field, FieldType, ImplementationRegistry, Schema, ValidationError,
};
use fs2::FileExt;
use std::fs::{self, OpenOptions};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

#[allow(clippy::doc_nested_refdefs)]
/// Fixed-size record header.
///
/// Binary layout (64 bytes total):
/// - [0-3]: Magic bytes "ATLR"
/// - [4-5]: Format version (u16, little-endian)
/// - [6-13]: Record version (u64, little-endian)
/// - [14-63]: Reserved
#[derive(Debug, Clone, Copy)]
struct FileHeader {
	record_version: u64,
}

impl FileHeader {
	const MAGIC: &'static [u8; 4] = b"ATLR";
	const FORMAT: u16 = 1;
	const SIZE: usize = 64;

	fn serialize(&self) -> [u8; Self::SIZE] {
		let mut bytes = [0u8; Self::SIZE];
		bytes[0..4].copy_from_slice(Self::MAGIC);
		bytes[4..6].copy_from_slice(&Self::FORMAT.to_le_bytes());
		bytes[6..14].copy_from_slice(&self.record_version.to_le_bytes());
		bytes
	}

	fn deserialize(bytes: &[u8]) -> Result<Self, StorageError> {
		if bytes.len() < Self::SIZE {
			return Err(StorageError::Serialization(
				"File too small for header".into(),
			));
		}
		if &bytes[0..4] != Self::MAGIC {
			return Err(StorageError::Serialization("Bad magic bytes".into()));
		}
		let format = u16::from_le_bytes([bytes[4], bytes[5]]);
		if format > Self::FORMAT {
			return Err(StorageError::Serialization(format!(
				"Unsupported file format: {}",
				format
			)));
		}
		let mut version = [0u8; 8];
		version.copy_from_slice(&bytes[6..14]);
		Ok(Self {
			record_version: u64::from_le_bytes(version),
		})
	}
}

fn backend_error(e: std::io::Error) -> StorageError {
	StorageError::Backend(e.to_string())
}

/// Reads the record at `path`, returning `None` when the file is missing.
fn read_record(path: &Path) -> Result<Option<VersionedBytes>, StorageError> {
	let data = match fs::read(path) {
		Ok(data) => data,
		Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
		Err(e) => return Err(backend_error(e)),
	};
	let header = FileHeader::deserialize(&data)?;
	Ok(Some(VersionedBytes {
		version: header.record_version,
		bytes: data[FileHeader::SIZE..].to_vec(),
	}))
}

/// File-based storage implementation.
///
/// Blocking filesystem work runs on tokio's blocking pool so advisory locks
/// never stall the async executor.
pub struct FileStorage {
	/// Base directory path for storing files.
	base_path: PathBuf,
}

impl FileStorage {
	/// Creates a new FileStorage instance rooted at `base_path`.
	pub fn new(base_path: PathBuf) -> Self {
		Self { base_path }
	}

	/// Splits a `namespace:id` key into the record's directory and file stem.
	fn locate(&self, key: &str) -> Result<(PathBuf, String), StorageError> {
		let (namespace, id) = key
			.split_once(':')
			.ok_or_else(|| StorageError::Backend(format!("Malformed key: {}", key)))?;
		let safe_id = id.replace(['/', '\\', ':'], "_");
		Ok((self.base_path.join(namespace), safe_id))
	}

	fn record_path(&self, key: &str) -> Result<PathBuf, StorageError> {
		let (dir, stem) = self.locate(key)?;
		Ok(dir.join(format!("{}.bin", stem)))
	}
}

async fn blocking<T, F>(work: F) -> Result<T, StorageError>
where
	T: Send + 'static,
	F: FnOnce() -> Result<T, StorageError> + Send + 'static,
{
	tokio::task::spawn_blocking(work)
		.await
		.map_err(|e| StorageError::Backend(format!("Storage task failed: {}", e)))?
}

#[async_trait]
impl StorageInterface for FileStorage {
	async fn get(&self, key: &str) -> Result<VersionedBytes, StorageError> {
		let path = self.record_path(key)?;
		blocking(move || read_record(&path)?.ok_or(StorageError::NotFound)).await
	}

	async fn put(
		&self,
		key: &str,
		value: Vec<u8>,
		expected: ExpectedVersion,
	) -> Result<u64, StorageError> {
		let (dir, stem) = self.locate(key)?;

		blocking(move || {
			fs::create_dir_all(&dir).map_err(backend_error)?;

			let lock_file = OpenOptions::new()
				.create(true)
				.truncate(false)
				.write(true)
				.open(dir.join(format!("{}.lock", stem)))
				.map_err(backend_error)?;
			lock_file.lock_exclusive().map_err(backend_error)?;

			let path = dir.join(format!("{}.bin", stem));
			let result = (|| {
				let current = read_record(&path)?.map(|record| record.version);
				let next = match (expected, current) {
					(ExpectedVersion::Absent, None) => 1,
					(ExpectedVersion::Absent, Some(_)) => return Err(StorageError::AlreadyExists),
					(ExpectedVersion::Exact(_), None) => return Err(StorageError::NotFound),
					(ExpectedVersion::Exact(expected), Some(actual)) if expected != actual => {
						return Err(StorageError::VersionConflict { expected, actual })
					},
					(ExpectedVersion::Exact(_), Some(actual)) => actual + 1,
				};

				let header = FileHeader {
					record_version: next,
				};
				let mut file_data = Vec::with_capacity(FileHeader::SIZE + value.len());
				file_data.extend_from_slice(&header.serialize());
				file_data.extend_from_slice(&value);

				// Readers never take the lock, so the swap must be a rename
				let temp_path = path.with_extension("tmp");
				fs::write(&temp_path, file_data).map_err(backend_error)?;
				fs::rename(&temp_path, &path).map_err(backend_error)?;
				Ok(next)
			})();

			if let Err(e) = FileExt::unlock(&lock_file) {
				tracing::warn!("Failed to release lock for {:?}: {}", path, e);
			}
			result
		})
		.await
	}

	async fn exists(&self, key: &str) -> Result<bool, StorageError> {
		let path = self.record_path(key)?;
		Ok(path.exists())
	}

	async fn list_keys(&self, namespace: &str) -> Result<Vec<String>, StorageError> {
		let dir = self.base_path.join(namespace);
		blocking(move || {
			let entries = match fs::read_dir(&dir) {
				Ok(entries) => entries,
				Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
				Err(e) => return Err(backend_error(e)),
			};

			let mut ids = Vec::new();
			for entry in entries {
				let path = entry.map_err(backend_error)?.path();
				if path.extension() != Some(std::ffi::OsStr::new("bin")) {
					continue;
				}
				match path.file_stem().and_then(|s| s.to_str()) {
					Some(stem) => ids.push(stem.to_string()),
					None => tracing::debug!("Skipping non-UTF-8 file name {:?}", path),
				}
			}
			ids.sort();
			Ok(ids)
		})
		.await
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
			vec![
				Field::new("storage_path", FieldType::String).with_validator(|value| {
					match value.as_str() {
						Some(path) if path.trim().is_empty() => {
							Err("storage_path cannot be empty".to_string())
						},
						_ => Ok(()),
					}
				}),
			],
		);
		schema.validate(config)
	}
}

/// Factory function to create a file storage backend from configuration.
///
/// Configuration parameters:
/// - `storage_path`: Base directory for record files (default: "./data/storage")
pub fn create_storage(config: &toml::Value) -> Result<Box<dyn StorageInterface>, StorageError> {
	FileStorageSchema
		.validate(config)
		.map_err(|e| StorageError::Configuration(e.to_string()))?;

	let storage_path = config
		.get("storage_path")
		.and_then(|v| v.as_str())
		.unwrap_or("./data/storage")
		.to_string();

	Ok(Box::new(FileStorage::new(PathBuf::from(storage_path))))
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

impl crate::StorageRegistry for Registry {}
