//! Builder for constructing atelier engines.
//!
//! Storage backends are pluggable: the builder looks up each
//! `[storage.implementations.<name>]` table in a map of named factories and
//! hands the primary one to the engine.

use crate::engine::{event_bus::EventBus, AtelierEngine};
use atelier_config::Config;
use atelier_storage::{StorageError, StorageInterface, StorageService};
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during engine construction.
#[derive(Debug, Error)]
pub enum BuilderError {
	#[error("Configuration error: {0}")]
	Config(String),
	#[error("Missing required component: {0}")]
	MissingComponent(String),
}

/// Factory functions needed to build an AtelierEngine.
///
/// Each factory takes the backend's TOML table and returns a ready backend.
pub struct AtelierFactories<SF> {
	pub storage_factories: HashMap<String, SF>,
}

/// Builder for constructing an AtelierEngine with a pluggable store.
pub struct AtelierBuilder {
	config: Config,
	event_bus: EventBus,
}

impl AtelierBuilder {
	/// Creates a new AtelierBuilder with the given configuration.
	pub fn new(config: Config) -> Self {
		Self {
			config,
			event_bus: EventBus::default(),
		}
	}

	/// Uses an existing event bus instead of a fresh one.
	pub fn with_event_bus(mut self, event_bus: EventBus) -> Self {
		self.event_bus = event_bus;
		self
	}

	/// Builds the AtelierEngine, constructing every configured storage
	/// implementation and keeping the primary one.
	pub fn build<SF>(self, factories: AtelierFactories<SF>) -> Result<AtelierEngine, BuilderError>
	where
		SF: Fn(&toml::Value) -> Result<Box<dyn StorageInterface>, StorageError>,
	{
		let mut storage_impls = HashMap::new();
		for (name, config) in &self.config.storage.implementations {
			let Some(factory) = factories.storage_factories.get(name) else {
				tracing::warn!(component = "storage", implementation = %name, "Unknown implementation, skipping");
				continue;
			};
			match factory(config) {
				Ok(implementation) => {
					storage_impls.insert(name.clone(), implementation);
					let is_primary = &self.config.storage.primary == name;
					tracing::info!(component = "storage", implementation = %name, enabled = %is_primary, "Loaded");
				},
				Err(e) => {
					tracing::error!(
						component = "storage",
						implementation = %name,
						error = %e,
						"Failed to create storage implementation"
					);
					return Err(BuilderError::Config(format!(
						"Failed to create storage implementation '{}': {}",
						name, e
					)));
				},
			}
		}

		if storage_impls.is_empty() {
			return Err(BuilderError::MissingComponent(
				"no valid storage implementations available".into(),
			));
		}

		let primary_storage = &self.config.storage.primary;
		let storage_backend = storage_impls.remove(primary_storage).ok_or_else(|| {
			BuilderError::Config(format!(
				"Primary storage '{}' failed to load or has invalid configuration",
				primary_storage
			))
		})?;

		let storage = Arc::new(StorageService::new(storage_backend));
		Ok(AtelierEngine::new(self.config, storage, self.event_bus))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use atelier_config::ConfigBuilder;
	use atelier_types::GarmentCategory;

	fn factories() -> AtelierFactories<atelier_storage::StorageFactory> {
		AtelierFactories {
			storage_factories: atelier_storage::get_all_implementations()
				.into_iter()
				.map(|(name, factory)| (name.to_string(), factory))
				.collect(),
		}
	}

	#[tokio::test]
	async fn test_build_with_memory_storage() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Dress], 2, 4.0)
			.build();
		let engine = AtelierBuilder::new(config).build(factories()).unwrap();
		assert_eq!(engine.seed_tailors().await.unwrap(), 1);
	}

	#[tokio::test]
	async fn test_build_with_file_storage_survives_restart() {
		let dir = tempfile::tempdir().unwrap();
		let mut table = toml::map::Map::new();
		table.insert(
			"storage_path".into(),
			toml::Value::String(dir.path().to_string_lossy().into_owned()),
		);
		let config = ConfigBuilder::new()
			.storage("file", toml::Value::Table(table))
			.tailor("t-1", &[GarmentCategory::Dress], 2, 4.0)
			.build();

		let first = AtelierBuilder::new(config.clone()).build(factories()).unwrap();
		assert_eq!(first.seed_tailors().await.unwrap(), 1);
		first.tailors.reserve("t-1", "pq-a").await.unwrap();

		let second = AtelierBuilder::new(config).build(factories()).unwrap();
		assert_eq!(second.seed_tailors().await.unwrap(), 0);
		let tailor = second.get_tailor("t-1").await.unwrap();
		assert_eq!(tailor.capacity.reserved_today(), 1);
	}

	#[test]
	fn test_bad_backend_table_fails() {
		let mut table = toml::map::Map::new();
		table.insert("unexpected".into(), toml::Value::Boolean(true));
		let config = ConfigBuilder::new()
			.storage("memory", toml::Value::Table(table))
			.build();

		let result = AtelierBuilder::new(config).build(factories());
		assert!(matches!(result, Err(BuilderError::Config(_))));
	}

	#[test]
	fn test_unknown_primary_fails() {
		let config = ConfigBuilder::new()
			.storage("redis", toml::Value::Table(toml::map::Map::new()))
			.build();

		let result = AtelierBuilder::new(config).build(factories());
		assert!(matches!(result, Err(BuilderError::MissingComponent(_))));
	}
}
