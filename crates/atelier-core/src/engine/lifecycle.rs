//! Lifecycle management for the atelier engine.
//!
//! Handles the start-up and shutdown steps that run around the main loop.

use super::{AtelierEngine, EngineError};

impl AtelierEngine {
	/// Seeds configured tailors and clears whatever backlog is already
	/// schedulable.
	pub async fn initialize(&self) -> Result<(), EngineError> {
		tracing::info!(shop = %self.config.shop.id, "Initializing atelier engine");

		let seeded = self.seed_tailors().await?;
		if seeded > 0 {
			tracing::info!(seeded, "Seeded tailors from configuration");
		}

		let report = self.sweep_backlog().await?;
		tracing::info!(
			pending = report.examined,
			assigned = report.assigned,
			"Initial backlog sweep"
		);
		Ok(())
	}

	/// Performs cleanup operations.
	pub async fn shutdown(&self) -> Result<(), EngineError> {
		tracing::info!("Shutting down atelier engine");
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use crate::engine::{event_bus::EventBus, AtelierEngine};
	use atelier_config::ConfigBuilder;
	use atelier_storage::{implementations::memory::MemoryStorage, StorageService};
	use atelier_types::GarmentCategory;
	use std::sync::Arc;

	#[tokio::test]
	async fn test_initialize_seeds_configured_tailors() {
		let config = ConfigBuilder::new()
			.tailor("t-1", &[GarmentCategory::Lehenga], 2, 4.7)
			.build();
		let storage = Arc::new(StorageService::new(Box::new(MemoryStorage::new())));
		let engine = AtelierEngine::new(config, storage, EventBus::default());

		engine.initialize().await.unwrap();
		engine.initialize().await.unwrap();

		let tailors = engine.list_tailors().await.unwrap();
		assert_eq!(tailors.len(), 1);
		assert!(tailors[0].can_produce(GarmentCategory::Lehenga));
		engine.shutdown().await.unwrap();
	}
}
