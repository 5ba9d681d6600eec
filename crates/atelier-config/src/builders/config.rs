//! Configuration builder for creating test and development configurations.

use crate::{
	Config, PricingConfig, SchedulingConfig, ShopConfig, StorageConfig, TailorSeed,
};
use atelier_types::GarmentCategory;
use std::collections::HashMap;

/// Builder for creating `Config` instances with a fluent API.
///
/// Defaults to in-memory storage, the default price table and short
/// backoffs so tests do not sleep for long.
#[derive(Debug, Clone)]
pub struct ConfigBuilder {
	shop_id: String,
	storage_primary: String,
	storage_implementation: toml::Value,
	pricing: PricingConfig,
	scheduling: SchedulingConfig,
	tailors: Vec<TailorSeed>,
}

impl Default for ConfigBuilder {
	fn default() -> Self {
		Self::new()
	}
}

impl ConfigBuilder {
	/// Creates a new `ConfigBuilder` with default values suitable for testing.
	pub fn new() -> Self {
		Self {
			shop_id: "test-atelier".to_string(),
			storage_primary: "memory".to_string(),
			storage_implementation: toml::Value::Table(toml::map::Map::new()),
			pricing: PricingConfig::default(),
			scheduling: SchedulingConfig {
				initial_backoff_ms: 1,
				max_backoff_ms: 5,
				..SchedulingConfig::default()
			},
			tailors: Vec::new(),
		}
	}

	/// Sets the shop ID.
	pub fn shop_id(mut self, id: impl Into<String>) -> Self {
		self.shop_id = id.into();
		self
	}

	/// Sets the primary storage implementation and its table.
	pub fn storage(mut self, primary: impl Into<String>, table: toml::Value) -> Self {
		self.storage_primary = primary.into();
		self.storage_implementation = table;
		self
	}

	/// Replaces the price table.
	pub fn pricing(mut self, pricing: PricingConfig) -> Self {
		self.pricing = pricing;
		self
	}

	/// Replaces the scheduling settings.
	pub fn scheduling(mut self, scheduling: SchedulingConfig) -> Self {
		self.scheduling = scheduling;
		self
	}

	/// Adds a seeded tailor.
	pub fn tailor(
		mut self,
		id: impl Into<String>,
		specializations: &[GarmentCategory],
		max_orders_per_day: u32,
		performance_score: f64,
	) -> Self {
		let id = id.into();
		self.tailors.push(TailorSeed {
			name: format!("Tailor {}", id),
			id,
			specializations: specializations.to_vec(),
			max_orders_per_day,
			performance_score,
		});
		self
	}

	/// Builds the `Config` with the configured values.
	pub fn build(self) -> Config {
		let mut implementations = HashMap::new();
		implementations.insert(self.storage_primary.clone(), self.storage_implementation);

		Config {
			shop: ShopConfig {
				id: self.shop_id,
				currency: "INR".to_string(),
			},
			storage: StorageConfig {
				primary: self.storage_primary,
				implementations,
			},
			pricing: self.pricing,
			scheduling: self.scheduling,
			tailors: self.tailors,
		}
	}
}
