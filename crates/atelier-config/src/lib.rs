//! Configuration module for the atelier production system.
//!
//! This module provides structures and utilities for managing atelier configuration.
//! It supports loading configuration from TOML files and validates that every
//! price, rate and scheduling bound is usable before the engine starts.
//!
//! ## Modular Configuration Support
//!
//! Configurations can be split into multiple files for better organization:
//! - Use `include = ["file1.toml", "file2.toml"]` to include other config files
//! - Each top-level section must be unique across all files (no duplicates allowed)

#[cfg(feature = "testing")]
pub mod builders {
	pub mod config;
}
mod loader;

use atelier_types::GarmentCategory;
use regex::Regex;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::str::FromStr;
use thiserror::Error;

#[cfg(feature = "testing")]
pub use builders::config::ConfigBuilder;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Keep the message, drop the echoed input
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for an atelier instance.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Identity of the shop this instance serves.
	pub shop: ShopConfig,
	/// Configuration for the storage backend.
	pub storage: StorageConfig,
	/// Price table used by the pricing calculator.
	#[serde(default)]
	pub pricing: PricingConfig,
	/// Retry, sweep and turnaround settings.
	#[serde(default)]
	pub scheduling: SchedulingConfig,
	/// Tailors registered at start-up when missing from the store.
	#[serde(default)]
	pub tailors: Vec<TailorSeed>,
}

/// Configuration specific to the shop.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShopConfig {
	/// Unique identifier for this shop.
	pub id: String,
	/// ISO currency code. Prices are in its smallest unit.
	#[serde(default = "default_currency")]
	pub currency: String,
}

fn default_currency() -> String {
	"INR".to_string()
}

/// Configuration for the storage backend.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
	/// Which implementation to use as primary.
	pub primary: String,
	/// Map of storage implementation names to their configurations.
	pub implementations: HashMap<String, toml::Value>,
}

/// Base stitching charge by service type.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct StitchingRates {
	pub fully_custom: Decimal,
	pub brand_copy: Decimal,
}

impl Default for StitchingRates {
	fn default() -> Self {
		Self {
			fully_custom: Decimal::new(2500, 0),
			brand_copy: Decimal::new(1800, 0),
		}
	}
}

/// Flat embroidery fee per tier.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct EmbroideryFees {
	#[serde(default)]
	pub none: Decimal,
	pub light: Decimal,
	pub medium: Decimal,
	pub heavy: Decimal,
}

impl Default for EmbroideryFees {
	fn default() -> Self {
		Self {
			none: Decimal::ZERO,
			light: Decimal::new(800, 0),
			medium: Decimal::new(1500, 0),
			heavy: Decimal::new(3000, 0),
		}
	}
}

/// Price table for custom orders.
///
/// Amounts may be written as TOML integers or as decimal strings; rates
/// should be strings (e.g. `"0.05"`) to avoid float rounding.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct PricingConfig {
	/// Tax rate applied to subtotal plus rush surcharge.
	#[serde(default = "default_tax_rate")]
	pub tax_rate: Decimal,
	/// Surcharge rate applied to the subtotal of rush orders.
	#[serde(default = "default_rush_surcharge_rate")]
	pub rush_surcharge_rate: Decimal,
	#[serde(default)]
	pub stitching: StitchingRates,
	#[serde(default)]
	pub embroidery: EmbroideryFees,
	/// Platform fabric catalogue: fabric type to price.
	#[serde(default = "default_fabrics")]
	pub fabrics: HashMap<String, Decimal>,
	/// Add-on catalogue: add-on id to fixed price.
	#[serde(default = "default_add_ons")]
	pub add_ons: HashMap<String, Decimal>,
}

fn default_tax_rate() -> Decimal {
	Decimal::new(5, 2)
}

fn default_rush_surcharge_rate() -> Decimal {
	Decimal::new(25, 2)
}

fn default_fabrics() -> HashMap<String, Decimal> {
	[("cotton", 800), ("linen", 1200), ("silk", 2500), ("wool", 3000)]
		.into_iter()
		.map(|(name, price)| (name.to_string(), Decimal::new(price, 0)))
		.collect()
}

fn default_add_ons() -> HashMap<String, Decimal> {
	[("monogram", 500), ("piping", 300), ("lining", 700)]
		.into_iter()
		.map(|(name, price)| (name.to_string(), Decimal::new(price, 0)))
		.collect()
}

impl Default for PricingConfig {
	fn default() -> Self {
		Self {
			tax_rate: default_tax_rate(),
			rush_surcharge_rate: default_rush_surcharge_rate(),
			stitching: StitchingRates::default(),
			embroidery: EmbroideryFees::default(),
			fabrics: default_fabrics(),
			add_ons: default_add_ons(),
		}
	}
}

/// Retry, sweep and turnaround settings.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct SchedulingConfig {
	/// How many times an operation is re-run after losing a version race.
	#[serde(default = "default_conflict_retries")]
	pub conflict_retries: u32,
	/// Attempts for a single store call that failed transiently.
	#[serde(default = "default_store_retries")]
	pub store_retries: u32,
	#[serde(default = "default_initial_backoff_ms")]
	pub initial_backoff_ms: u64,
	#[serde(default = "default_max_backoff_ms")]
	pub max_backoff_ms: u64,
	/// Interval between backlog sweeps.
	#[serde(default = "default_sweep_interval_seconds")]
	pub sweep_interval_seconds: u64,
	#[serde(default = "default_standard_turnaround_days")]
	pub standard_turnaround_days: u32,
	#[serde(default = "default_rush_turnaround_days")]
	pub rush_turnaround_days: u32,
}

fn default_conflict_retries() -> u32 {
	5
}

fn default_store_retries() -> u32 {
	3
}

fn default_initial_backoff_ms() -> u64 {
	50
}

fn default_max_backoff_ms() -> u64 {
	2_000
}

fn default_sweep_interval_seconds() -> u64 {
	60
}

fn default_standard_turnaround_days() -> u32 {
	14
}

fn default_rush_turnaround_days() -> u32 {
	5
}

impl Default for SchedulingConfig {
	fn default() -> Self {
		Self {
			conflict_retries: default_conflict_retries(),
			store_retries: default_store_retries(),
			initial_backoff_ms: default_initial_backoff_ms(),
			max_backoff_ms: default_max_backoff_ms(),
			sweep_interval_seconds: default_sweep_interval_seconds(),
			standard_turnaround_days: default_standard_turnaround_days(),
			rush_turnaround_days: default_rush_turnaround_days(),
		}
	}
}

/// A tailor declared in configuration.
#[derive(Debug, Clone, Deserialize, Serialize, PartialEq)]
pub struct TailorSeed {
	pub id: String,
	pub name: String,
	pub specializations: Vec<GarmentCategory>,
	pub max_orders_per_day: u32,
	#[serde(default)]
	pub performance_score: f64,
}

/// Resolves environment variables in a string.
///
/// Replaces ${VAR_NAME} with the value of the environment variable VAR_NAME.
/// Supports default values with ${VAR_NAME:-default_value}.
///
/// Input strings are limited to 1MB to prevent ReDoS attacks.
pub(crate) fn resolve_env_vars(input: &str) -> Result<String, ConfigError> {
	const MAX_INPUT_SIZE: usize = 1024 * 1024;
	if input.len() > MAX_INPUT_SIZE {
		return Err(ConfigError::Validation(format!(
			"Configuration file too large: {} bytes (max: {} bytes)",
			input.len(),
			MAX_INPUT_SIZE
		)));
	}

	let re = Regex::new(r"\$\{([A-Z_][A-Z0-9_]{0,127})(?::-([^}]{0,256}))?\}")
		.map_err(|e| ConfigError::Parse(format!("Regex error: {}", e)))?;

	let mut output = String::with_capacity(input.len());
	let mut last = 0;
	for cap in re.captures_iter(input) {
		let (Some(whole), Some(name)) = (cap.get(0), cap.get(1)) else {
			continue;
		};
		let value = match (std::env::var(name.as_str()), cap.get(2)) {
			(Ok(value), _) => value,
			(Err(_), Some(default)) => default.as_str().to_string(),
			(Err(_), None) => {
				return Err(ConfigError::Validation(format!(
					"Environment variable '{}' not found",
					name.as_str()
				)))
			},
		};
		output.push_str(&input[last..whole.start()]);
		output.push_str(&value);
		last = whole.end();
	}
	output.push_str(&input[last..]);

	Ok(output)
}

fn invalid(message: impl Into<String>) -> ConfigError {
	ConfigError::Validation(message.into())
}

impl Config {
	/// Loads configuration from a file, following `include` directives and
	/// resolving environment variables.
	pub async fn from_file(path: &str) -> Result<Self, ConfigError> {
		let path_buf = Path::new(path);
		let base_dir = path_buf.parent().unwrap_or_else(|| Path::new("."));

		let mut loader = loader::ConfigLoader::new(base_dir);
		let file_name = path_buf
			.file_name()
			.ok_or_else(|| invalid(format!("Invalid path: {}", path)))?;
		loader.load_config(file_name).await
	}

	/// Validates every section.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.shop.id.trim().is_empty() {
			return Err(invalid("Shop ID cannot be empty"));
		}
		if self.shop.currency.trim().is_empty() {
			return Err(invalid("Shop currency cannot be empty"));
		}

		self.validate_storage()?;
		self.validate_pricing()?;
		self.validate_scheduling()?;
		self.validate_tailors()
	}

	fn validate_storage(&self) -> Result<(), ConfigError> {
		if self.storage.implementations.is_empty() {
			return Err(invalid(
				"At least one storage implementation must be configured",
			));
		}
		if self.storage.primary.is_empty() {
			return Err(invalid("Storage primary implementation cannot be empty"));
		}
		if !self
			.storage
			.implementations
			.contains_key(&self.storage.primary)
		{
			return Err(invalid(format!(
				"Primary storage '{}' not found in implementations",
				self.storage.primary
			)));
		}
		Ok(())
	}

	fn validate_pricing(&self) -> Result<(), ConfigError> {
		let pricing = &self.pricing;
		for (name, rate) in [
			("tax_rate", pricing.tax_rate),
			("rush_surcharge_rate", pricing.rush_surcharge_rate),
		] {
			if rate < Decimal::ZERO || rate > Decimal::ONE {
				return Err(invalid(format!(
					"pricing.{} must be between 0 and 1, got {}",
					name, rate
				)));
			}
		}

		let fixed = [
			("stitching.fully_custom", pricing.stitching.fully_custom),
			("stitching.brand_copy", pricing.stitching.brand_copy),
			("embroidery.none", pricing.embroidery.none),
			("embroidery.light", pricing.embroidery.light),
			("embroidery.medium", pricing.embroidery.medium),
			("embroidery.heavy", pricing.embroidery.heavy),
		];
		let fabrics = pricing
			.fabrics
			.iter()
			.map(|(name, price)| (format!("fabrics.{}", name), *price));
		let add_ons = pricing
			.add_ons
			.iter()
			.map(|(name, price)| (format!("add_ons.{}", name), *price));

		for (name, price) in fixed
			.into_iter()
			.map(|(name, price)| (name.to_string(), price))
			.chain(fabrics)
			.chain(add_ons)
		{
			if price < Decimal::ZERO {
				return Err(invalid(format!(
					"pricing.{} cannot be negative, got {}",
					name, price
				)));
			}
		}
		Ok(())
	}

	fn validate_scheduling(&self) -> Result<(), ConfigError> {
		let s = &self.scheduling;
		if s.conflict_retries == 0 || s.conflict_retries > 50 {
			return Err(invalid("scheduling.conflict_retries must be between 1 and 50"));
		}
		if s.store_retries == 0 || s.store_retries > 20 {
			return Err(invalid("scheduling.store_retries must be between 1 and 20"));
		}
		if s.initial_backoff_ms == 0 || s.initial_backoff_ms > 10_000 {
			return Err(invalid(
				"scheduling.initial_backoff_ms must be between 1 and 10000",
			));
		}
		if s.max_backoff_ms < s.initial_backoff_ms || s.max_backoff_ms > 60_000 {
			return Err(invalid(
				"scheduling.max_backoff_ms must be at least initial_backoff_ms and at most 60000",
			));
		}
		if s.sweep_interval_seconds == 0 || s.sweep_interval_seconds > 86_400 {
			return Err(invalid(
				"scheduling.sweep_interval_seconds must be between 1 and 86400 (24 hours)",
			));
		}
		if s.standard_turnaround_days == 0 || s.rush_turnaround_days == 0 {
			return Err(invalid("Turnaround days must be at least 1"));
		}
		if s.rush_turnaround_days > s.standard_turnaround_days {
			return Err(invalid(
				"scheduling.rush_turnaround_days cannot exceed standard_turnaround_days",
			));
		}
		Ok(())
	}

	fn validate_tailors(&self) -> Result<(), ConfigError> {
		let mut seen = HashSet::new();
		for tailor in &self.tailors {
			if tailor.id.trim().is_empty() {
				return Err(invalid("Tailor id cannot be empty"));
			}
			if !seen.insert(tailor.id.as_str()) {
				return Err(invalid(format!("Duplicate tailor id '{}'", tailor.id)));
			}
			if tailor.specializations.is_empty() {
				return Err(invalid(format!(
					"Tailor '{}' must have at least one specialization",
					tailor.id
				)));
			}
			if tailor.max_orders_per_day == 0 {
				return Err(invalid(format!(
					"Tailor '{}' max_orders_per_day must be at least 1",
					tailor.id
				)));
			}
			if !tailor.performance_score.is_finite() || tailor.performance_score < 0.0 {
				return Err(invalid(format!(
					"Tailor '{}' performance_score must be a non-negative number",
					tailor.id
				)));
			}
		}
		Ok(())
	}
}

/// Parses a TOML string into a validated configuration, resolving
/// environment variables first.
impl FromStr for Config {
	type Err = ConfigError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let resolved = resolve_env_vars(s)?;
		let config: Config = toml::from_str(&resolved)?;
		config.validate()?;
		Ok(config)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	const MINIMAL: &str = r#"
[shop]
id = "atelier-test"

[storage]
primary = "memory"
[storage.implementations.memory]
"#;

	fn with(extra: &str) -> Result<Config, ConfigError> {
		format!("{}\n{}", MINIMAL, extra).parse()
	}

	#[test]
	fn test_env_var_resolution() {
		std::env::set_var("ATELIER_TEST_HOST", "localhost");
		std::env::set_var("ATELIER_TEST_PORT", "5432");

		let input = "host = \"${ATELIER_TEST_HOST}:${ATELIER_TEST_PORT}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "host = \"localhost:5432\"");

		std::env::remove_var("ATELIER_TEST_HOST");
		std::env::remove_var("ATELIER_TEST_PORT");
	}

	#[test]
	fn test_env_var_with_default() {
		let input = "value = \"${ATELIER_MISSING_VAR:-default_value}\"";
		let result = resolve_env_vars(input).unwrap();
		assert_eq!(result, "value = \"default_value\"");
	}

	#[test]
	fn test_missing_env_var_error() {
		let result = resolve_env_vars("value = \"${ATELIER_MISSING_VAR}\"");
		assert!(result
			.unwrap_err()
			.to_string()
			.contains("ATELIER_MISSING_VAR"));
	}

	#[test]
	fn test_minimal_config_uses_defaults() {
		let config: Config = MINIMAL.parse().unwrap();
		assert_eq!(config.shop.id, "atelier-test");
		assert_eq!(config.shop.currency, "INR");
		assert_eq!(config.pricing.tax_rate, Decimal::new(5, 2));
		assert_eq!(config.pricing.rush_surcharge_rate, Decimal::new(25, 2));
		assert_eq!(config.pricing.embroidery.medium, Decimal::new(1500, 0));
		assert_eq!(config.scheduling, SchedulingConfig::default());
		assert!(config.tailors.is_empty());
	}

	#[test]
	fn test_pricing_overrides() {
		let config = with(
			r#"
[pricing]
tax_rate = "0.18"
[pricing.stitching]
fully_custom = 3000
brand_copy = "2200.50"
[pricing.add_ons]
monogram = 450
"#,
		)
		.unwrap();
		assert_eq!(config.pricing.tax_rate, Decimal::new(18, 2));
		assert_eq!(config.pricing.stitching.fully_custom, Decimal::new(3000, 0));
		assert_eq!(config.pricing.stitching.brand_copy, Decimal::new(220050, 2));
		assert_eq!(config.pricing.add_ons.len(), 1);
		// Untouched sections keep their defaults
		assert_eq!(config.pricing.embroidery, EmbroideryFees::default());
	}

	#[test]
	fn test_rate_out_of_range_rejected() {
		let err = with("[pricing]\nrush_surcharge_rate = \"1.5\"").unwrap_err();
		assert!(err.to_string().contains("rush_surcharge_rate"));
	}

	#[test]
	fn test_negative_price_rejected() {
		let err = with("[pricing.fabrics]\nsilk = -10").unwrap_err();
		assert!(err.to_string().contains("fabrics.silk"));
	}

	#[test]
	fn test_missing_primary_storage() {
		let config = r#"
[shop]
id = "atelier-test"

[storage]
primary = "file"
[storage.implementations.memory]
"#;
		let err = config.parse::<Config>().unwrap_err();
		assert!(err.to_string().contains("Primary storage 'file'"));
	}

	#[test]
	fn test_scheduling_bounds() {
		assert!(with("[scheduling]\nconflict_retries = 0").is_err());
		assert!(with("[scheduling]\ninitial_backoff_ms = 500\nmax_backoff_ms = 100").is_err());
		assert!(with("[scheduling]\nrush_turnaround_days = 30").is_err());
		assert!(with("[scheduling]\nsweep_interval_seconds = 5").is_ok());
	}

	#[test]
	fn test_tailor_seeds() {
		let config = with(
			r#"
[[tailors]]
id = "t-1"
name = "Asha"
specializations = ["kurta", "salwar-kameez"]
max_orders_per_day = 5
performance_score = 4.5
"#,
		)
		.unwrap();
		assert_eq!(config.tailors.len(), 1);
		assert_eq!(
			config.tailors[0].specializations,
			vec![GarmentCategory::Kurta, GarmentCategory::SalwarKameez]
		);
	}

	#[test]
	fn test_duplicate_tailor_rejected() {
		let seed = r#"
[[tailors]]
id = "t-1"
name = "Asha"
specializations = ["kurta"]
max_orders_per_day = 5
"#;
		let err = with(&format!("{}{}", seed, seed)).unwrap_err();
		assert!(err.to_string().contains("Duplicate tailor id 't-1'"));
	}

	#[test]
	fn test_unknown_specialization_rejected() {
		let result = with(
			r#"
[[tailors]]
id = "t-1"
name = "Asha"
specializations = ["cape"]
max_orders_per_day = 5
"#,
		);
		assert!(matches!(result, Err(ConfigError::Parse(_))));
	}
}
