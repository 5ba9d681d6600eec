//! Pricing module for the atelier system.
//!
//! Turns a custom-order configuration into an itemised price breakdown. The
//! calculation is a pure function of the price table and the configuration,
//! so a quote shown to a customer and the snapshot stored on the order are
//! always the same numbers.

use atelier_config::PricingConfig;
use atelier_types::{
	CustomOrderConfig, EmbroideryComplexity, FabricSource, PriceBreakdown, RawCustomOrderConfig,
	ServiceType,
};
use rust_decimal::{Decimal, RoundingStrategy};
use std::collections::HashMap;
use thiserror::Error;

/// Errors that can occur while pricing a configuration.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PricingError {
	/// The configuration cannot be priced against the current table.
	#[error("Invalid configuration: {0}")]
	InvalidConfiguration(String),
}

/// Price table the calculator reads from.
#[derive(Debug, Clone, PartialEq)]
pub struct PriceTable {
	pub tax_rate: Decimal,
	pub rush_surcharge_rate: Decimal,
	pub fully_custom: Decimal,
	pub brand_copy: Decimal,
	pub embroidery: [Decimal; 4],
	pub fabrics: HashMap<String, Decimal>,
	pub add_ons: HashMap<String, Decimal>,
}

impl PriceTable {
	fn stitching(&self, service: ServiceType) -> Decimal {
		match service {
			ServiceType::FullyCustom => self.fully_custom,
			ServiceType::BrandCopy => self.brand_copy,
		}
	}

	fn embroidery(&self, tier: EmbroideryComplexity) -> Decimal {
		let index = match tier {
			EmbroideryComplexity::None => 0,
			EmbroideryComplexity::Light => 1,
			EmbroideryComplexity::Medium => 2,
			EmbroideryComplexity::Heavy => 3,
		};
		self.embroidery[index]
	}
}

impl From<&PricingConfig> for PriceTable {
	fn from(config: &PricingConfig) -> Self {
		Self {
			tax_rate: config.tax_rate,
			rush_surcharge_rate: config.rush_surcharge_rate,
			fully_custom: config.stitching.fully_custom,
			brand_copy: config.stitching.brand_copy,
			embroidery: [
				config.embroidery.none,
				config.embroidery.light,
				config.embroidery.medium,
				config.embroidery.heavy,
			],
			fabrics: config.fabrics.clone(),
			add_ons: config.add_ons.clone(),
		}
	}
}

/// Parses a client-supplied configuration into typed form.
pub fn parse_config(raw: RawCustomOrderConfig) -> Result<CustomOrderConfig, PricingError> {
	CustomOrderConfig::try_from(raw).map_err(|e| PricingError::InvalidConfiguration(e.to_string()))
}

/// Prices a custom-order configuration.
///
/// Rush surcharge and tax are kept exact; only the total is rounded to a
/// whole unit, half away from zero.
pub fn calculate_price(
	table: &PriceTable,
	config: &CustomOrderConfig,
) -> Result<PriceBreakdown, PricingError> {
	let fabric_cost = match config.fabric_source {
		FabricSource::CustomerProvided => Decimal::ZERO,
		FabricSource::PlatformProvided => {
			let fabric_type = config.fabric_type.as_deref().ok_or_else(|| {
				PricingError::InvalidConfiguration(
					"fabric_type is required for platform-provided fabric".into(),
				)
			})?;
			*table.fabrics.get(fabric_type).ok_or_else(|| {
				PricingError::InvalidConfiguration(format!("Unknown fabric type '{}'", fabric_type))
			})?
		},
	};

	let stitching_charge = table.stitching(config.service_type);
	let embroidery_cost = table.embroidery(config.embroidery);

	let mut add_ons_cost = Decimal::ZERO;
	for add_on in &config.add_ons {
		let price = table.add_ons.get(add_on).ok_or_else(|| {
			PricingError::InvalidConfiguration(format!("Unknown add-on '{}'", add_on))
		})?;
		add_ons_cost += *price;
	}

	let subtotal = fabric_cost + stitching_charge + embroidery_cost + add_ons_cost;
	let rush_surcharge = if config.is_rush_order {
		subtotal * table.rush_surcharge_rate
	} else {
		Decimal::ZERO
	};
	let tax = (subtotal + rush_surcharge) * table.tax_rate;
	let total = (subtotal + rush_surcharge + tax)
		.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)
		.max(Decimal::ZERO);

	Ok(PriceBreakdown {
		fabric_cost,
		stitching_charge,
		embroidery_cost,
		add_ons_cost,
		rush_surcharge,
		subtotal,
		tax,
		total,
	})
}

/// Service that prices configurations against the configured table.
pub struct PricingService {
	table: PriceTable,
}

impl PricingService {
	/// Creates a new PricingService from the `[pricing]` section.
	pub fn new(config: &PricingConfig) -> Self {
		Self {
			table: PriceTable::from(config),
		}
	}

	/// Prices a typed configuration.
	pub fn quote(&self, config: &CustomOrderConfig) -> Result<PriceBreakdown, PricingError> {
		let breakdown = calculate_price(&self.table, config)?;
		tracing::debug!(
			garment = %config.garment,
			rush = config.is_rush_order,
			total = %breakdown.total,
			"Priced custom order"
		);
		Ok(breakdown)
	}

	/// Parses and prices a client-supplied configuration.
	pub fn quote_raw(&self, raw: RawCustomOrderConfig) -> Result<PriceBreakdown, PricingError> {
		self.quote(&parse_config(raw)?)
	}

	pub fn table(&self) -> &PriceTable {
		&self.table
	}
}
