//! Custom-order configuration and price breakdown value objects.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{GarmentCategory, UnknownVariant};

/// Kind of tailoring service requested.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum ServiceType {
	/// Garment drafted from the customer's measurements and design.
	FullyCustom,
	/// Garment reproduced from a reference piece supplied by the customer.
	BrandCopy,
}

/// Who supplies the fabric.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum FabricSource {
	CustomerProvided,
	PlatformProvided,
}

/// Embroidery tier. Each tier carries a flat fee.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "kebab-case")]
pub enum EmbroideryComplexity {
	None,
	Light,
	Medium,
	Heavy,
}

macro_rules! kebab_names {
	($ty:ident, $kind:literal, { $( $variant:ident => $name:literal ),* $(,)? }) => {
		impl $ty {
			/// Returns the wire name.
			pub fn as_str(&self) -> &'static str {
				match self {
					$( $ty::$variant => $name, )*
				}
			}
		}

		impl fmt::Display for $ty {
			fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
				f.write_str(self.as_str())
			}
		}

		impl FromStr for $ty {
			type Err = UnknownVariant;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				match s {
					$( $name => Ok($ty::$variant), )*
					other => Err(UnknownVariant::new($kind, other)),
				}
			}
		}
	};
}

kebab_names!(ServiceType, "service type", {
	FullyCustom => "fully-custom",
	BrandCopy => "brand-copy",
});

kebab_names!(FabricSource, "fabric source", {
	CustomerProvided => "customer-provided",
	PlatformProvided => "platform-provided",
});

kebab_names!(EmbroideryComplexity, "embroidery complexity", {
	None => "none",
	Light => "light",
	Medium => "medium",
	Heavy => "heavy",
});

/// A completed custom-order configuration, ready to be priced.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CustomOrderConfig {
	pub garment: GarmentCategory,
	pub service_type: ServiceType,
	pub fabric_source: FabricSource,
	/// Fabric type from the platform catalogue. Required for platform fabric.
	#[serde(skip_serializing_if = "Option::is_none")]
	pub fabric_type: Option<String>,
	pub embroidery: EmbroideryComplexity,
	/// Add-on identifiers, each priced independently.
	#[serde(default)]
	pub add_ons: Vec<String>,
	#[serde(default)]
	pub is_rush_order: bool,
}

/// Custom-order configuration as submitted by a client, with free-form names.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RawCustomOrderConfig {
	pub garment: String,
	pub service_type: String,
	pub fabric_source: String,
	#[serde(default)]
	pub fabric_type: Option<String>,
	#[serde(default = "default_embroidery")]
	pub embroidery: String,
	#[serde(default)]
	pub add_ons: Vec<String>,
	#[serde(default)]
	pub is_rush_order: bool,
}

fn default_embroidery() -> String {
	EmbroideryComplexity::None.as_str().to_string()
}

impl TryFrom<RawCustomOrderConfig> for CustomOrderConfig {
	type Error = UnknownVariant;

	fn try_from(raw: RawCustomOrderConfig) -> Result<Self, Self::Error> {
		Ok(Self {
			garment: raw.garment.parse()?,
			service_type: raw.service_type.parse()?,
			fabric_source: raw.fabric_source.parse()?,
			fabric_type: raw.fabric_type,
			embroidery: raw.embroidery.parse()?,
			add_ons: raw.add_ons,
			is_rush_order: raw.is_rush_order,
		})
	}
}

/// Itemised price snapshot attached to an order at creation.
///
/// Amounts are in the shop currency's smallest unit. `total` is rounded to a
/// whole unit; the other components are exact.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PriceBreakdown {
	pub fabric_cost: Decimal,
	pub stitching_charge: Decimal,
	pub embroidery_cost: Decimal,
	pub add_ons_cost: Decimal,
	pub rush_surcharge: Decimal,
	pub subtotal: Decimal,
	pub tax: Decimal,
	pub total: Decimal,
}
