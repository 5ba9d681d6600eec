//! Tailor types: specializations and daily capacity.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use crate::UnknownVariant;

/// Garment categories a tailor can specialise in.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "kebab-case")]
pub enum GarmentCategory {
	Shirt,
	Trouser,
	Suit,
	Blazer,
	Kurta,
	Sherwani,
	Blouse,
	Lehenga,
	SalwarKameez,
	Dress,
}

impl GarmentCategory {
	pub fn as_str(&self) -> &'static str {
		match self {
			GarmentCategory::Shirt => "shirt",
			GarmentCategory::Trouser => "trouser",
			GarmentCategory::Suit => "suit",
			GarmentCategory::Blazer => "blazer",
			GarmentCategory::Kurta => "kurta",
			GarmentCategory::Sherwani => "sherwani",
			GarmentCategory::Blouse => "blouse",
			GarmentCategory::Lehenga => "lehenga",
			GarmentCategory::SalwarKameez => "salwar-kameez",
			GarmentCategory::Dress => "dress",
		}
	}

	pub fn all() -> impl Iterator<Item = Self> {
		[
			Self::Shirt,
			Self::Trouser,
			Self::Suit,
			Self::Blazer,
			Self::Kurta,
			Self::Sherwani,
			Self::Blouse,
			Self::Lehenga,
			Self::SalwarKameez,
			Self::Dress,
		]
		.into_iter()
	}
}

impl fmt::Display for GarmentCategory {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

impl FromStr for GarmentCategory {
	type Err = UnknownVariant;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Self::all()
			.find(|category| category.as_str() == s)
			.ok_or_else(|| UnknownVariant::new("garment category", s))
	}
}

/// A production resource with finite daily capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Tailor {
	pub id: String,
	pub name: String,
	pub specializations: BTreeSet<GarmentCategory>,
	pub capacity: TailorCapacity,
	/// Quality score used to rank tailors for normal orders. Higher is better.
	pub performance_score: f64,
	/// Inactive tailors are never offered new work.
	#[serde(default = "default_active")]
	pub active: bool,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
}

fn default_active() -> bool {
	true
}

impl Tailor {
	/// Returns true if the tailor can take work of the given category.
	pub fn can_produce(&self, category: GarmentCategory) -> bool {
		self.active && self.specializations.contains(&category)
	}
}

/// Daily capacity counters for one tailor.
///
/// `held` contains the ids of reservations taken on `business_day`, so
/// `reserved_today()` can never drift from the reservations themselves.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TailorCapacity {
	pub max_orders_per_day: u32,
	pub business_day: NaiveDate,
	#[serde(default)]
	pub held: BTreeSet<String>,
}

impl TailorCapacity {
	pub fn new(max_orders_per_day: u32, business_day: NaiveDate) -> Self {
		Self {
			max_orders_per_day,
			business_day,
			held: BTreeSet::new(),
		}
	}

	/// Number of slots reserved on the current business day.
	pub fn reserved_today(&self) -> u32 {
		self.held.len() as u32
	}

	/// Slots still free on the current business day.
	pub fn remaining(&self) -> u32 {
		self.max_orders_per_day.saturating_sub(self.reserved_today())
	}

	pub fn has_room(&self) -> bool {
		self.reserved_today() < self.max_orders_per_day
	}
}
