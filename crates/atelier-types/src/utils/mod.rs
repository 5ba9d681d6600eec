//! Utility helpers shared across atelier crates.

use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

/// Truncates an id for log output.
///
/// Shows only the first 8 characters followed by ".." for longer strings.
pub fn truncate_id(id: &str) -> String {
	match id.char_indices().nth(8) {
		Some((end, _)) => format!("{}..", &id[..end]),
		None => id.to_string(),
	}
}

/// Business day a timestamp falls on. The workshop runs on UTC days.
pub fn business_day(at: DateTime<Utc>) -> NaiveDate {
	at.date_naive()
}

/// A name that is not part of a fixed vocabulary.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("Unknown {kind}: '{value}'")]
pub struct UnknownVariant {
	pub kind: &'static str,
	pub value: String,
}

impl UnknownVariant {
	pub fn new(kind: &'static str, value: impl Into<String>) -> Self {
		Self {
			kind,
			value: value.into(),
		}
	}
}
