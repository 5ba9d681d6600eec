//! Common types module for the atelier production system.
//!
//! This module defines the core data types shared by every atelier crate:
//! orders and their status history, shop-floor queue items, tailors and
//! their daily capacity, price breakdowns, and the events published when any
//! of them change.

/// Event types published on the engine's event bus.
pub mod events;
/// Order aggregate, status vocabulary and status history.
pub mod order;
/// Custom-order configuration and price breakdown value objects.
pub mod pricing;
/// Production queue items and shop-floor statuses.
pub mod production;
/// Registry trait for named backend implementations.
pub mod registry;
/// Storage keys and versioned records.
pub mod storage;
/// Tailors, specializations and capacity counters.
pub mod tailor;
/// Utility helpers shared across crates.
pub mod utils;
/// Configuration validation types for backend configuration tables.
pub mod validation;

pub use events::*;
pub use order::*;
pub use pricing::*;
pub use production::*;
pub use registry::*;
pub use storage::*;
pub use tailor::*;
pub use utils::{business_day, truncate_id, UnknownVariant};
pub use validation::*;
