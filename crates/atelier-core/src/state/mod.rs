//! State management for orders.
//!
//! This module provides the state machine that validates and persists order
//! lifecycle transitions.

pub mod order;

pub use order::{is_rework, is_valid_transition, OrderStateMachine, TransitionOutcome};
