//! Placement Core: resource provider inventory and allocation
//! accounting.
//!
//! This crate provides:
//! - Domain models ([`models`]) and the resource class registry
//! - The error type ([`PlacementError`])
//! - The resource-set reconciliation planner ([`reconcile`])
//! - Async repository traits implemented by storage crates ([`repository`])

pub mod error;
pub mod models;
pub mod reconcile;
pub mod repository;

pub use error::{PlacementError, PlacementResult};
