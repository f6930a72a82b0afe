//! Domain models for the placement engine.

pub mod aggregate;
pub mod allocation;
pub mod inventory;
pub mod provider_ref;
pub mod resource_class;
pub mod resource_provider;
pub mod versioned;
