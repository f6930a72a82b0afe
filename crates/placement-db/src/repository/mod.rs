//! SurrealDB repository implementations.

mod aggregate;
mod allocation;
mod inventory;
mod resource_provider;
mod usage;

pub use aggregate::SurrealAggregateRepository;
pub use allocation::SurrealAllocationRepository;
pub use inventory::SurrealInventoryRepository;
pub use resource_provider::SurrealResourceProviderRepository;

use placement_core::models::resource_class::ResourceClass;
use uuid::Uuid;

use crate::error::DbError;

fn parse_uuid(value: &str, column: &str) -> Result<Uuid, DbError> {
    Uuid::parse_str(value).map_err(|e| DbError::Decode(format!("invalid {column} UUID: {e}")))
}

fn unsigned(value: i64, column: &str) -> Result<u64, DbError> {
    u64::try_from(value).map_err(|_| DbError::Decode(format!("negative {column}: {value}")))
}

fn decode_class(index: i64) -> Result<ResourceClass, DbError> {
    u32::try_from(index)
        .ok()
        .and_then(|index| ResourceClass::from_index(index).ok())
        .ok_or_else(|| DbError::Decode(format!("unknown resource class index: {index}")))
}
