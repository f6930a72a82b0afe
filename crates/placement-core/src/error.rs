//! Error types for the placement engine.

use thiserror::Error;

use crate::models::resource_class::ResourceClass;

#[derive(Debug, Error)]
pub enum PlacementError {
    #[error("Missing identifier: {entity} requires a uuid to be created")]
    MissingIdentifier { entity: String },

    #[error("Already created: {entity} has a persisted identity")]
    AlreadyCreated { entity: String },

    #[error("Not created: {entity} has no persisted identity")]
    NotCreated { entity: String },

    #[error("Entity not found: {entity} with id {id}")]
    NotFound { entity: String, id: String },

    #[error("Missing resource provider: {entity} requires a created resource provider")]
    MissingProvider { entity: String },

    #[error("Missing resource class: {entity} requires a resource class")]
    MissingResourceClass { entity: String },

    #[error("Duplicate resource provider: {uuid}")]
    DuplicateProvider { uuid: String },

    #[error("Aggregate already associated: {aggregate}")]
    DuplicateAssociation { aggregate: String },

    #[error("Duplicate aggregate: {uuid}")]
    DuplicateAggregate { uuid: String },

    #[error("Inventory for {resource_class} already exists on resource provider {provider}")]
    DuplicateInventory {
        provider: String,
        resource_class: ResourceClass,
    },

    #[error("Capacity conflict on {resource_class}: {reason}")]
    CapacityConflict {
        resource_class: ResourceClass,
        reason: String,
    },

    #[error("Resource provider {uuid} is in use")]
    InUse { uuid: String },

    #[error("Resource provider {uuid} was changed by a concurrent update")]
    ConcurrentUpdate { uuid: String },

    #[error("Validation error: {message}")]
    Validation { message: String },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

pub type PlacementResult<T> = Result<T, PlacementError>;

impl PlacementError {
    pub fn not_found(entity: impl Into<String>, id: impl ToString) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.to_string(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }

    /// Claims of `used` units against a capacity of `capacity` effective units.
    pub fn over_capacity(resource_class: ResourceClass, used: u64, capacity: f64) -> Self {
        Self::CapacityConflict {
            resource_class,
            reason: format!("{used} used exceeds effective capacity {capacity}"),
        }
    }

    /// A capacity-affecting write that lost a commit race on its provider.
    pub fn concurrent_capacity_change(resource_class: ResourceClass) -> Self {
        Self::CapacityConflict {
            resource_class,
            reason: "resource provider changed by a concurrent update".into(),
        }
    }
}
