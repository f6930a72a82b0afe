//! Aggregate (grouping tag) domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A named group that resource providers can be associated with.
///
/// Aggregates are owned by their own store; a resource provider only
/// records which aggregates it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Aggregate {
    pub id: i64,
    pub uuid: Uuid,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAggregate {
    /// Generated when absent.
    pub uuid: Option<Uuid>,
    pub name: String,
}
