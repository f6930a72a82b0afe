//! Resource provider domain model.

use std::collections::HashSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlacementError, PlacementResult};
use crate::models::aggregate::Aggregate;
use crate::models::inventory::InventoryParams;
use crate::models::provider_ref::ProviderKey;
use crate::models::resource_class::ResourceClass;

/// A derived attribute that is fetched on first access.
#[derive(Debug, Clone, Default, PartialEq)]
pub enum Loadable<T> {
    #[default]
    Unloaded,
    Loaded(T),
}

impl<T> Loadable<T> {
    pub fn get(&self) -> Option<&T> {
        match self {
            Loadable::Loaded(value) => Some(value),
            Loadable::Unloaded => None,
        }
    }

    pub fn is_loaded(&self) -> bool {
        matches!(self, Loadable::Loaded(_))
    }
}

/// Desired capacity for one resource class, as declared by a caller.
/// Usage is never caller-supplied.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    pub resource_class: ResourceClass,
    #[serde(flatten)]
    pub params: InventoryParams,
}

impl ResourceDescriptor {
    pub fn new(resource_class: ResourceClass, params: InventoryParams) -> Self {
        Self {
            resource_class,
            params,
        }
    }
}

/// Inventory of one class joined with the sum of its allocations.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceUsage {
    pub resource_class: ResourceClass,
    #[serde(flatten)]
    pub params: InventoryParams,
    pub used: u64,
}

impl ResourceUsage {
    pub fn capacity(&self) -> f64 {
        self.params.capacity()
    }

    /// Effective capacity left after current usage.
    pub fn available(&self) -> f64 {
        self.capacity() - self.used as f64
    }
}

/// Changes staged on a provider that the next create or save will persist.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PendingChanges {
    pub name: bool,
    pub aggregates: Option<Vec<Aggregate>>,
    pub resources: Option<Vec<ResourceDescriptor>>,
}

impl PendingChanges {
    pub fn is_empty(&self) -> bool {
        !self.name && self.aggregates.is_none() && self.resources.is_none()
    }

    /// Rejects an aggregate set that names the same aggregate twice.
    pub fn check_aggregates(&self) -> PlacementResult<()> {
        if let Some(aggregates) = &self.aggregates {
            let mut seen = HashSet::new();
            for aggregate in aggregates {
                if !seen.insert(aggregate.id) {
                    return Err(PlacementError::DuplicateAssociation {
                        aggregate: aggregate.uuid.to_string(),
                    });
                }
            }
        }
        Ok(())
    }
}

/// Identity fields of a stored provider row.
#[derive(Debug, Clone)]
pub struct StoredProvider {
    pub id: i64,
    pub uuid: Uuid,
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// An entity that offers quantities of one or more resource classes.
#[derive(Debug, Clone, Default)]
pub struct ResourceProvider {
    id: Option<i64>,
    uuid: Option<Uuid>,
    name: Option<String>,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    aggregates: Loadable<Vec<Aggregate>>,
    resources: Loadable<Vec<ResourceUsage>>,
    pending: PendingChanges,
}

impl ResourceProvider {
    pub fn new(uuid: Uuid) -> Self {
        Self {
            uuid: Some(uuid),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.set_name(Some(name.into()));
        self
    }

    pub fn with_aggregates(mut self, aggregates: Vec<Aggregate>) -> Self {
        self.set_aggregates(aggregates);
        self
    }

    pub fn with_resources(mut self, resources: Vec<ResourceDescriptor>) -> Self {
        self.set_resources(resources);
        self
    }

    pub fn from_storage(stored: StoredProvider) -> Self {
        Self {
            id: Some(stored.id),
            uuid: Some(stored.uuid),
            name: stored.name,
            created_at: Some(stored.created_at),
            updated_at: Some(stored.updated_at),
            ..Self::default()
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn uuid(&self) -> Option<Uuid> {
        self.uuid
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn created_at(&self) -> Option<DateTime<Utc>> {
        self.created_at
    }

    pub fn updated_at(&self) -> Option<DateTime<Utc>> {
        self.updated_at
    }

    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    pub fn key(&self) -> ProviderKey {
        ProviderKey {
            id: self.id,
            uuid: self.uuid,
        }
    }

    pub fn set_name(&mut self, name: Option<String>) {
        self.name = name;
        self.pending.name = true;
    }

    /// Stages a full replacement of the provider's aggregate associations.
    pub fn set_aggregates(&mut self, aggregates: Vec<Aggregate>) {
        self.pending.aggregates = Some(aggregates);
    }

    /// Stages a full replacement of the provider's declared resources.
    pub fn set_resources(&mut self, resources: Vec<ResourceDescriptor>) {
        self.pending.resources = Some(resources);
    }

    /// Associated aggregates, if loaded.
    pub fn aggregates(&self) -> Option<&[Aggregate]> {
        self.aggregates.get().map(Vec::as_slice)
    }

    /// Per-class usage summaries, if loaded.
    pub fn resources(&self) -> Option<&[ResourceUsage]> {
        self.resources.get().map(Vec::as_slice)
    }

    pub fn pending(&self) -> &PendingChanges {
        &self.pending
    }

    pub fn set_loaded_aggregates(&mut self, aggregates: Vec<Aggregate>) {
        self.aggregates = Loadable::Loaded(aggregates);
    }

    pub fn set_loaded_resources(&mut self, resources: Vec<ResourceUsage>) {
        self.resources = Loadable::Loaded(resources);
    }

    pub fn mark_created(&mut self, stored: StoredProvider) {
        self.id = Some(stored.id);
        self.created_at = Some(stored.created_at);
        self.updated_at = Some(stored.updated_at);
        self.commit_pending();
    }

    pub fn mark_saved(&mut self, updated_at: Option<DateTime<Utc>>) {
        if updated_at.is_some() {
            self.updated_at = updated_at;
        }
        self.commit_pending();
    }

    /// Folds staged changes into the loaded state once they are persisted.
    /// Usage summaries are invalidated rather than recomputed here.
    fn commit_pending(&mut self) {
        let pending = std::mem::take(&mut self.pending);
        if let Some(aggregates) = pending.aggregates {
            self.aggregates = Loadable::Loaded(aggregates);
        }
        if pending.resources.is_some() {
            self.resources = Loadable::Unloaded;
        }
    }
}
