//! Repository trait definitions for data access abstraction.
//!
//! All repository operations are async. Each mutating operation is one
//! atomic unit of work: it either fully commits or leaves storage
//! untouched.

use uuid::Uuid;

use crate::error::PlacementResult;
use crate::models::{
    aggregate::{Aggregate, CreateAggregate},
    allocation::Allocation,
    inventory::Inventory,
    resource_class::ResourceClass,
    resource_provider::{ResourceProvider, ResourceUsage},
};

// ---------------------------------------------------------------------------
// Resource providers
// ---------------------------------------------------------------------------

pub trait ResourceProviderRepository: Send + Sync {
    /// Persist a new provider together with any staged aggregates and
    /// resources, assigning its numeric key.
    fn create(
        &self,
        provider: &mut ResourceProvider,
    ) -> impl Future<Output = PlacementResult<()>> + Send;

    /// Persist the staged changes of an existing provider.
    fn save(
        &self,
        provider: &mut ResourceProvider,
    ) -> impl Future<Output = PlacementResult<()>> + Send;

    /// Delete an unused provider with its inventories and associations.
    fn destroy(&self, provider: &ResourceProvider)
    -> impl Future<Output = PlacementResult<()>> + Send;

    fn get_by_uuid(&self, uuid: Uuid)
    -> impl Future<Output = PlacementResult<ResourceProvider>> + Send;

    /// Every provider with its aggregates loaded. Order is unspecified.
    fn get_all(&self) -> impl Future<Output = PlacementResult<Vec<ResourceProvider>>> + Send;

    /// Aggregates of the provider, fetched on first call.
    fn load_aggregates(
        &self,
        provider: &mut ResourceProvider,
    ) -> impl Future<Output = PlacementResult<Vec<Aggregate>>> + Send;

    /// Usage summaries of the provider, fetched on first call.
    fn load_resources(
        &self,
        provider: &mut ResourceProvider,
    ) -> impl Future<Output = PlacementResult<Vec<ResourceUsage>>> + Send;
}

// ---------------------------------------------------------------------------
// Inventories and allocations
// ---------------------------------------------------------------------------

pub trait InventoryRepository: Send + Sync {
    fn create(&self, inventory: &mut Inventory) -> impl Future<Output = PlacementResult<()>> + Send;

    /// Write the fields changed since load. Rejects a capacity reduction
    /// below current usage.
    fn save(&self, inventory: &mut Inventory) -> impl Future<Output = PlacementResult<()>> + Send;

    /// Delete by identity. Does not check usage.
    fn destroy(&self, inventory: &Inventory) -> impl Future<Output = PlacementResult<()>> + Send;

    fn get_all_by_resource_provider_uuid(
        &self,
        uuid: Uuid,
    ) -> impl Future<Output = PlacementResult<Vec<Inventory>>> + Send;
}

pub trait AllocationRepository: Send + Sync {
    /// Claim capacity. Rejects a claim that would exceed the class's
    /// effective capacity.
    fn create(
        &self,
        allocation: &mut Allocation,
    ) -> impl Future<Output = PlacementResult<()>> + Send;

    fn destroy(&self, allocation: &Allocation) -> impl Future<Output = PlacementResult<()>> + Send;

    fn get_allocations(
        &self,
        provider: &ResourceProvider,
        resource_class: ResourceClass,
    ) -> impl Future<Output = PlacementResult<Vec<Allocation>>> + Send;
}

// ---------------------------------------------------------------------------
// Aggregates (grouping tags)
// ---------------------------------------------------------------------------

pub trait AggregateRepository: Send + Sync {
    fn create(&self, input: CreateAggregate)
    -> impl Future<Output = PlacementResult<Aggregate>> + Send;
    fn get_by_id(&self, id: i64) -> impl Future<Output = PlacementResult<Aggregate>> + Send;
    fn get_by_uuid(&self, uuid: Uuid) -> impl Future<Output = PlacementResult<Aggregate>> + Send;
    /// Aggregates with the given ids; unknown ids are skipped.
    fn list_by_ids(&self, ids: &[i64])
    -> impl Future<Output = PlacementResult<Vec<Aggregate>>> + Send;
}
