//! SurrealDB implementation of [`AllocationRepository`].

use placement_core::error::{PlacementError, PlacementResult};
use placement_core::models::allocation::Allocation;
use placement_core::models::provider_ref::HasResourceProvider;
use placement_core::models::resource_class::ResourceClass;
use placement_core::models::resource_provider::ResourceProvider;
use placement_core::repository::AllocationRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, warn};

use super::inventory::fetch_by_provider;
use super::resource_provider::{fetch_provider, stage_generation_bump};
use super::usage::{guard_claim, read_usage};
use super::{decode_class, parse_uuid, unsigned};
use crate::error::DbError;
use crate::txn::{WriteTxn, next_ids};

#[derive(Debug, SurrealValue)]
struct AllocationRow {
    record_id: i64,
    resource_class_id: i64,
    consumer_id: String,
    used: i64,
}

/// SurrealDB implementation of the Allocation repository.
#[derive(Clone)]
pub struct SurrealAllocationRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAllocationRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    /// Effective capacity of `class` on the provider, zero without inventory.
    async fn capacity(&self, provider_id: i64, class: ResourceClass) -> Result<f64, DbError> {
        for row in fetch_by_provider(&self.db, provider_id).await? {
            if row.resource_class()? == class {
                return Ok(row.params()?.capacity());
            }
        }
        Ok(0.0)
    }
}

impl<C: Connection> AllocationRepository for SurrealAllocationRepository<C> {
    async fn create(&self, allocation: &mut Allocation) -> PlacementResult<()> {
        let (provider_id, _, consumer_id) = allocation.validate_for_create()?;
        let resource_class = allocation.resource_class().ok_or_else(|| {
            PlacementError::MissingResourceClass {
                entity: Allocation::ENTITY.into(),
            }
        })?;
        let claim = allocation.used;

        if fetch_provider(&self.db, provider_id).await?.is_none() {
            return Err(PlacementError::not_found("resource_provider", provider_id));
        }

        let used = read_usage(&self.db, provider_id)
            .await?
            .get(&resource_class)
            .copied()
            .unwrap_or(0);
        let capacity = self.capacity(provider_id, resource_class).await?;
        let claimed = used.checked_add(claim).ok_or_else(|| {
            PlacementError::validation(format!("allocation of {claim} {resource_class} is too large"))
        })?;
        if claimed as f64 > capacity {
            warn!(
                provider_id,
                %resource_class,
                used,
                claim,
                capacity,
                "Rejected allocation over capacity"
            );
            return Err(PlacementError::over_capacity(resource_class, claimed, capacity));
        }

        let id = next_ids(&self.db, "allocation", 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::Internal("no key reserved for allocation".into()))?;

        let mut txn = WriteTxn::new();
        stage_generation_bump(
            &mut txn,
            provider_id,
            PlacementError::not_found("resource_provider", provider_id),
        );
        txn.on_conflict(PlacementError::concurrent_capacity_change(resource_class));
        guard_claim(
            &mut txn,
            provider_id,
            resource_class,
            claim,
            PlacementError::CapacityConflict {
                resource_class,
                reason: format!("claim of {claim} exceeds remaining capacity"),
            },
        );
        let consumer = txn.bind(consumer_id.to_string());
        let used_param = txn.bind(claim);
        txn.push(format!(
            "CREATE allocation:{id} SET resource_provider_id = {provider_id}, \
             resource_class_id = {}, consumer_id = {consumer}, used = {used_param}",
            resource_class.index()
        ));
        txn.commit(&self.db).await?;

        debug!(allocation_id = id, provider_id, %resource_class, claim, "Created allocation");
        allocation.mark_created(id);
        Ok(())
    }

    async fn destroy(&self, allocation: &Allocation) -> PlacementResult<()> {
        let id = allocation.id().ok_or_else(|| PlacementError::NotCreated {
            entity: Allocation::ENTITY.into(),
        })?;

        let mut result = self
            .db
            .query(format!("DELETE allocation:{id} RETURN BEFORE"))
            .await
            .map_err(DbError::from)?;
        let deleted: Vec<surrealdb_types::Value> = result.take(0).map_err(DbError::from)?;
        if deleted.is_empty() {
            return Err(PlacementError::not_found(Allocation::ENTITY, id));
        }

        debug!(allocation_id = id, "Destroyed allocation");
        Ok(())
    }

    async fn get_allocations(
        &self,
        provider: &ResourceProvider,
        resource_class: ResourceClass,
    ) -> PlacementResult<Vec<Allocation>> {
        let provider_id = provider.id().ok_or_else(|| PlacementError::NotCreated {
            entity: "resource_provider".into(),
        })?;

        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, resource_class_id, consumer_id, used \
                 FROM allocation \
                 WHERE resource_provider_id = $provider_id \
                 AND resource_class_id = $resource_class_id",
            )
            .bind(("provider_id", provider_id))
            .bind(("resource_class_id", i64::from(resource_class.index())))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<AllocationRow> = result.take(0).map_err(DbError::from)?;

        let allocations = rows
            .into_iter()
            .map(|row| -> Result<Allocation, DbError> {
                Ok(Allocation::from_storage(
                    row.record_id,
                    provider.key(),
                    decode_class(row.resource_class_id)?,
                    parse_uuid(&row.consumer_id, "consumer")?,
                    unsigned(row.used, "used")?,
                ))
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(allocations)
    }
}
