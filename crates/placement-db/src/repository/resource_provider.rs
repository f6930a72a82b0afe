//! SurrealDB implementation of [`ResourceProviderRepository`].
//!
//! Create and save are single transactions: the provider row, its
//! `in_aggregate` edges and every inventory change of a resource-set
//! reconciliation are staged into one [`WriteTxn`]. Usage is read before
//! the transaction to plan the changes, and re-checked inside it by guards
//! that run ahead of the writes.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use placement_core::error::{PlacementError, PlacementResult};
use placement_core::models::aggregate::Aggregate;
use placement_core::models::resource_class::ResourceClass;
use placement_core::models::resource_provider::{ResourceProvider, ResourceUsage, StoredProvider};
use placement_core::reconcile::{InventoryChange, ReconciliationPlan, plan_resources};
use placement_core::repository::ResourceProviderRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::aggregate::{AggregateRow, ensure_aggregates_exist};
use super::inventory::{fetch_by_provider, stage_create, stage_delete, stage_update};
use super::parse_uuid;
use super::usage::{guard_capacity, guard_unused, read_usage};
use crate::error::DbError;
use crate::schema::{AGGREGATE_PAIR_INDEX, PROVIDER_UUID_INDEX};
use crate::txn::{WriteTxn, next_ids};

const ENTITY: &str = "resource_provider";

const PROVIDER_COLUMNS: &str = "meta::id(id) AS record_id, uuid, name, created_at, updated_at";

#[derive(Debug, SurrealValue)]
pub(crate) struct ProviderRow {
    record_id: i64,
    uuid: String,
    name: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl ProviderRow {
    pub(crate) fn id(&self) -> i64 {
        self.record_id
    }

    pub(crate) fn uuid(&self) -> &str {
        &self.uuid
    }

    fn try_into_stored(self) -> Result<StoredProvider, DbError> {
        Ok(StoredProvider {
            id: self.record_id,
            uuid: parse_uuid(&self.uuid, ENTITY)?,
            name: self.name,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}

/// Aggregate association read from an `in_aggregate` edge.
#[derive(Debug, SurrealValue)]
struct MembershipRow {
    provider_id: i64,
    aggregate_id: i64,
    aggregate_uuid: String,
    aggregate_name: String,
}

pub(crate) async fn fetch_provider<C: Connection>(
    db: &Surreal<C>,
    id: i64,
) -> Result<Option<ProviderRow>, DbError> {
    let mut result = db
        .query(format!("SELECT {PROVIDER_COLUMNS} FROM resource_provider:{id}"))
        .await?;
    let rows: Vec<ProviderRow> = result.take(0)?;
    Ok(rows.into_iter().next())
}

pub(crate) async fn fetch_provider_by_uuid<C: Connection>(
    db: &Surreal<C>,
    uuid: Uuid,
) -> Result<Option<ProviderRow>, DbError> {
    let mut result = db
        .query(format!(
            "SELECT {PROVIDER_COLUMNS} FROM resource_provider WHERE uuid = $uuid"
        ))
        .bind(("uuid", uuid.to_string()))
        .await?;
    let rows: Vec<ProviderRow> = result.take(0)?;
    Ok(rows.into_iter().next())
}

fn provider_missing(provider_id: i64) -> String {
    format!("array::len((SELECT VALUE id FROM resource_provider:{provider_id})) = 0")
}

/// Bumps the provider's generation, aborting `txn` with `missing` if the
/// provider row is gone. Two transactions that bump one provider cannot
/// both commit.
pub(crate) fn stage_generation_bump(txn: &mut WriteTxn, provider_id: i64, missing: PlacementError) {
    txn.guard(&provider_missing(provider_id), missing);
    txn.push(format!(
        "UPDATE resource_provider:{provider_id} SET generation += 1"
    ));
}

fn stage_associations(txn: &mut WriteTxn, provider_id: i64, aggregates: &[Aggregate]) {
    if aggregates.is_empty() {
        return;
    }
    for aggregate in aggregates {
        txn.push(format!(
            "RELATE resource_provider:{provider_id}->in_aggregate->aggregate:{}",
            aggregate.id
        ));
    }
    let uuids = aggregates
        .iter()
        .map(|aggregate| aggregate.uuid.to_string())
        .collect::<Vec<_>>()
        .join(", ");
    txn.on_unique_violation(
        AGGREGATE_PAIR_INDEX,
        PlacementError::DuplicateAssociation { aggregate: uuids },
    );
}

/// Re-checks every planned change against usage inside the transaction.
fn guard_plan(
    txn: &mut WriteTxn,
    provider_id: i64,
    plan: &ReconciliationPlan,
    used: &HashMap<ResourceClass, u64>,
) {
    for change in &plan.changes {
        let resource_class = change.resource_class();
        let in_use = used.get(&resource_class).copied().unwrap_or(0);
        let capacity = change.capacity_after();
        let error = match change {
            InventoryChange::Delete { .. } => PlacementError::CapacityConflict {
                resource_class,
                reason: "cannot remove inventory that is in use".into(),
            },
            _ => PlacementError::over_capacity(resource_class, in_use, capacity),
        };
        guard_capacity(txn, provider_id, resource_class, capacity, error);
    }
}

/// Stages the inventory writes of `plan`, keying creates from `ids`.
fn stage_plan(
    txn: &mut WriteTxn,
    provider_id: i64,
    provider: &str,
    plan: &ReconciliationPlan,
    ids: Vec<i64>,
) -> PlacementResult<()> {
    let mut ids = ids.into_iter();
    for change in &plan.changes {
        match change {
            InventoryChange::Create {
                resource_class,
                params,
            } => {
                let id = ids.next().ok_or_else(|| {
                    PlacementError::Internal("not enough inventory keys reserved".into())
                })?;
                stage_create(txn, id, provider_id, provider, *resource_class, params);
            }
            InventoryChange::Update {
                inventory_id,
                params,
                fields,
                ..
            } => stage_update(txn, *inventory_id, params, fields),
            InventoryChange::Delete { inventory_id, .. } => stage_delete(txn, *inventory_id),
        }
    }
    Ok(())
}

fn name_value(txn: &mut WriteTxn, name: Option<&str>) -> String {
    match name {
        Some(name) => txn.bind(name),
        None => "NONE".to_owned(),
    }
}

fn sorted(mut aggregates: Vec<Aggregate>) -> Vec<Aggregate> {
    aggregates.sort_by_key(|aggregate| aggregate.id);
    aggregates
}

/// SurrealDB implementation of the ResourceProvider repository.
#[derive(Clone)]
pub struct SurrealResourceProviderRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealResourceProviderRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }

    async fn reserve_inventory_keys(&self, plan: &ReconciliationPlan) -> Result<Vec<i64>, DbError> {
        next_ids(&self.db, "inventory", plan.creates()).await
    }
}

impl<C: Connection> ResourceProviderRepository for SurrealResourceProviderRepository<C> {
    async fn create(&self, provider: &mut ResourceProvider) -> PlacementResult<()> {
        if provider.is_created() {
            return Err(PlacementError::AlreadyCreated {
                entity: ENTITY.into(),
            });
        }
        let uuid = provider
            .uuid()
            .ok_or_else(|| PlacementError::MissingIdentifier {
                entity: ENTITY.into(),
            })?;
        let pending = provider.pending().clone();
        pending.check_aggregates()?;

        let plan = match &pending.resources {
            Some(desired) => plan_resources(desired, &[], &HashMap::new())?,
            None => ReconciliationPlan::default(),
        };
        if let Some(aggregates) = &pending.aggregates {
            ensure_aggregates_exist(&self.db, aggregates).await?;
        }
        if fetch_provider_by_uuid(&self.db, uuid).await?.is_some() {
            return Err(PlacementError::DuplicateProvider {
                uuid: uuid.to_string(),
            });
        }

        let id = next_ids(&self.db, ENTITY, 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::Internal("no key reserved for resource provider".into()))?;
        let inventory_ids = self.reserve_inventory_keys(&plan).await?;

        let label = uuid.to_string();
        let mut txn = WriteTxn::new();
        let uuid_param = txn.bind(label.clone());
        let name = name_value(&mut txn, provider.name());
        txn.push(format!(
            "CREATE resource_provider:{id} SET uuid = {uuid_param}, name = {name}"
        ));
        txn.on_unique_violation(
            PROVIDER_UUID_INDEX,
            PlacementError::DuplicateProvider {
                uuid: label.clone(),
            },
        );
        if let Some(aggregates) = &pending.aggregates {
            stage_associations(&mut txn, id, aggregates);
        }
        stage_plan(&mut txn, id, &label, &plan, inventory_ids)?;

        if let Err(err) = txn.commit(&self.db).await {
            // A commit that lost a race on the uuid may not name the index.
            if matches!(err, PlacementError::Database(_))
                && fetch_provider_by_uuid(&self.db, uuid).await?.is_some()
            {
                return Err(PlacementError::DuplicateProvider { uuid: label });
            }
            return Err(err);
        }

        let row = fetch_provider(&self.db, id)
            .await?
            .ok_or_else(|| PlacementError::not_found(ENTITY, &label))?;
        provider.mark_created(row.try_into_stored()?);

        info!(
            provider_id = id,
            %uuid,
            aggregates = pending.aggregates.as_ref().map_or(0, Vec::len),
            inventories = plan.creates(),
            "Created resource provider"
        );
        Ok(())
    }

    async fn save(&self, provider: &mut ResourceProvider) -> PlacementResult<()> {
        let id = provider.id().ok_or_else(|| PlacementError::NotCreated {
            entity: ENTITY.into(),
        })?;
        let uuid = provider
            .uuid()
            .ok_or_else(|| PlacementError::MissingIdentifier {
                entity: ENTITY.into(),
            })?;
        if provider.pending().is_empty() {
            return Ok(());
        }
        let pending = provider.pending().clone();
        pending.check_aggregates()?;

        if fetch_provider(&self.db, id).await?.is_none() {
            return Err(PlacementError::not_found(ENTITY, uuid));
        }
        if let Some(aggregates) = &pending.aggregates {
            ensure_aggregates_exist(&self.db, aggregates).await?;
        }

        // Usage and inventory are read from storage, never taken from the
        // caller's copy of the provider.
        let mut plan = ReconciliationPlan::default();
        let mut used = HashMap::new();
        if let Some(desired) = &pending.resources {
            used = read_usage(&self.db, id).await?;
            let inventories = fetch_by_provider(&self.db, id)
                .await?
                .into_iter()
                .map(|row| row.try_into_inventory(uuid))
                .collect::<Result<Vec<_>, DbError>>()?;

            plan = plan_resources(desired, &inventories, &used).inspect_err(|err| {
                warn!(provider_id = id, error = %err, "Rejected resource reconciliation");
            })?;
            debug!(provider_id = id, changes = ?plan.changes, "Planned inventory changes");
        }
        let inventory_ids = self.reserve_inventory_keys(&plan).await?;

        let label = uuid.to_string();
        let mut txn = WriteTxn::new();
        txn.guard(&provider_missing(id), PlacementError::not_found(ENTITY, &label));
        guard_plan(&mut txn, id, &plan, &used);
        txn.on_conflict(match plan.changes.first() {
            Some(change) => PlacementError::concurrent_capacity_change(change.resource_class()),
            None => PlacementError::ConcurrentUpdate {
                uuid: label.clone(),
            },
        });

        let name_assignment = if pending.name {
            format!("name = {}, ", name_value(&mut txn, provider.name()))
        } else {
            String::new()
        };
        txn.push(format!(
            "UPDATE resource_provider:{id} SET {name_assignment}generation += 1, \
             updated_at = time::now()"
        ));
        if let Some(aggregates) = &pending.aggregates {
            txn.push(format!("DELETE in_aggregate WHERE in = resource_provider:{id}"));
            stage_associations(&mut txn, id, aggregates);
        }
        stage_plan(&mut txn, id, &label, &plan, inventory_ids)?;
        txn.commit(&self.db).await?;

        let updated_at = fetch_provider(&self.db, id)
            .await?
            .map(|row| row.updated_at);
        provider.mark_saved(updated_at);

        if pending.resources.is_some() {
            info!(
                provider_id = id,
                changes = plan.changes.len(),
                "Reconciled resource provider inventory"
            );
        }
        Ok(())
    }

    async fn destroy(&self, provider: &ResourceProvider) -> PlacementResult<()> {
        let id = provider.id().ok_or_else(|| PlacementError::NotCreated {
            entity: ENTITY.into(),
        })?;
        let label = provider
            .uuid()
            .map_or_else(|| id.to_string(), |uuid| uuid.to_string());

        if fetch_provider(&self.db, id).await?.is_none() {
            return Err(PlacementError::not_found(ENTITY, &label));
        }

        // Every class with allocations counts, with or without inventory.
        let usage = read_usage(&self.db, id).await?;
        if let Some((resource_class, used)) = usage.iter().find(|(_, used)| **used > 0) {
            warn!(
                provider_id = id,
                %resource_class,
                used,
                "Refused to destroy resource provider in use"
            );
            return Err(PlacementError::InUse { uuid: label });
        }

        let mut txn = WriteTxn::new();
        guard_unused(
            &mut txn,
            id,
            PlacementError::InUse {
                uuid: label.clone(),
            },
        );
        txn.on_conflict(PlacementError::ConcurrentUpdate {
            uuid: label.clone(),
        });
        txn.push(format!("DELETE in_aggregate WHERE in = resource_provider:{id}"));
        txn.push(format!("DELETE inventory WHERE resource_provider_id = {id}"));
        txn.push(format!("DELETE resource_provider:{id}"));
        txn.commit(&self.db).await?;

        info!(provider_id = id, uuid = %label, "Destroyed resource provider");
        Ok(())
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> PlacementResult<ResourceProvider> {
        let row = fetch_provider_by_uuid(&self.db, uuid)
            .await?
            .ok_or_else(|| PlacementError::not_found(ENTITY, uuid))?;
        Ok(ResourceProvider::from_storage(row.try_into_stored()?))
    }

    async fn get_all(&self) -> PlacementResult<Vec<ResourceProvider>> {
        let mut result = self
            .db
            .query(format!(
                "SELECT {PROVIDER_COLUMNS} FROM resource_provider; \
                 SELECT meta::id(in) AS provider_id, meta::id(out) AS aggregate_id, \
                 out.uuid AS aggregate_uuid, out.name AS aggregate_name FROM in_aggregate;"
            ))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<ProviderRow> = result.take(0).map_err(DbError::from)?;
        let memberships: Vec<MembershipRow> = result.take(1).map_err(DbError::from)?;

        let mut aggregates: HashMap<i64, Vec<Aggregate>> = HashMap::new();
        for membership in memberships {
            aggregates
                .entry(membership.provider_id)
                .or_default()
                .push(Aggregate {
                    id: membership.aggregate_id,
                    uuid: parse_uuid(&membership.aggregate_uuid, "aggregate")?,
                    name: membership.aggregate_name,
                });
        }

        let mut providers = Vec::with_capacity(rows.len());
        for row in rows {
            let id = row.id();
            let mut provider = ResourceProvider::from_storage(row.try_into_stored()?);
            provider.set_loaded_aggregates(sorted(aggregates.remove(&id).unwrap_or_default()));
            providers.push(provider);
        }

        Ok(providers)
    }

    async fn load_aggregates(&self, provider: &mut ResourceProvider) -> PlacementResult<Vec<Aggregate>> {
        if let Some(aggregates) = provider.aggregates() {
            return Ok(aggregates.to_vec());
        }
        let id = provider.id().ok_or_else(|| PlacementError::NotCreated {
            entity: ENTITY.into(),
        })?;

        let mut result = self
            .db
            .query(format!(
                "SELECT meta::id(out) AS record_id, out.uuid AS uuid, out.name AS name \
                 FROM in_aggregate WHERE in = resource_provider:{id}"
            ))
            .await
            .map_err(DbError::from)?;
        let rows: Vec<AggregateRow> = result.take(0).map_err(DbError::from)?;

        let aggregates = sorted(
            rows.into_iter()
                .map(AggregateRow::try_into_aggregate)
                .collect::<Result<Vec<_>, DbError>>()?,
        );
        provider.set_loaded_aggregates(aggregates.clone());
        Ok(aggregates)
    }

    async fn load_resources(&self, provider: &mut ResourceProvider) -> PlacementResult<Vec<ResourceUsage>> {
        if let Some(resources) = provider.resources() {
            return Ok(resources.to_vec());
        }
        let id = provider.id().ok_or_else(|| PlacementError::NotCreated {
            entity: ENTITY.into(),
        })?;

        let used = read_usage(&self.db, id).await?;
        let resources = fetch_by_provider(&self.db, id)
            .await?
            .into_iter()
            .map(|row| -> Result<ResourceUsage, DbError> {
                let resource_class = row.resource_class()?;
                Ok(ResourceUsage {
                    resource_class,
                    params: row.params()?,
                    used: used.get(&resource_class).copied().unwrap_or(0),
                })
            })
            .collect::<Result<Vec<_>, DbError>>()?;

        provider.set_loaded_resources(resources.clone());
        Ok(resources)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use placement_core::models::inventory::InventoryParams;

    fn aggregate(id: i64) -> Aggregate {
        Aggregate {
            id,
            uuid: Uuid::new_v4(),
            name: format!("agg-{id}"),
        }
    }

    #[test]
    fn associations_stage_one_edge_each() {
        let mut txn = WriteTxn::new();
        stage_associations(&mut txn, 2, &[aggregate(1), aggregate(4)]);
        assert_eq!(txn.len(), 2);
    }

    #[test]
    fn plan_needs_a_key_per_create() {
        let plan = plan_resources(
            &[placement_core::models::resource_provider::ResourceDescriptor::new(
                ResourceClass::Vcpu,
                InventoryParams::new(8),
            )],
            &[],
            &HashMap::new(),
        )
        .unwrap();

        let mut txn = WriteTxn::new();
        assert!(matches!(
            stage_plan(&mut txn, 1, "rp", &plan, Vec::new()),
            Err(PlacementError::Internal(_))
        ));
        assert!(stage_plan(&mut txn, 1, "rp", &plan, vec![7]).is_ok());
    }

    #[test]
    fn missing_name_is_written_as_none() {
        let mut txn = WriteTxn::new();
        assert_eq!(name_value(&mut txn, None), "NONE");
        assert_eq!(name_value(&mut txn, Some("compute-1")), "$p0");
    }
}
