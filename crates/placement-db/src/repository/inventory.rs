//! SurrealDB implementation of [`InventoryRepository`].
//!
//! Besides the repository itself this module stages inventory writes into a
//! caller's [`WriteTxn`], which is how provider create and save persist
//! resources in the same transaction as the provider row.

use placement_core::error::{PlacementError, PlacementResult};
use placement_core::models::inventory::{Inventory, InventoryField, InventoryParams};
use placement_core::models::provider_ref::{HasResourceProvider, ProviderKey};
use placement_core::models::resource_class::ResourceClass;
use placement_core::repository::InventoryRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::{debug, warn};
use uuid::Uuid;

use super::resource_provider::{fetch_provider, fetch_provider_by_uuid, stage_generation_bump};
use super::usage::{guard_capacity, read_usage};
use super::{decode_class, unsigned};
use crate::error::DbError;
use crate::schema::INVENTORY_CLASS_INDEX;
use crate::txn::{WriteTxn, next_ids};

const INVENTORY_COLUMNS: &str = "meta::id(id) AS record_id, resource_provider_id, \
     resource_class_id, total, reserved, min_unit, max_unit, step_size, allocation_ratio";

#[derive(Debug, SurrealValue)]
pub(crate) struct InventoryRow {
    record_id: i64,
    resource_provider_id: i64,
    resource_class_id: i64,
    total: i64,
    reserved: i64,
    min_unit: i64,
    max_unit: i64,
    step_size: i64,
    allocation_ratio: f64,
}

impl InventoryRow {
    pub(crate) fn resource_class(&self) -> Result<ResourceClass, DbError> {
        decode_class(self.resource_class_id)
    }

    pub(crate) fn params(&self) -> Result<InventoryParams, DbError> {
        Ok(InventoryParams {
            total: unsigned(self.total, "total")?,
            reserved: unsigned(self.reserved, "reserved")?,
            min_unit: unsigned(self.min_unit, "min_unit")?,
            max_unit: unsigned(self.max_unit, "max_unit")?,
            step_size: unsigned(self.step_size, "step_size")?,
            allocation_ratio: self.allocation_ratio,
        })
    }

    pub(crate) fn try_into_inventory(self, provider_uuid: Uuid) -> Result<Inventory, DbError> {
        let resource_class = self.resource_class()?;
        let params = self.params()?;
        Ok(Inventory::from_storage(
            self.record_id,
            ProviderKey::stored(self.resource_provider_id, provider_uuid),
            resource_class,
            params,
        ))
    }
}

/// Every inventory row of one provider, in class order.
pub(crate) async fn fetch_by_provider<C: Connection>(
    db: &Surreal<C>,
    provider_id: i64,
) -> Result<Vec<InventoryRow>, DbError> {
    let mut result = db
        .query(format!(
            "SELECT {INVENTORY_COLUMNS} FROM inventory \
             WHERE resource_provider_id = $provider_id \
             ORDER BY resource_class_id ASC"
        ))
        .bind(("provider_id", provider_id))
        .await?;
    Ok(result.take(0)?)
}

async fn fetch_by_id<C: Connection>(
    db: &Surreal<C>,
    id: i64,
) -> Result<Option<InventoryRow>, DbError> {
    let mut result = db
        .query(format!("SELECT {INVENTORY_COLUMNS} FROM inventory:{id}"))
        .await?;
    let rows: Vec<InventoryRow> = result.take(0)?;
    Ok(rows.into_iter().next())
}

fn assignment(txn: &mut WriteTxn, params: &InventoryParams, field: InventoryField) -> String {
    let column = field.column();
    match field {
        InventoryField::Total => format!("{column} = {}", txn.bind(params.total)),
        InventoryField::Reserved => format!("{column} = {}", txn.bind(params.reserved)),
        InventoryField::MinUnit => format!("{column} = {}", txn.bind(params.min_unit)),
        InventoryField::MaxUnit => format!("{column} = {}", txn.bind(params.max_unit)),
        InventoryField::StepSize => format!("{column} = {}", txn.bind(params.step_size)),
        InventoryField::AllocationRatio => {
            format!("{column} = <float> {}", txn.bind(params.allocation_ratio))
        }
    }
}

/// Stages the insert of a new inventory row under key `id`.
pub(crate) fn stage_create(
    txn: &mut WriteTxn,
    id: i64,
    provider_id: i64,
    provider: &str,
    resource_class: ResourceClass,
    params: &InventoryParams,
) {
    let sets = InventoryField::ALL
        .iter()
        .map(|field| assignment(txn, params, *field))
        .collect::<Vec<_>>()
        .join(", ");
    txn.push(format!(
        "CREATE inventory:{id} SET resource_provider_id = {provider_id}, \
         resource_class_id = {}, {sets}",
        resource_class.index()
    ));
    txn.on_unique_violation(
        INVENTORY_CLASS_INDEX,
        PlacementError::DuplicateInventory {
            provider: provider.to_owned(),
            resource_class,
        },
    );
}

/// Stages an update of the given fields only.
pub(crate) fn stage_update(
    txn: &mut WriteTxn,
    id: i64,
    params: &InventoryParams,
    fields: &[InventoryField],
) {
    if fields.is_empty() {
        return;
    }
    let sets = fields
        .iter()
        .map(|field| assignment(txn, params, *field))
        .collect::<Vec<_>>()
        .join(", ");
    txn.push(format!("UPDATE inventory:{id} SET {sets}"));
}

pub(crate) fn stage_delete(txn: &mut WriteTxn, id: i64) {
    txn.push(format!("DELETE inventory:{id}"));
}

/// SurrealDB implementation of the Inventory repository.
#[derive(Clone)]
pub struct SurrealInventoryRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealInventoryRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> InventoryRepository for SurrealInventoryRepository<C> {
    async fn create(&self, inventory: &mut Inventory) -> PlacementResult<()> {
        if inventory.is_created() {
            return Err(PlacementError::AlreadyCreated {
                entity: Inventory::ENTITY.into(),
            });
        }
        let (provider_id, _) = inventory.storage_key()?;
        let resource_class = inventory.resource_class().ok_or_else(|| {
            PlacementError::MissingResourceClass {
                entity: Inventory::ENTITY.into(),
            }
        })?;
        inventory.params.validate()?;

        let provider = fetch_provider(&self.db, provider_id)
            .await?
            .ok_or_else(|| PlacementError::not_found("resource_provider", provider_id))?;

        let id = next_ids(&self.db, "inventory", 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::Internal("no key reserved for inventory".into()))?;

        let mut txn = WriteTxn::new();
        stage_generation_bump(
            &mut txn,
            provider_id,
            PlacementError::not_found("resource_provider", provider_id),
        );
        txn.on_conflict(PlacementError::concurrent_capacity_change(resource_class));
        stage_create(
            &mut txn,
            id,
            provider_id,
            provider.uuid(),
            resource_class,
            &inventory.params,
        );
        txn.commit(&self.db).await?;

        debug!(inventory_id = id, provider_id, %resource_class, "Created inventory");
        inventory.mark_created(id);
        Ok(())
    }

    async fn save(&self, inventory: &mut Inventory) -> PlacementResult<()> {
        let id = inventory.id().ok_or_else(|| PlacementError::NotCreated {
            entity: Inventory::ENTITY.into(),
        })?;
        let fields = inventory.changed_fields();
        if fields.is_empty() {
            return Ok(());
        }
        inventory.params.validate()?;

        let row = fetch_by_id(&self.db, id)
            .await?
            .ok_or_else(|| PlacementError::not_found(Inventory::ENTITY, id))?;
        let provider_id = row.resource_provider_id;
        let resource_class = row.resource_class()?;
        let params = inventory.params;

        let mut txn = WriteTxn::new();
        txn.guard(
            &format!("array::len((SELECT VALUE id FROM inventory:{id})) = 0"),
            PlacementError::not_found(Inventory::ENTITY, id),
        );
        stage_generation_bump(
            &mut txn,
            provider_id,
            PlacementError::not_found("resource_provider", provider_id),
        );
        txn.on_conflict(PlacementError::concurrent_capacity_change(resource_class));
        if fields.iter().any(|field| field.affects_capacity()) {
            let used = read_usage(&self.db, provider_id)
                .await?
                .get(&resource_class)
                .copied()
                .unwrap_or(0);
            if !params.admits(used) {
                warn!(
                    inventory_id = id,
                    %resource_class,
                    used,
                    capacity = params.capacity(),
                    "Rejected inventory change below current usage"
                );
                return Err(PlacementError::over_capacity(
                    resource_class,
                    used,
                    params.capacity(),
                ));
            }
            guard_capacity(
                &mut txn,
                provider_id,
                resource_class,
                params.capacity(),
                PlacementError::CapacityConflict {
                    resource_class,
                    reason: format!(
                        "usage exceeds effective capacity {}",
                        params.capacity()
                    ),
                },
            );
        }
        stage_update(&mut txn, id, &params, &fields);
        txn.commit(&self.db).await?;

        debug!(inventory_id = id, changed = fields.len(), "Saved inventory");
        inventory.mark_saved();
        Ok(())
    }

    async fn destroy(&self, inventory: &Inventory) -> PlacementResult<()> {
        let id = inventory.id().ok_or_else(|| PlacementError::NotCreated {
            entity: Inventory::ENTITY.into(),
        })?;

        let mut result = self
            .db
            .query(format!("DELETE inventory:{id} RETURN BEFORE"))
            .await
            .map_err(DbError::from)?;
        let deleted: Vec<surrealdb_types::Value> = result.take(0).map_err(DbError::from)?;
        if deleted.is_empty() {
            return Err(PlacementError::not_found(Inventory::ENTITY, id));
        }

        debug!(inventory_id = id, "Destroyed inventory");
        Ok(())
    }

    async fn get_all_by_resource_provider_uuid(&self, uuid: Uuid) -> PlacementResult<Vec<Inventory>> {
        let Some(provider) = fetch_provider_by_uuid(&self.db, uuid).await? else {
            return Ok(Vec::new());
        };

        let rows = fetch_by_provider(&self.db, provider.id()).await?;
        let inventories = rows
            .into_iter()
            .map(|row| row.try_into_inventory(uuid))
            .collect::<Result<Vec<_>, DbError>>()?;

        Ok(inventories)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> InventoryParams {
        InventoryParams {
            total: 2048,
            reserved: 100,
            min_unit: 1,
            max_unit: 100,
            step_size: 1,
            allocation_ratio: 1.5,
        }
    }

    #[test]
    fn create_writes_every_column() {
        let mut txn = WriteTxn::new();
        stage_create(&mut txn, 3, 1, "rp", ResourceClass::DiskGb, &params());
        assert_eq!(txn.len(), 1);
    }

    #[test]
    fn update_without_changes_stages_nothing() {
        let mut txn = WriteTxn::new();
        stage_update(&mut txn, 3, &params(), &[]);
        assert!(txn.is_empty());
    }

    #[test]
    fn ratio_assignment_is_cast_to_float() {
        let mut txn = WriteTxn::new();
        let sql = assignment(&mut txn, &params(), InventoryField::AllocationRatio);
        assert_eq!(sql, "allocation_ratio = <float> $p0");
        let sql = assignment(&mut txn, &params(), InventoryField::Total);
        assert_eq!(sql, "total = $p1");
    }
}
