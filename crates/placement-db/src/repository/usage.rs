//! Allocation totals per resource class, and the in-transaction checks
//! that keep them within effective capacity.

use std::collections::HashMap;

use placement_core::error::PlacementError;
use placement_core::models::resource_class::ResourceClass;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;

use super::{decode_class, unsigned};
use crate::error::DbError;
use crate::txn::WriteTxn;

#[derive(Debug, SurrealValue)]
struct UsageRow {
    resource_class_id: i64,
    used: i64,
}

/// Sum of allocated units per class on one provider. Classes without
/// allocations are absent. Classes without an inventory row are included.
pub(crate) async fn read_usage<C: Connection>(
    db: &Surreal<C>,
    provider_id: i64,
) -> Result<HashMap<ResourceClass, u64>, DbError> {
    let mut result = db
        .query(
            "SELECT resource_class_id, math::sum(used) AS used FROM allocation \
             WHERE resource_provider_id = $provider_id \
             GROUP BY resource_class_id",
        )
        .bind(("provider_id", provider_id))
        .await?;
    let rows: Vec<UsageRow> = result.take(0)?;

    rows.into_iter()
        .map(|row| -> Result<_, DbError> {
            Ok((decode_class(row.resource_class_id)?, unsigned(row.used, "used")?))
        })
        .collect()
}

fn used_expr(provider_id: i64, class: ResourceClass) -> String {
    format!(
        "math::sum((SELECT VALUE used FROM allocation \
         WHERE resource_provider_id = {provider_id} AND resource_class_id = {}))",
        class.index()
    )
}

/// Aborts `txn` unless usage of `class` fits within `capacity`.
pub(crate) fn guard_capacity(
    txn: &mut WriteTxn,
    provider_id: i64,
    class: ResourceClass,
    capacity: f64,
    error: PlacementError,
) {
    let capacity = txn.bind(capacity);
    txn.guard(
        &format!("{} > <float> {capacity}", used_expr(provider_id, class)),
        error,
    );
}

/// Aborts `txn` unless `claim` more units of `class` fit within the
/// capacity stored for it. A class without inventory has no capacity.
pub(crate) fn guard_claim(
    txn: &mut WriteTxn,
    provider_id: i64,
    class: ResourceClass,
    claim: u64,
    error: PlacementError,
) {
    let claim = txn.bind(claim);
    txn.guard(
        &format!(
            "{} + {claim} > math::sum((SELECT VALUE (total - reserved) * allocation_ratio \
             FROM inventory WHERE resource_provider_id = {provider_id} \
             AND resource_class_id = {}))",
            used_expr(provider_id, class),
            class.index()
        ),
        error,
    );
}

/// Aborts `txn` if the provider has any allocation, in any class.
pub(crate) fn guard_unused(txn: &mut WriteTxn, provider_id: i64, error: PlacementError) {
    txn.guard(
        &format!(
            "array::len((SELECT VALUE id FROM allocation \
             WHERE resource_provider_id = {provider_id})) > 0"
        ),
        error,
    );
}
