//! SurrealDB implementation of [`AggregateRepository`].

use std::collections::BTreeSet;

use placement_core::error::{PlacementError, PlacementResult};
use placement_core::models::aggregate::{Aggregate, CreateAggregate};
use placement_core::repository::AggregateRepository;
use surrealdb::{Connection, Surreal};
use surrealdb_types::SurrealValue;
use tracing::info;
use uuid::Uuid;

use super::parse_uuid;
use crate::error::DbError;
use crate::schema::AGGREGATE_UUID_INDEX;
use crate::txn::{WriteTxn, next_ids};

/// Aggregate row with its numeric key, either read directly or through an
/// `in_aggregate` edge.
#[derive(Debug, SurrealValue)]
pub(crate) struct AggregateRow {
    record_id: i64,
    uuid: String,
    name: String,
}

impl AggregateRow {
    pub(crate) fn try_into_aggregate(self) -> Result<Aggregate, DbError> {
        Ok(Aggregate {
            id: self.record_id,
            uuid: parse_uuid(&self.uuid, "aggregate")?,
            name: self.name,
        })
    }
}

/// Reads the aggregates with the given keys. Unknown keys are skipped.
pub(crate) async fn fetch_aggregates<C: Connection>(
    db: &Surreal<C>,
    ids: &[i64],
) -> Result<Vec<Aggregate>, DbError> {
    let ids: BTreeSet<i64> = ids.iter().copied().collect();
    if ids.is_empty() {
        return Ok(Vec::new());
    }
    // Numeric keys are safe to inline as record targets.
    let targets = ids
        .iter()
        .map(|id| format!("aggregate:{id}"))
        .collect::<Vec<_>>()
        .join(", ");

    let mut result = db
        .query(format!(
            "SELECT meta::id(id) AS record_id, uuid, name FROM {targets}"
        ))
        .await?;
    let rows: Vec<AggregateRow> = result.take(0)?;

    rows.into_iter()
        .map(AggregateRow::try_into_aggregate)
        .collect()
}

/// Fails with `NotFound` for the first aggregate that is not stored.
pub(crate) async fn ensure_aggregates_exist<C: Connection>(
    db: &Surreal<C>,
    aggregates: &[Aggregate],
) -> PlacementResult<()> {
    let ids: Vec<i64> = aggregates.iter().map(|aggregate| aggregate.id).collect();
    let stored: BTreeSet<i64> = fetch_aggregates(db, &ids)
        .await?
        .into_iter()
        .map(|aggregate| aggregate.id)
        .collect();

    match aggregates.iter().find(|aggregate| !stored.contains(&aggregate.id)) {
        Some(missing) => Err(PlacementError::not_found("aggregate", missing.uuid)),
        None => Ok(()),
    }
}

/// SurrealDB implementation of the aggregate store.
#[derive(Clone)]
pub struct SurrealAggregateRepository<C: Connection> {
    db: Surreal<C>,
}

impl<C: Connection> SurrealAggregateRepository<C> {
    pub fn new(db: Surreal<C>) -> Self {
        Self { db }
    }
}

impl<C: Connection> AggregateRepository for SurrealAggregateRepository<C> {
    async fn create(&self, input: CreateAggregate) -> PlacementResult<Aggregate> {
        if input.name.trim().is_empty() {
            return Err(PlacementError::validation("aggregate name must not be empty"));
        }
        let uuid = input.uuid.unwrap_or_else(Uuid::new_v4);
        let id = next_ids(&self.db, "aggregate", 1)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::Internal("no key reserved for aggregate".into()))?;

        let mut txn = WriteTxn::new();
        let uuid_param = txn.bind(uuid.to_string());
        let name_param = txn.bind(input.name.clone());
        txn.push(format!(
            "CREATE aggregate:{id} SET uuid = {uuid_param}, name = {name_param}"
        ));
        txn.on_unique_violation(
            AGGREGATE_UUID_INDEX,
            PlacementError::DuplicateAggregate {
                uuid: uuid.to_string(),
            },
        );
        txn.commit(&self.db).await?;

        info!(aggregate_id = id, %uuid, "Created aggregate");

        Ok(Aggregate {
            id,
            uuid,
            name: input.name,
        })
    }

    async fn get_by_id(&self, id: i64) -> PlacementResult<Aggregate> {
        fetch_aggregates(&self.db, &[id])
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::not_found("aggregate", id))
    }

    async fn get_by_uuid(&self, uuid: Uuid) -> PlacementResult<Aggregate> {
        let mut result = self
            .db
            .query(
                "SELECT meta::id(id) AS record_id, uuid, name FROM aggregate \
                 WHERE uuid = $uuid",
            )
            .bind(("uuid", uuid.to_string()))
            .await
            .map_err(DbError::from)?;

        let rows: Vec<AggregateRow> = result.take(0).map_err(DbError::from)?;
        let row = rows
            .into_iter()
            .next()
            .ok_or_else(|| PlacementError::not_found("aggregate", uuid))?;

        Ok(row.try_into_aggregate()?)
    }

    async fn list_by_ids(&self, ids: &[i64]) -> PlacementResult<Vec<Aggregate>> {
        Ok(fetch_aggregates(&self.db, ids).await?)
    }
}
