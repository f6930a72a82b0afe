//! Schema definitions and migration runner for SurrealDB.
//!
//! All table definitions use SCHEMAFULL mode for data integrity.
//! UUIDs are stored as strings. Resource classes are stored by their
//! registry index. Record ids are the numeric keys handed out by
//! `_sequence`.

use surrealdb::{Connection, Surreal};
use tracing::info;

use crate::error::DbError;

// -----------------------------------------------------------------------
// Migration tracking
// -----------------------------------------------------------------------

const MIGRATION_TABLE_DDL: &str = "\
DEFINE TABLE IF NOT EXISTS _migration SCHEMAFULL;
DEFINE FIELD IF NOT EXISTS version ON TABLE _migration TYPE int;
DEFINE FIELD IF NOT EXISTS name ON TABLE _migration TYPE string;
DEFINE FIELD IF NOT EXISTS applied_at ON TABLE _migration TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX IF NOT EXISTS idx_migration_version ON TABLE _migration \
    COLUMNS version UNIQUE;
";

struct Migration {
    version: u32,
    name: &'static str,
    sql: &'static str,
}

/// Unique index guarding provider uuids.
pub(crate) const PROVIDER_UUID_INDEX: &str = "idx_resource_provider_uuid";
/// Unique index guarding one inventory per provider and class.
pub(crate) const INVENTORY_CLASS_INDEX: &str = "idx_inventory_provider_class";
/// Unique index guarding one association per provider and aggregate.
pub(crate) const AGGREGATE_PAIR_INDEX: &str = "idx_in_aggregate_pair";
/// Unique index guarding aggregate uuids.
pub(crate) const AGGREGATE_UUID_INDEX: &str = "idx_aggregate_uuid";

static MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        name: "initial_schema",
        sql: SCHEMA_V1,
    },
    Migration {
        version: 2,
        name: "provider_generation",
        sql: SCHEMA_V2,
    },
];

// -----------------------------------------------------------------------
// Schema v1: initial table definitions
// -----------------------------------------------------------------------

const SCHEMA_V1: &str = "\
-- =======================================================================
-- Resource providers
-- =======================================================================
DEFINE TABLE resource_provider SCHEMAFULL;
DEFINE FIELD uuid ON TABLE resource_provider TYPE string;
DEFINE FIELD name ON TABLE resource_provider TYPE option<string>;
DEFINE FIELD created_at ON TABLE resource_provider TYPE datetime \
    DEFAULT time::now();
DEFINE FIELD updated_at ON TABLE resource_provider TYPE datetime \
    DEFAULT time::now();
DEFINE INDEX idx_resource_provider_uuid ON TABLE resource_provider \
    COLUMNS uuid UNIQUE;

-- =======================================================================
-- Inventories (one per provider and resource class)
-- =======================================================================
DEFINE TABLE inventory SCHEMAFULL;
DEFINE FIELD resource_provider_id ON TABLE inventory TYPE int;
DEFINE FIELD resource_class_id ON TABLE inventory TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD total ON TABLE inventory TYPE int ASSERT $value >= 0;
DEFINE FIELD reserved ON TABLE inventory TYPE int ASSERT $value >= 0;
DEFINE FIELD min_unit ON TABLE inventory TYPE int ASSERT $value >= 0;
DEFINE FIELD max_unit ON TABLE inventory TYPE int ASSERT $value >= 0;
DEFINE FIELD step_size ON TABLE inventory TYPE int ASSERT $value >= 0;
DEFINE FIELD allocation_ratio ON TABLE inventory TYPE float \
    ASSERT $value >= 0;
DEFINE INDEX idx_inventory_provider_class ON TABLE inventory \
    COLUMNS resource_provider_id, resource_class_id UNIQUE;

-- =======================================================================
-- Allocations (claims by consumers)
-- =======================================================================
DEFINE TABLE allocation SCHEMAFULL;
DEFINE FIELD resource_provider_id ON TABLE allocation TYPE int;
DEFINE FIELD resource_class_id ON TABLE allocation TYPE int \
    ASSERT $value >= 0;
DEFINE FIELD consumer_id ON TABLE allocation TYPE string;
DEFINE FIELD used ON TABLE allocation TYPE int ASSERT $value > 0;
DEFINE INDEX idx_allocation_provider_class ON TABLE allocation \
    COLUMNS resource_provider_id, resource_class_id;
DEFINE INDEX idx_allocation_consumer ON TABLE allocation \
    COLUMNS consumer_id;

-- =======================================================================
-- Aggregates (grouping tags)
-- =======================================================================
DEFINE TABLE aggregate SCHEMAFULL;
DEFINE FIELD uuid ON TABLE aggregate TYPE string;
DEFINE FIELD name ON TABLE aggregate TYPE string;
DEFINE INDEX idx_aggregate_uuid ON TABLE aggregate COLUMNS uuid UNIQUE;

-- =======================================================================
-- Numeric key sequences
-- =======================================================================
DEFINE TABLE _sequence SCHEMAFULL;
DEFINE FIELD last_value ON TABLE _sequence TYPE int;

-- =======================================================================
-- Graph Edge Tables (relations)
-- =======================================================================

-- ResourceProvider -> Aggregate association
DEFINE TABLE in_aggregate TYPE RELATION SCHEMAFULL;
DEFINE INDEX idx_in_aggregate_pair ON TABLE in_aggregate \
    COLUMNS in, out UNIQUE;
";

// -----------------------------------------------------------------------
// Schema v2: provider generation
// -----------------------------------------------------------------------

// Every write that can change capacity or usage of a provider bumps its
// generation, so two such writes on one provider conflict on commit.
const SCHEMA_V2: &str = "\
DEFINE FIELD generation ON TABLE resource_provider TYPE int DEFAULT 0;
UPDATE resource_provider SET generation = 0 WHERE generation = NONE;
";

// -----------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------

/// Applies every migration newer than the highest version recorded in
/// `_migration`. Each migration is recorded in the same request that runs it.
pub async fn run_migrations<C: Connection>(db: &Surreal<C>) -> Result<(), DbError> {
    db.query(MIGRATION_TABLE_DDL)
        .await?
        .check()
        .map_err(|e| DbError::Migration(e.to_string()))?;

    let mut result = db.query("SELECT VALUE version FROM _migration").await?;
    let applied: Vec<i64> = result.take(0)?;
    let current = applied.into_iter().max().unwrap_or(0);

    for migration in MIGRATIONS
        .iter()
        .filter(|migration| i64::from(migration.version) > current)
    {
        info!(
            version = migration.version,
            name = migration.name,
            "Applying migration"
        );
        db.query(migration.sql)
            .query("CREATE _migration SET version = $version, name = $name")
            .bind(("version", migration.version))
            .bind(("name", migration.name))
            .await?
            .check()
            .map_err(|e| {
                DbError::Migration(format!("v{} {}: {e}", migration.version, migration.name))
            })?;
    }

    Ok(())
}

/// The DDL of the initial schema.
pub fn schema_v1() -> &'static str {
    SCHEMA_V1
}
