//! Integration tests for schema initialization using in-memory SurrealDB.

use surrealdb::Surreal;
use surrealdb::engine::local::Mem;

#[tokio::test]
async fn schema_migration_applies_successfully() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    placement_db::run_migrations(&db).await.unwrap();

    let mut result = db.query("INFO FOR DB").await.unwrap();
    let info: Option<surrealdb_types::Value> = result.take(0).unwrap();
    let info = info.expect("INFO FOR DB should return a value");
    let info_str = format!("{:?}", info);

    for table in [
        "resource_provider",
        "inventory",
        "allocation",
        "aggregate",
        "in_aggregate",
        "_sequence",
        "_migration",
    ] {
        assert!(info_str.contains(table), "missing {table} table");
    }
}

#[test]
fn schema_ddl_is_exposed() {
    let ddl = placement_db::schema_v1();
    assert!(ddl.contains("DEFINE TABLE resource_provider SCHEMAFULL"));
    assert!(ddl.contains("DEFINE TABLE in_aggregate TYPE RELATION"));
}

#[tokio::test]
async fn migration_is_idempotent() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();

    placement_db::run_migrations(&db).await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    let mut result = db
        .query("SELECT VALUE version FROM _migration ORDER BY version")
        .await
        .unwrap();
    let versions: Vec<i64> = result.take(0).unwrap();
    assert_eq!(versions, vec![1, 2], "each migration is recorded once");
}

#[tokio::test]
async fn unique_index_prevents_duplicate_provider_uuids() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    db.query("CREATE resource_provider:1 SET uuid = 'a'")
        .await
        .unwrap()
        .check()
        .unwrap();

    let result = db
        .query("CREATE resource_provider:2 SET uuid = 'a'")
        .await
        .unwrap()
        .check();

    let err = result.expect_err("duplicate uuid should be rejected");
    assert!(err.to_string().contains("idx_resource_provider_uuid"));
}

#[tokio::test]
async fn allocations_must_use_positive_amounts() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    let result = db
        .query(
            "CREATE allocation:1 SET resource_provider_id = 1, \
             resource_class_id = 2, consumer_id = 'c', used = 0",
        )
        .await
        .unwrap()
        .check();

    assert!(result.is_err(), "zero usage should be rejected");
}

#[tokio::test]
async fn sequences_hand_out_increasing_keys() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    let first = placement_db::next_ids(&db, "inventory", 2).await.unwrap();
    let second = placement_db::next_ids(&db, "inventory", 1).await.unwrap();
    let other = placement_db::next_ids(&db, "allocation", 1).await.unwrap();

    assert_eq!(first, vec![1, 2]);
    assert_eq!(second, vec![3]);
    assert_eq!(other, vec![1]);
    assert!(placement_db::next_ids(&db, "inventory", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn providers_start_at_generation_zero() {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    db.query("CREATE resource_provider:1 SET uuid = 'a'")
        .await
        .unwrap()
        .check()
        .unwrap();

    let mut result = db
        .query("SELECT VALUE generation FROM resource_provider:1")
        .await
        .unwrap();
    let generations: Vec<i64> = result.take(0).unwrap();
    assert_eq!(generations, vec![0]);
}
