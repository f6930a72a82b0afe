//! Integration tests for write-transaction failure mapping using in-memory
//! SurrealDB.

use placement_core::PlacementError;
use placement_core::models::aggregate::CreateAggregate;
use placement_core::models::resource_provider::ResourceProvider;
use placement_core::repository::{AggregateRepository, ResourceProviderRepository};
use placement_db::WriteTxn;
use placement_db::repository::{SurrealAggregateRepository, SurrealResourceProviderRepository};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

async fn setup() -> Surreal<Db> {
    let db = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();
    db
}

async fn aggregate_count(db: &Surreal<Db>) -> usize {
    let mut result = db.query("SELECT VALUE id FROM aggregate").await.unwrap();
    let ids: Vec<surrealdb_types::Value> = result.take(0).unwrap();
    ids.len()
}

fn create_aggregate(txn: &mut WriteTxn, id: i64, uuid: &str) {
    let uuid = txn.bind(uuid);
    txn.push(format!(
        "CREATE aggregate:{id} SET uuid = {uuid}, name = 'rack'"
    ));
}

#[tokio::test]
async fn guard_after_a_write_reports_its_error() {
    let db = setup().await;

    let mut txn = WriteTxn::new();
    create_aggregate(&mut txn, 1, "a");
    txn.guard("true", PlacementError::InUse { uuid: "rp".into() });
    create_aggregate(&mut txn, 2, "b");

    assert!(matches!(
        txn.commit(&db).await,
        Err(PlacementError::InUse { .. })
    ));
    assert_eq!(aggregate_count(&db).await, 0, "the whole transaction rolls back");
}

#[tokio::test]
async fn unique_violation_after_a_write_reports_its_error() {
    let db = setup().await;

    let mut first = WriteTxn::new();
    create_aggregate(&mut first, 1, "taken");
    first.commit(&db).await.unwrap();

    let mut txn = WriteTxn::new();
    create_aggregate(&mut txn, 2, "fresh");
    create_aggregate(&mut txn, 3, "taken");
    txn.on_unique_violation(
        "idx_aggregate_uuid",
        PlacementError::DuplicateAggregate {
            uuid: "taken".into(),
        },
    );

    assert!(matches!(
        txn.commit(&db).await,
        Err(PlacementError::DuplicateAggregate { .. })
    ));
    assert_eq!(aggregate_count(&db).await, 1);
}

#[tokio::test]
async fn duplicate_edge_after_an_update_reports_association() {
    let db = setup().await;
    let aggregates = SurrealAggregateRepository::new(db.clone());
    let providers = SurrealResourceProviderRepository::new(db.clone());

    let aggregate = aggregates
        .create(CreateAggregate {
            uuid: None,
            name: "rack-1".into(),
        })
        .await
        .unwrap();
    let mut provider =
        ResourceProvider::new(Uuid::new_v4()).with_aggregates(vec![aggregate.clone()]);
    providers.create(&mut provider).await.unwrap();
    let id = provider.id().unwrap();

    let mut txn = WriteTxn::new();
    txn.push(format!(
        "UPDATE resource_provider:{id} SET updated_at = time::now()"
    ));
    txn.push(format!(
        "RELATE resource_provider:{id}->in_aggregate->aggregate:{}",
        aggregate.id
    ));
    txn.on_unique_violation(
        "idx_in_aggregate_pair",
        PlacementError::DuplicateAssociation {
            aggregate: aggregate.uuid.to_string(),
        },
    );

    assert!(matches!(
        txn.commit(&db).await,
        Err(PlacementError::DuplicateAssociation { .. })
    ));
}

#[tokio::test]
async fn unregistered_failure_is_a_database_error() {
    let db = setup().await;

    let mut txn = WriteTxn::new();
    create_aggregate(&mut txn, 1, "a");
    txn.push(
        "CREATE allocation:1 SET resource_provider_id = 1, resource_class_id = 2, \
         consumer_id = 'c', used = 0",
    );
    txn.guard("true", PlacementError::InUse { uuid: "rp".into() });

    match txn.commit(&db).await {
        Err(PlacementError::Database(message)) => {
            assert!(!message.contains("not executed"), "{message}");
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert_eq!(aggregate_count(&db).await, 0);
}
