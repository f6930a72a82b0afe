//! Integration tests for resource-set reconciliation on provider save,
//! using in-memory SurrealDB.

use placement_core::PlacementError;
use placement_core::models::allocation::Allocation;
use placement_core::models::inventory::InventoryParams;
use placement_core::models::provider_ref::HasResourceProvider;
use placement_core::models::resource_class::ResourceClass;
use placement_core::models::resource_provider::{ResourceDescriptor, ResourceProvider};
use placement_core::repository::{
    AllocationRepository, InventoryRepository, ResourceProviderRepository,
};
use placement_db::repository::{
    SurrealAllocationRepository, SurrealInventoryRepository, SurrealResourceProviderRepository,
};
use surrealdb::Surreal;
use surrealdb::engine::local::{Db, Mem};
use uuid::Uuid;

#[derive(Clone)]
struct Fixture {
    providers: SurrealResourceProviderRepository<Db>,
    inventories: SurrealInventoryRepository<Db>,
    allocations: SurrealAllocationRepository<Db>,
}

async fn setup() -> Fixture {
    let db: Surreal<Db> = Surreal::new::<Mem>(()).await.unwrap();
    db.use_ns("test").use_db("test").await.unwrap();
    placement_db::run_migrations(&db).await.unwrap();

    Fixture {
        providers: SurrealResourceProviderRepository::new(db.clone()),
        inventories: SurrealInventoryRepository::new(db.clone()),
        allocations: SurrealAllocationRepository::new(db),
    }
}

fn params(total: u64) -> InventoryParams {
    InventoryParams {
        total,
        reserved: 100,
        min_unit: 1,
        max_unit: 100,
        step_size: 1,
        allocation_ratio: 1.0,
    }
}

/// Provider declaring DISK_GB and IPV4_ADDRESS, both with 2048 total.
async fn provider_with_disk_and_addresses(fixture: &Fixture) -> ResourceProvider {
    let mut provider = ResourceProvider::new(Uuid::new_v4())
        .with_name("compute-1")
        .with_resources(vec![
            ResourceDescriptor::new(ResourceClass::DiskGb, params(2048)),
            ResourceDescriptor::new(ResourceClass::Ipv4Address, params(2048)),
        ]);
    fixture.providers.create(&mut provider).await.unwrap();
    provider
}

async fn inventory_classes(fixture: &Fixture, provider: &ResourceProvider) -> Vec<ResourceClass> {
    fixture
        .inventories
        .get_all_by_resource_provider_uuid(provider.uuid().unwrap())
        .await
        .unwrap()
        .iter()
        .filter_map(|inventory| inventory.resource_class())
        .collect()
}

#[tokio::test]
async fn set_replace_drops_unused_classes() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;

    provider.set_resources(vec![ResourceDescriptor::new(
        ResourceClass::MemoryMb,
        params(2048),
    )]);
    fixture.providers.save(&mut provider).await.unwrap();

    assert_eq!(
        inventory_classes(&fixture, &provider).await,
        vec![ResourceClass::MemoryMb]
    );
    assert!(provider.resources().is_none(), "usage view is reloaded after save");
}

#[tokio::test]
async fn shrinking_below_usage_leaves_inventory_unchanged() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;

    let mut allocation =
        Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 8);
    fixture.allocations.create(&mut allocation).await.unwrap();

    // (107 - 100) * 1.0 = 7 effective units, below the 8 in use. The new
    // MEMORY_MB class must not be written either.
    provider.set_resources(vec![
        ResourceDescriptor::new(ResourceClass::DiskGb, params(107)),
        ResourceDescriptor::new(ResourceClass::Ipv4Address, params(2048)),
        ResourceDescriptor::new(ResourceClass::MemoryMb, params(2048)),
    ]);
    let err = fixture.providers.save(&mut provider).await.unwrap_err();
    assert!(matches!(
        err,
        PlacementError::CapacityConflict {
            resource_class: ResourceClass::DiskGb,
            ..
        }
    ));

    let inventories = fixture
        .inventories
        .get_all_by_resource_provider_uuid(provider.uuid().unwrap())
        .await
        .unwrap();
    assert_eq!(inventories.len(), 2);
    let disk = inventories
        .iter()
        .find(|inventory| inventory.resource_class() == Some(ResourceClass::DiskGb))
        .unwrap();
    assert_eq!(disk.params.total, 2048);
}

#[tokio::test]
async fn dropping_a_class_in_use_is_a_conflict() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;

    let mut allocation =
        Allocation::new(&provider, ResourceClass::Ipv4Address, Uuid::new_v4(), 1);
    fixture.allocations.create(&mut allocation).await.unwrap();

    provider.set_resources(vec![ResourceDescriptor::new(
        ResourceClass::DiskGb,
        params(2048),
    )]);
    assert!(matches!(
        fixture.providers.save(&mut provider).await,
        Err(PlacementError::CapacityConflict {
            resource_class: ResourceClass::Ipv4Address,
            ..
        })
    ));
    assert_eq!(
        inventory_classes(&fixture, &provider).await,
        vec![ResourceClass::DiskGb, ResourceClass::Ipv4Address]
    );
}

#[tokio::test]
async fn growing_a_class_in_use_updates_in_place() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;
    let before = fixture
        .inventories
        .get_all_by_resource_provider_uuid(provider.uuid().unwrap())
        .await
        .unwrap();

    let mut allocation =
        Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 8);
    fixture.allocations.create(&mut allocation).await.unwrap();

    let mut bigger = params(4096);
    bigger.allocation_ratio = 1.5;
    provider.set_resources(vec![
        ResourceDescriptor::new(ResourceClass::DiskGb, bigger),
        ResourceDescriptor::new(ResourceClass::Ipv4Address, params(2048)),
    ]);
    fixture.providers.save(&mut provider).await.unwrap();

    let after = fixture
        .inventories
        .get_all_by_resource_provider_uuid(provider.uuid().unwrap())
        .await
        .unwrap();
    let ids = |inventories: &[placement_core::models::inventory::Inventory]| {
        inventories.iter().map(|i| i.id()).collect::<Vec<_>>()
    };
    assert_eq!(ids(&after), ids(&before), "rows are updated, not recreated");
    assert_eq!(after[0].params, bigger);
}

#[tokio::test]
async fn resources_report_usage_as_an_outer_join() {
    let fixture = setup().await;
    let provider = provider_with_disk_and_addresses(&fixture).await;

    let mut first = Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 8);
    let mut second = Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 4);
    fixture.allocations.create(&mut first).await.unwrap();
    fixture.allocations.create(&mut second).await.unwrap();

    let mut fetched = fixture
        .providers
        .get_by_uuid(provider.uuid().unwrap())
        .await
        .unwrap();
    let resources = fixture.providers.load_resources(&mut fetched).await.unwrap();

    assert_eq!(resources.len(), 2);
    let disk = &resources[0];
    assert_eq!(disk.resource_class, ResourceClass::DiskGb);
    assert_eq!(disk.used, 12);
    assert_eq!(disk.available(), 1936.0);

    let addresses = &resources[1];
    assert_eq!(addresses.resource_class, ResourceClass::Ipv4Address);
    assert_eq!(addresses.used, 0);
}

#[tokio::test]
async fn repeated_class_in_desired_set_is_rejected() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;

    provider.set_resources(vec![
        ResourceDescriptor::new(ResourceClass::DiskGb, params(2048)),
        ResourceDescriptor::new(ResourceClass::DiskGb, params(4096)),
    ]);
    assert!(matches!(
        fixture.providers.save(&mut provider).await,
        Err(PlacementError::Validation { .. })
    ));
}

#[tokio::test]
async fn capacity_invariant_holds_across_operations() {
    let fixture = setup().await;
    let mut provider = provider_with_disk_and_addresses(&fixture).await;

    // Fill DISK_GB to its effective capacity of 1948.
    let mut bulk = Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 1948);
    fixture.allocations.create(&mut bulk).await.unwrap();

    let mut extra = Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 1);
    assert!(fixture.allocations.create(&mut extra).await.is_err());

    provider.set_resources(vec![
        ResourceDescriptor::new(ResourceClass::DiskGb, params(2047)),
        ResourceDescriptor::new(ResourceClass::Ipv4Address, params(2048)),
    ]);
    assert!(fixture.providers.save(&mut provider).await.is_err());

    let mut fetched = fixture
        .providers
        .get_by_uuid(provider.uuid().unwrap())
        .await
        .unwrap();
    for usage in fixture.providers.load_resources(&mut fetched).await.unwrap() {
        assert!(usage.used as f64 <= usage.capacity());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn concurrent_shrink_and_allocation_keep_capacity_invariant() {
    let fixture = setup().await;
    let exact = |total| InventoryParams {
        reserved: 0,
        ..params(total)
    };

    for _ in 0..20 {
        let mut provider = ResourceProvider::new(Uuid::new_v4()).with_resources(vec![
            ResourceDescriptor::new(ResourceClass::DiskGb, exact(10)),
        ]);
        fixture.providers.create(&mut provider).await.unwrap();

        let mut shrinking = provider.clone();
        shrinking.set_resources(vec![ResourceDescriptor::new(
            ResourceClass::DiskGb,
            exact(5),
        )]);
        let mut allocation =
            Allocation::new(&provider, ResourceClass::DiskGb, Uuid::new_v4(), 8);

        let save = tokio::spawn({
            let fixture = fixture.clone();
            async move { fixture.providers.save(&mut shrinking).await }
        });
        let claim = tokio::spawn({
            let fixture = fixture.clone();
            async move { fixture.allocations.create(&mut allocation).await }
        });
        let (save, claim) = (save.await.unwrap(), claim.await.unwrap());

        assert!(
            save.is_err() || claim.is_err(),
            "shrinking to 5 and claiming 8 cannot both commit"
        );
        for result in [&save, &claim] {
            if let Err(err) = result {
                assert!(
                    matches!(
                        err,
                        PlacementError::CapacityConflict {
                            resource_class: ResourceClass::DiskGb,
                            ..
                        }
                    ),
                    "unexpected error: {err:?}"
                );
            }
        }

        let mut fetched = fixture
            .providers
            .get_by_uuid(provider.uuid().unwrap())
            .await
            .unwrap();
        for usage in fixture.providers.load_resources(&mut fetched).await.unwrap() {
            assert!(usage.used as f64 <= usage.capacity());
        }
    }
}
