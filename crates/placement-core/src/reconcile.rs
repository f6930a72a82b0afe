//! Resource-set reconciliation.
//!
//! Replacing a provider's declared resources is a class-keyed diff between
//! the desired descriptors and the stored inventories. The planner is pure:
//! it validates every class against current usage before producing any
//! change, so a rejected plan never leaves partial writes behind.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::error::{PlacementError, PlacementResult};
use crate::models::inventory::{Inventory, InventoryField, InventoryParams};
use crate::models::provider_ref::HasResourceProvider;
use crate::models::resource_class::ResourceClass;
use crate::models::resource_provider::ResourceDescriptor;

/// One inventory write produced by reconciliation.
#[derive(Debug, Clone, PartialEq)]
pub enum InventoryChange {
    Create {
        resource_class: ResourceClass,
        params: InventoryParams,
    },
    Update {
        inventory_id: i64,
        resource_class: ResourceClass,
        params: InventoryParams,
        fields: Vec<InventoryField>,
    },
    Delete {
        inventory_id: i64,
        resource_class: ResourceClass,
    },
}

impl InventoryChange {
    pub fn resource_class(&self) -> ResourceClass {
        match self {
            InventoryChange::Create { resource_class, .. }
            | InventoryChange::Update { resource_class, .. }
            | InventoryChange::Delete { resource_class, .. } => *resource_class,
        }
    }

    /// Effective capacity the class will have once the change is applied.
    pub fn capacity_after(&self) -> f64 {
        match self {
            InventoryChange::Create { params, .. } | InventoryChange::Update { params, .. } => {
                params.capacity()
            }
            InventoryChange::Delete { .. } => 0.0,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ReconciliationPlan {
    pub changes: Vec<InventoryChange>,
}

impl ReconciliationPlan {
    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn creates(&self) -> usize {
        self.changes
            .iter()
            .filter(|change| matches!(change, InventoryChange::Create { .. }))
            .count()
    }
}

/// Diffs `desired` against a provider's stored `inventories`.
///
/// `used` holds the current allocation total per class; a class absent
/// from it has no usage. Classes with an inventory but no desired entry
/// are deleted, which is only allowed while they are unused.
pub fn plan_resources(
    desired: &[ResourceDescriptor],
    inventories: &[Inventory],
    used: &HashMap<ResourceClass, u64>,
) -> PlacementResult<ReconciliationPlan> {
    let mut seen = HashSet::new();
    for descriptor in desired {
        if !seen.insert(descriptor.resource_class) {
            return Err(PlacementError::validation(format!(
                "resource class {} is declared more than once",
                descriptor.resource_class
            )));
        }
        descriptor.params.validate()?;
    }

    let mut existing = BTreeMap::new();
    for inventory in inventories {
        let resource_class = inventory.resource_class().ok_or_else(|| {
            PlacementError::Internal("stored inventory without a resource class".into())
        })?;
        let inventory_id = inventory
            .id()
            .ok_or_else(|| PlacementError::Internal("stored inventory without an id".into()))?;
        existing.insert(resource_class, (inventory_id, inventory.params));
    }

    let mut changes = Vec::new();
    for descriptor in desired {
        let resource_class = descriptor.resource_class;
        let in_use = used.get(&resource_class).copied().unwrap_or(0);
        if !descriptor.params.admits(in_use) {
            return Err(PlacementError::over_capacity(
                resource_class,
                in_use,
                descriptor.params.capacity(),
            ));
        }

        match existing.remove(&resource_class) {
            Some((inventory_id, current)) => {
                let fields = descriptor.params.diff(&current);
                if !fields.is_empty() {
                    changes.push(InventoryChange::Update {
                        inventory_id,
                        resource_class,
                        params: descriptor.params,
                        fields,
                    });
                }
            }
            None => changes.push(InventoryChange::Create {
                resource_class,
                params: descriptor.params,
            }),
        }
    }

    for (resource_class, (inventory_id, _)) in existing {
        let in_use = used.get(&resource_class).copied().unwrap_or(0);
        if in_use > 0 {
            return Err(PlacementError::CapacityConflict {
                resource_class,
                reason: format!("cannot remove inventory with {in_use} in use"),
            });
        }
        changes.push(InventoryChange::Delete {
            inventory_id,
            resource_class,
        });
    }

    Ok(ReconciliationPlan { changes })
}
