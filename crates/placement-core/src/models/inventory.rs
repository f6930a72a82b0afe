//! Inventory domain model.

use serde::{Deserialize, Serialize};

use crate::error::{PlacementError, PlacementResult};
use crate::models::provider_ref::{HasResourceProvider, ProviderKey};
use crate::models::resource_class::ResourceClass;
use crate::models::resource_provider::ResourceProvider;

/// Capacity parameters of one (provider, resource class) pair.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct InventoryParams {
    pub total: u64,
    pub reserved: u64,
    pub min_unit: u64,
    pub max_unit: u64,
    pub step_size: u64,
    pub allocation_ratio: f64,
}

impl InventoryParams {
    /// Unreserved capacity of `total` units, allocatable one unit at a time.
    pub fn new(total: u64) -> Self {
        Self {
            total,
            reserved: 0,
            min_unit: 1,
            max_unit: total,
            step_size: 1,
            allocation_ratio: 1.0,
        }
    }

    /// `(total - reserved) * allocation_ratio`.
    pub fn capacity(&self) -> f64 {
        (self.total as f64 - self.reserved as f64) * self.allocation_ratio
    }

    pub fn admits(&self, used: u64) -> bool {
        used as f64 <= self.capacity()
    }

    pub fn validate(&self) -> PlacementResult<()> {
        if !self.allocation_ratio.is_finite() || self.allocation_ratio < 0.0 {
            return Err(PlacementError::validation(format!(
                "allocation_ratio must be a non-negative number, got {}",
                self.allocation_ratio
            )));
        }
        Ok(())
    }

    /// Fields whose value differs between `self` and `other`.
    pub fn diff(&self, other: &InventoryParams) -> Vec<InventoryField> {
        let mut fields = Vec::new();
        if self.total != other.total {
            fields.push(InventoryField::Total);
        }
        if self.reserved != other.reserved {
            fields.push(InventoryField::Reserved);
        }
        if self.min_unit != other.min_unit {
            fields.push(InventoryField::MinUnit);
        }
        if self.max_unit != other.max_unit {
            fields.push(InventoryField::MaxUnit);
        }
        if self.step_size != other.step_size {
            fields.push(InventoryField::StepSize);
        }
        if self.allocation_ratio != other.allocation_ratio {
            fields.push(InventoryField::AllocationRatio);
        }
        fields
    }
}

/// A mutable inventory column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InventoryField {
    Total,
    Reserved,
    MinUnit,
    MaxUnit,
    StepSize,
    AllocationRatio,
}

impl InventoryField {
    pub const ALL: [InventoryField; 6] = [
        InventoryField::Total,
        InventoryField::Reserved,
        InventoryField::MinUnit,
        InventoryField::MaxUnit,
        InventoryField::StepSize,
        InventoryField::AllocationRatio,
    ];

    pub fn column(self) -> &'static str {
        match self {
            InventoryField::Total => "total",
            InventoryField::Reserved => "reserved",
            InventoryField::MinUnit => "min_unit",
            InventoryField::MaxUnit => "max_unit",
            InventoryField::StepSize => "step_size",
            InventoryField::AllocationRatio => "allocation_ratio",
        }
    }

    /// Whether a change to this field can alter effective capacity.
    pub fn affects_capacity(self) -> bool {
        matches!(
            self,
            InventoryField::Total | InventoryField::Reserved | InventoryField::AllocationRatio
        )
    }
}

/// Declared capacity of one resource class on one resource provider.
#[derive(Debug, Clone, PartialEq)]
pub struct Inventory {
    id: Option<i64>,
    resource_provider: Option<ProviderKey>,
    resource_class: Option<ResourceClass>,
    pub params: InventoryParams,
    persisted: Option<InventoryParams>,
}

impl Inventory {
    pub fn new(
        resource_provider: &ResourceProvider,
        resource_class: ResourceClass,
        params: InventoryParams,
    ) -> Self {
        Self {
            id: None,
            resource_provider: Some(resource_provider.key()),
            resource_class: Some(resource_class),
            params,
            persisted: None,
        }
    }

    /// An inventory not yet bound to a provider or class.
    pub fn detached(params: InventoryParams) -> Self {
        Self {
            id: None,
            resource_provider: None,
            resource_class: None,
            params,
            persisted: None,
        }
    }

    pub fn with_provider(mut self, resource_provider: ProviderKey) -> Self {
        self.resource_provider = Some(resource_provider);
        self
    }

    pub fn with_resource_class(mut self, resource_class: ResourceClass) -> Self {
        self.resource_class = Some(resource_class);
        self
    }

    /// Rebuilds an inventory from a stored row.
    pub fn from_storage(
        id: i64,
        resource_provider: ProviderKey,
        resource_class: ResourceClass,
        params: InventoryParams,
    ) -> Self {
        Self {
            id: Some(id),
            resource_provider: Some(resource_provider),
            resource_class: Some(resource_class),
            params,
            persisted: Some(params),
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    /// Fields changed since the last load or write. Every field counts as
    /// changed for an inventory that was never persisted.
    pub fn changed_fields(&self) -> Vec<InventoryField> {
        match &self.persisted {
            Some(persisted) => self.params.diff(persisted),
            None => InventoryField::ALL.to_vec(),
        }
    }

    /// Parameters as last persisted.
    pub fn persisted_params(&self) -> Option<&InventoryParams> {
        self.persisted.as_ref()
    }

    pub fn mark_created(&mut self, id: i64) {
        self.id = Some(id);
        self.persisted = Some(self.params);
    }

    pub fn mark_saved(&mut self) {
        self.persisted = Some(self.params);
    }
}

impl HasResourceProvider for Inventory {
    const ENTITY: &'static str = "inventory";

    fn resource_provider(&self) -> Option<&ProviderKey> {
        self.resource_provider.as_ref()
    }

    fn resource_class(&self) -> Option<ResourceClass> {
        self.resource_class
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn disk() -> InventoryParams {
        InventoryParams {
            total: 200,
            reserved: 10,
            min_unit: 2,
            max_unit: 5,
            step_size: 1,
            allocation_ratio: 1.0,
        }
    }

    #[test]
    fn capacity_applies_reservation_and_ratio() {
        let mut params = disk();
        assert_eq!(params.capacity(), 190.0);
        params.allocation_ratio = 1.5;
        assert_eq!(params.capacity(), 285.0);
        assert!(params.admits(285));
        assert!(!params.admits(286));
    }

    #[test]
    fn negative_ratio_is_invalid() {
        let mut params = disk();
        params.allocation_ratio = -0.5;
        assert!(matches!(
            params.validate(),
            Err(PlacementError::Validation { .. })
        ));
        params.allocation_ratio = f64::NAN;
        assert!(params.validate().is_err());
    }

    #[test]
    fn changed_fields_track_edits_after_load() {
        let key = ProviderKey::stored(1, uuid::Uuid::new_v4());
        let mut inventory = Inventory::from_storage(7, key, ResourceClass::DiskGb, disk());
        assert!(inventory.changed_fields().is_empty());

        inventory.params.total = 32;
        inventory.params.allocation_ratio = 2.0;
        assert_eq!(
            inventory.changed_fields(),
            vec![InventoryField::Total, InventoryField::AllocationRatio]
        );

        inventory.mark_saved();
        assert!(inventory.changed_fields().is_empty());
    }

    #[test]
    fn missing_references_are_reported() {
        let inventory = Inventory::detached(disk());
        assert!(matches!(
            inventory.storage_key(),
            Err(PlacementError::MissingProvider { .. })
        ));

        let inventory = Inventory::detached(disk()).with_provider(ProviderKey::stored(3, uuid::Uuid::new_v4()));
        assert!(matches!(
            inventory.storage_key(),
            Err(PlacementError::MissingResourceClass { .. })
        ));
    }
}
