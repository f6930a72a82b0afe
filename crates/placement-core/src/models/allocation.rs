//! Allocation domain model.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlacementError, PlacementResult};
use crate::models::provider_ref::{HasResourceProvider, ProviderKey};
use crate::models::resource_class::ResourceClass;
use crate::models::resource_provider::ResourceProvider;

/// A consumer's claim of `used` units of one resource class.
///
/// Allocations are created and destroyed, never updated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Allocation {
    id: Option<i64>,
    resource_provider: Option<ProviderKey>,
    resource_class: Option<ResourceClass>,
    pub consumer_id: Option<Uuid>,
    pub used: u64,
}

impl Allocation {
    pub fn new(
        resource_provider: &ResourceProvider,
        resource_class: ResourceClass,
        consumer_id: Uuid,
        used: u64,
    ) -> Self {
        Self {
            id: None,
            resource_provider: Some(resource_provider.key()),
            resource_class: Some(resource_class),
            consumer_id: Some(consumer_id),
            used,
        }
    }

    /// An allocation not yet bound to a provider or class.
    pub fn detached(consumer_id: Option<Uuid>, used: u64) -> Self {
        Self {
            id: None,
            resource_provider: None,
            resource_class: None,
            consumer_id,
            used,
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

    pub fn from_storage(
        id: i64,
        resource_provider: ProviderKey,
        resource_class: ResourceClass,
        consumer_id: Uuid,
        used: u64,
    ) -> Self {
        Self {
            id: Some(id),
            resource_provider: Some(resource_provider),
            resource_class: Some(resource_class),
            consumer_id: Some(consumer_id),
            used,
        }
    }

    pub fn id(&self) -> Option<i64> {
        self.id
    }

    pub fn is_created(&self) -> bool {
        self.id.is_some()
    }

    pub fn mark_created(&mut self, id: i64) {
        self.id = Some(id);
    }

    /// Checks everything a create needs besides the stored provider row.
    pub fn validate_for_create(&self) -> PlacementResult<(i64, u32, Uuid)> {
        if self.is_created() {
            return Err(PlacementError::AlreadyCreated {
                entity: Self::ENTITY.into(),
            });
        }
        let (provider_id, class_id) = self.storage_key()?;
        let consumer_id = self
            .consumer_id
            .ok_or_else(|| PlacementError::MissingIdentifier {
                entity: Self::ENTITY.into(),
            })?;
        if self.used == 0 {
            return Err(PlacementError::validation("allocation used must be positive"));
        }
        if i64::try_from(self.used).is_err() {
            return Err(PlacementError::validation(format!(
                "allocation used {} is out of range",
                self.used
            )));
        }
        Ok((provider_id, class_id, consumer_id))
    }
}

impl HasResourceProvider for Allocation {
    const ENTITY: &'static str = "allocation";

    fn resource_provider(&self) -> Option<&ProviderKey> {
        self.resource_provider.as_ref()
    }

    fn resource_class(&self) -> Option<ResourceClass> {
        self.resource_class
    }
}
