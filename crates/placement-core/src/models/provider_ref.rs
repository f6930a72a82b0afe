//! The (resource provider, resource class) reference shared by
//! inventories and allocations.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlacementError, PlacementResult};
use crate::models::resource_class::ResourceClass;

/// Identity of the resource provider a record belongs to.
///
/// `id` is only set once the provider has been persisted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderKey {
    pub id: Option<i64>,
    pub uuid: Option<Uuid>,
}

impl ProviderKey {
    pub fn stored(id: i64, uuid: Uuid) -> Self {
        Self {
            id: Some(id),
            uuid: Some(uuid),
        }
    }
}

/// Records that are scoped to one provider and one resource class.
pub trait HasResourceProvider {
    /// Entity name used in error messages.
    const ENTITY: &'static str;

    fn resource_provider(&self) -> Option<&ProviderKey>;

    fn resource_class(&self) -> Option<ResourceClass>;

    /// Encodes the reference pair into its storage form: the provider's
    /// numeric key and the class index.
    fn storage_key(&self) -> PlacementResult<(i64, u32)> {
        let provider_id = self
            .resource_provider()
            .and_then(|provider| provider.id)
            .ok_or_else(|| PlacementError::MissingProvider {
                entity: Self::ENTITY.into(),
            })?;
        let resource_class = self
            .resource_class()
            .ok_or_else(|| PlacementError::MissingResourceClass {
                entity: Self::ENTITY.into(),
            })?;
        Ok((provider_id, resource_class.index()))
    }
}

/// Decodes a stored reference pair.
pub fn decode_storage_key(
    provider_id: i64,
    provider_uuid: Uuid,
    resource_class_id: u32,
) -> PlacementResult<(ProviderKey, ResourceClass)> {
    Ok((
        ProviderKey::stored(provider_id, provider_uuid),
        ResourceClass::from_index(resource_class_id)?,
    ))
}
