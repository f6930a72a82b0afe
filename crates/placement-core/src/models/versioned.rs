//! Versioned wire forms of a resource provider.
//!
//! Each version is its own struct. Downgrades are explicit, one step at a
//! time, so adding a version forces every transition to be written out.
//!
//! - 1.0: id, uuid
//! - 1.1: adds name
//! - 1.2: adds aggregates and resources

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{PlacementError, PlacementResult};
use crate::models::aggregate::Aggregate;
use crate::models::resource_provider::{ResourceProvider, ResourceUsage};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderVersion {
    V1_0,
    V1_1,
    V1_2,
}

impl ProviderVersion {
    pub const CURRENT: ProviderVersion = ProviderVersion::V1_2;

    pub fn as_str(self) -> &'static str {
        match self {
            ProviderVersion::V1_0 => "1.0",
            ProviderVersion::V1_1 => "1.1",
            ProviderVersion::V1_2 => "1.2",
        }
    }
}

impl fmt::Display for ProviderVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderVersion {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1.0" => Ok(ProviderVersion::V1_0),
            "1.1" => Ok(ProviderVersion::V1_1),
            "1.2" => Ok(ProviderVersion::V1_2),
            other => Err(PlacementError::validation(format!(
                "unsupported resource provider version: {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProviderV1_0 {
    pub id: Option<i64>,
    pub uuid: Uuid,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProviderV1_1 {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: Option<String>,
}

impl ResourceProviderV1_1 {
    pub fn downgrade(self) -> ResourceProviderV1_0 {
        ResourceProviderV1_0 {
            id: self.id,
            uuid: self.uuid,
        }
    }
}

/// Unloaded attributes are omitted rather than sent empty.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceProviderV1_2 {
    pub id: Option<i64>,
    pub uuid: Uuid,
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub aggregates: Option<Vec<Aggregate>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resources: Option<Vec<ResourceUsage>>,
}

impl ResourceProviderV1_2 {
    pub fn downgrade(self) -> ResourceProviderV1_1 {
        ResourceProviderV1_1 {
            id: self.id,
            uuid: self.uuid,
            name: self.name,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "version")]
pub enum ResourceProviderPrimitive {
    #[serde(rename = "1.0")]
    V1_0(ResourceProviderV1_0),
    #[serde(rename = "1.1")]
    V1_1(ResourceProviderV1_1),
    #[serde(rename = "1.2")]
    V1_2(ResourceProviderV1_2),
}

impl ResourceProviderPrimitive {
    pub fn version(&self) -> ProviderVersion {
        match self {
            ResourceProviderPrimitive::V1_0(_) => ProviderVersion::V1_0,
            ResourceProviderPrimitive::V1_1(_) => ProviderVersion::V1_1,
            ResourceProviderPrimitive::V1_2(_) => ProviderVersion::V1_2,
        }
    }

    /// Steps down until `target` is reached. Upgrades are not possible.
    pub fn downgrade_to(self, target: ProviderVersion) -> PlacementResult<Self> {
        let mut current = self;
        loop {
            if current.version() == target {
                return Ok(current);
            }
            current = match current {
                ResourceProviderPrimitive::V1_2(v) => ResourceProviderPrimitive::V1_1(v.downgrade()),
                ResourceProviderPrimitive::V1_1(v) => ResourceProviderPrimitive::V1_0(v.downgrade()),
                ResourceProviderPrimitive::V1_0(_) => {
                    return Err(PlacementError::validation(format!(
                        "cannot upgrade resource provider primitive to {target}"
                    )));
                }
            };
        }
    }

    pub fn to_json(&self) -> PlacementResult<serde_json::Value> {
        serde_json::to_value(self).map_err(|e| PlacementError::Internal(e.to_string()))
    }
}

impl ResourceProvider {
    /// Wire form of this provider at `target`.
    pub fn to_primitive(&self, target: ProviderVersion) -> PlacementResult<ResourceProviderPrimitive> {
        let uuid = self.uuid().ok_or_else(|| PlacementError::MissingIdentifier {
            entity: "resource_provider".into(),
        })?;
        let current = ResourceProviderPrimitive::V1_2(ResourceProviderV1_2 {
            id: self.id(),
            uuid,
            name: self.name().map(str::to_owned),
            aggregates: self.aggregates().map(<[Aggregate]>::to_vec),
            resources: self.resources().map(<[ResourceUsage]>::to_vec),
        });
        current.downgrade_to(target)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_1_0_has_no_name() {
        let provider = ResourceProvider::new(Uuid::new_v4()).with_name("compute-1");
        let primitive = provider.to_primitive(ProviderVersion::V1_0).unwrap();
        let json = primitive.to_json().unwrap();
        assert_eq!(json["version"], "1.0");
        assert!(json.get("name").is_none());
        assert!(json.get("uuid").is_some());
    }

    #[test]
    fn version_1_1_has_no_collections() {
        let mut provider = ResourceProvider::new(Uuid::new_v4()).with_name("compute-1");
        provider.set_loaded_aggregates(Vec::new());
        provider.set_loaded_resources(Vec::new());

        let current = provider.to_primitive(ProviderVersion::CURRENT).unwrap().to_json().unwrap();
        assert!(current.get("aggregates").is_some());
        assert!(current.get("resources").is_some());

        let json = provider.to_primitive(ProviderVersion::V1_1).unwrap().to_json().unwrap();
        assert_eq!(json["name"], "compute-1");
        assert!(json.get("aggregates").is_none());
        assert!(json.get("resources").is_none());
    }

    #[test]
    fn upgrade_is_rejected() {
        let primitive = ResourceProviderPrimitive::V1_0(ResourceProviderV1_0 {
            id: Some(1),
            uuid: Uuid::new_v4(),
        });
        assert!(primitive.downgrade_to(ProviderVersion::V1_1).is_err());
    }

    #[test]
    fn parses_version_strings() {
        assert_eq!("1.1".parse::<ProviderVersion>().unwrap(), ProviderVersion::V1_1);
        assert!("2.0".parse::<ProviderVersion>().is_err());
    }
}
