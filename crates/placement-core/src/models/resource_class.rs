//! Resource class registry.
//!
//! Classes are persisted by index, so the position of a released class in
//! [`ResourceClass::ALL`] must never change. New classes are appended.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::PlacementError;

/// A named kind of consumable capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum ResourceClass {
    Vcpu,
    MemoryMb,
    DiskGb,
    PciDevice,
    SriovNetVf,
    NumaSocket,
    NumaCore,
    NumaThread,
    NumaMemoryMb,
    Ipv4Address,
}

impl ResourceClass {
    /// Every class, in index order.
    pub const ALL: [ResourceClass; 10] = [
        ResourceClass::Vcpu,
        ResourceClass::MemoryMb,
        ResourceClass::DiskGb,
        ResourceClass::PciDevice,
        ResourceClass::SriovNetVf,
        ResourceClass::NumaSocket,
        ResourceClass::NumaCore,
        ResourceClass::NumaThread,
        ResourceClass::NumaMemoryMb,
        ResourceClass::Ipv4Address,
    ];

    /// Stable storage code.
    pub fn index(self) -> u32 {
        match self {
            ResourceClass::Vcpu => 0,
            ResourceClass::MemoryMb => 1,
            ResourceClass::DiskGb => 2,
            ResourceClass::PciDevice => 3,
            ResourceClass::SriovNetVf => 4,
            ResourceClass::NumaSocket => 5,
            ResourceClass::NumaCore => 6,
            ResourceClass::NumaThread => 7,
            ResourceClass::NumaMemoryMb => 8,
            ResourceClass::Ipv4Address => 9,
        }
    }

    pub fn from_index(index: u32) -> Result<Self, PlacementError> {
        Self::ALL
            .get(index as usize)
            .copied()
            .ok_or_else(|| PlacementError::validation(format!("unknown resource class index {index}")))
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ResourceClass::Vcpu => "VCPU",
            ResourceClass::MemoryMb => "MEMORY_MB",
            ResourceClass::DiskGb => "DISK_GB",
            ResourceClass::PciDevice => "PCI_DEVICE",
            ResourceClass::SriovNetVf => "SRIOV_NET_VF",
            ResourceClass::NumaSocket => "NUMA_SOCKET",
            ResourceClass::NumaCore => "NUMA_CORE",
            ResourceClass::NumaThread => "NUMA_THREAD",
            ResourceClass::NumaMemoryMb => "NUMA_MEMORY_MB",
            ResourceClass::Ipv4Address => "IPV4_ADDRESS",
        }
    }
}

impl fmt::Display for ResourceClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ResourceClass {
    type Err = PlacementError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|class| class.as_str() == s)
            .ok_or_else(|| PlacementError::validation(format!("unknown resource class: {s}")))
    }
}

impl TryFrom<String> for ResourceClass {
    type Error = PlacementError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ResourceClass> for String {
    fn from(class: ResourceClass) -> Self {
        class.as_str().to_owned()
    }
}
