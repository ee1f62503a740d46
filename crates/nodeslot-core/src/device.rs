//! Accelerator devices attached to the node.

use std::fmt;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceKind {
    Gpu,
    Mic,
    Other,
}

/// A PCI accelerator as reported by device enumeration.
///
/// Carried on the topology for reporting; placement never looks at it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PciDevice {
    pub name: String,
    /// Enumeration index assigned by the vendor library.
    pub id: u32,
    #[serde(default)]
    pub bus_id: Option<String>,
    /// Logical index of the NUMA chip this device is local to, if any.
    #[serde(default)]
    pub nearest_chip: Option<u32>,
    pub kind: DeviceKind,
}

impl fmt::Display for PciDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.name, self.id)?;
        if let Some(bus_id) = &self.bus_id {
            write!(f, " ({bus_id})")?;
        }
        Ok(())
    }
}
