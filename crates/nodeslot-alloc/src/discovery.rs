//! Accelerator discovery strategies.
//!
//! Device enumeration is vendor glue that lives outside the allocator. The
//! machine builder asks whichever strategy it was handed for the device list
//! once, and a failing strategy only costs us the devices.

use nodeslot_core::PciDevice;
use nodeslot_core::config::AcceleratorBackend;
use tracing::{info, warn};

use crate::error::TopologyResult;

pub trait AcceleratorDiscovery {
    fn name(&self) -> &'static str;

    fn discover(&self) -> TopologyResult<Vec<PciDevice>>;
}

/// Reports no devices.
pub struct NoAccelerators;

impl AcceleratorDiscovery for NoAccelerators {
    fn name(&self) -> &'static str {
        "none"
    }

    fn discover(&self) -> TopologyResult<Vec<PciDevice>> {
        Ok(Vec::new())
    }
}

/// Devices known ahead of time, e.g. listed next to the topology facts.
pub struct StaticAccelerators {
    devices: Vec<PciDevice>,
}

impl StaticAccelerators {
    pub fn new(devices: Vec<PciDevice>) -> Self {
        Self { devices }
    }
}

impl AcceleratorDiscovery for StaticAccelerators {
    fn name(&self) -> &'static str {
        "static"
    }

    fn discover(&self) -> TopologyResult<Vec<PciDevice>> {
        Ok(self.devices.clone())
    }
}

/// Pick the strategy named by the configured backend.
pub fn for_backend(
    backend: AcceleratorBackend,
    listed: &[PciDevice],
) -> Box<dyn AcceleratorDiscovery> {
    match backend {
        AcceleratorBackend::None => Box::new(NoAccelerators),
        AcceleratorBackend::Static => Box::new(StaticAccelerators::new(listed.to_vec())),
    }
}

/// Run discovery, degrading any failure to an empty device list.
pub fn discover_or_empty(discovery: &dyn AcceleratorDiscovery) -> Vec<PciDevice> {
    match discovery.discover() {
        Ok(devices) => {
            info!(backend = discovery.name(), count = devices.len(), "accelerators discovered");
            devices
        }
        Err(e) => {
            warn!(backend = discovery.name(), error = %e, "accelerator discovery failed, continuing without devices");
            Vec::new()
        }
    }
}
