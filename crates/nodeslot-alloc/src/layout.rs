//! Vendor layout classification.
//!
//! Vendors disagree on whether the NUMA node sits above the socket in the
//! topology or below it. The order is read once from the depth of the first
//! object of each kind and decides how sockets and chips get linked.

use nodeslot_core::{ObjectKind, TopologyObject};

use crate::error::{TopologyError, TopologyResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HardwareLayout {
    /// No NUMA nodes; one synthetic chip holds every core.
    NonNuma,
    /// NUMA node above the socket; sockets sit below chips.
    ChipAboveSocket,
    /// Socket above the NUMA node; chips sit below sockets.
    SocketAboveChip,
}

pub fn classify_layout(root: &TopologyObject) -> TopologyResult<HardwareLayout> {
    let Some(node_depth) = root.depth_of(ObjectKind::NumaNode) else {
        return Ok(HardwareLayout::NonNuma);
    };

    let Some(socket_depth) = root.depth_of(ObjectKind::Socket) else {
        return Err(TopologyError::UnrecognizedLayout(
            "NUMA nodes present but no socket object".to_string(),
        ));
    };

    match socket_depth.cmp(&node_depth) {
        std::cmp::Ordering::Less => Ok(HardwareLayout::SocketAboveChip),
        std::cmp::Ordering::Greater => Ok(HardwareLayout::ChipAboveSocket),
        std::cmp::Ordering::Equal => Err(TopologyError::UnrecognizedLayout(format!(
            "socket and NUMA node both at depth {socket_depth}"
        ))),
    }
}
