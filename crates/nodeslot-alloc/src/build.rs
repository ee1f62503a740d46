//! Building the owned topology tree from discovery facts.

use std::collections::{HashMap, HashSet};

use nodeslot_core::{ObjectKind, PciDevice, TopologyFacts, TopologyObject};
use tracing::{debug, info};

use crate::chip::Chip;
use crate::cores::Core;
use crate::discovery::{AcceleratorDiscovery, discover_or_empty};
use crate::error::{TopologyError, TopologyResult};
use crate::layout::{HardwareLayout, classify_layout};
use crate::machine::Machine;
use crate::socket::Socket;

impl Machine {
    /// Build a machine from discovered topology facts.
    ///
    /// Only counts, memory sizes, ids, allowed-set strings and processing
    /// unit indices are copied out; nothing borrowed from `facts` survives.
    pub fn from_facts(
        facts: &TopologyFacts,
        discovery: &dyn AcceleratorDiscovery,
    ) -> TopologyResult<Machine> {
        let root = &facts.root;
        if root.kind != ObjectKind::Machine {
            return Err(TopologyError::SystemTopologyMissing(
                "root object is not a machine".to_string(),
            ));
        }

        let layout = classify_layout(root)?;
        let devices = discover_or_empty(discovery);

        let sockets = match layout {
            HardwareLayout::NonNuma => vec![non_numa_socket(root, &devices)?],
            HardwareLayout::SocketAboveChip => root
                .descendants(ObjectKind::Socket)
                .into_iter()
                .map(|socket| socket_above_chips(socket, &devices))
                .collect(),
            HardwareLayout::ChipAboveSocket => sockets_below_chips(root, &devices)?,
        };

        // Totals come from the tree as built so they always bound the
        // available counters summed over the same tree.
        let mut machine = Machine::empty();
        machine.is_numa = layout != HardwareLayout::NonNuma;
        machine.allowed_cpuset = root.allowed_cpuset.clone();
        machine.allowed_nodeset = root.allowed_nodeset.clone();
        for socket in sockets {
            machine.add_socket(socket);
        }
        machine.devices = devices;

        info!(
            ?layout,
            sockets = machine.total_sockets,
            chips = machine.total_chips,
            cores = machine.total_cores,
            threads = machine.total_threads,
            memory_kb = machine.total_memory_kb,
            "machine topology initialized"
        );
        Ok(machine)
    }
}

fn build_core(core: &TopologyObject) -> Core {
    Core::new(core.logical_index, core.pu_indices())
}

fn attach_devices(chip: &mut Chip, devices: &[PciDevice]) {
    let id = chip.id();
    for device in devices.iter().filter(|d| d.nearest_chip == Some(id)) {
        chip.add_device(device.clone());
    }
}

/// One socket with one synthetic chip holding every core on the machine.
fn non_numa_socket(root: &TopologyObject, devices: &[PciDevice]) -> TopologyResult<Socket> {
    let Some(first) = root.descendants(ObjectKind::Socket).into_iter().next() else {
        return Err(TopologyError::SystemTopologyMissing(
            "no socket found on non-NUMA machine".to_string(),
        ));
    };

    let mut chip = Chip::new(0, root.total_memory_kb);
    chip.set_allowed_sets(&root.allowed_cpuset, &root.allowed_nodeset);
    for core in root.descendants(ObjectKind::Core) {
        chip.add_core(build_core(core));
    }
    // Without NUMA nodes every device is local to the one chip.
    for device in devices {
        chip.add_device(device.clone());
    }

    let mut socket = Socket::new(first.logical_index);
    socket.add_chip(chip);
    Ok(socket)
}

fn chip_from_node(node: &TopologyObject, memory_kb: u64) -> Chip {
    let mut chip = Chip::new(node.logical_index, memory_kb);
    chip.set_allowed_sets(&node.allowed_cpuset, &node.allowed_nodeset);
    chip
}

/// Socket owning the NUMA nodes in its subtree.
fn socket_above_chips(socket_obj: &TopologyObject, devices: &[PciDevice]) -> Socket {
    let mut socket = Socket::new(socket_obj.logical_index);
    for node in socket_obj.descendants(ObjectKind::NumaNode) {
        let mut chip = chip_from_node(node, node.local_memory_kb);
        for core in node.descendants(ObjectKind::Core) {
            chip.add_core(build_core(core));
        }
        attach_devices(&mut chip, devices);
        debug!(
            socket = socket.id(),
            chip = chip.id(),
            cores = chip.total_cores(),
            "chip initialized"
        );
        socket.add_chip(chip);
    }
    socket
}

/// Sockets sitting below NUMA nodes: each socket gets one chip built from
/// its nearest NUMA ancestor, restricted to the socket's own cores.
fn sockets_below_chips(
    root: &TopologyObject,
    devices: &[PciDevice],
) -> TopologyResult<Vec<Socket>> {
    let socket_objs = root.descendants(ObjectKind::Socket);

    let mut owners: Vec<(&TopologyObject, &TopologyObject)> = Vec::with_capacity(socket_objs.len());
    for socket_obj in socket_objs {
        let node = root
            .path_to(socket_obj)
            .and_then(|path| path.into_iter().rev().find(|o| o.kind == ObjectKind::NumaNode))
            .ok_or_else(|| {
                TopologyError::SystemTopologyMissing(format!(
                    "socket {} has no NUMA node above it",
                    socket_obj.logical_index
                ))
            })?;
        owners.push((socket_obj, node));
    }

    // Sockets sharing a NUMA node split its memory; the first gets the remainder.
    let mut sharing: HashMap<u32, u64> = HashMap::new();
    for (_, node) in &owners {
        *sharing.entry(node.logical_index).or_insert(0) += 1;
    }
    let mut seen: HashSet<u32> = HashSet::new();

    let mut sockets = Vec::with_capacity(owners.len());
    for (socket_obj, node) in owners {
        let share_count = sharing.get(&node.logical_index).copied().unwrap_or(1).max(1);
        let first = seen.insert(node.logical_index);
        let mut memory_kb = node.local_memory_kb / share_count;
        if first {
            memory_kb += node.local_memory_kb % share_count;
        }

        let mut chip = chip_from_node(node, memory_kb);
        if !socket_obj.allowed_cpuset.is_empty() {
            chip.set_allowed_sets(&socket_obj.allowed_cpuset, &node.allowed_nodeset);
        }
        for core in socket_obj.descendants(ObjectKind::Core) {
            chip.add_core(build_core(core));
        }
        if first {
            attach_devices(&mut chip, devices);
        }

        let mut socket = Socket::new(socket_obj.logical_index);
        socket.add_chip(chip);
        sockets.push(socket);
    }
    Ok(sockets)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::discovery::{NoAccelerators, StaticAccelerators};
    use nodeslot_core::DeviceKind;

    fn core(index: u32, pus: &[u32]) -> TopologyObject {
        TopologyObject::new(ObjectKind::Core, index).with_children(
            pus.iter()
                .map(|&pu| TopologyObject::new(ObjectKind::Pu, pu))
                .collect(),
        )
    }

    fn node(index: u32, memory_kb: u64, children: Vec<TopologyObject>) -> TopologyObject {
        let mut obj = TopologyObject::new(ObjectKind::NumaNode, index).with_children(children);
        obj.local_memory_kb = memory_kb;
        obj
    }

    fn machine_obj(memory_kb: u64, children: Vec<TopologyObject>) -> TopologyObject {
        let mut obj = TopologyObject::new(ObjectKind::Machine, 0).with_children(children);
        obj.total_memory_kb = memory_kb;
        obj.allowed_cpuset = "0-7".to_string();
        obj.allowed_nodeset = "0-1".to_string();
        obj
    }

    fn facts(root: TopologyObject) -> TopologyFacts {
        TopologyFacts {
            root,
            accelerators: Vec::new(),
        }
    }

    /// 2 sockets, each with one NUMA node of 2 cores × 2 threads.
    fn socket_above_chip_facts() -> TopologyFacts {
        let sockets = (0..2)
            .map(|s| {
                TopologyObject::new(ObjectKind::Socket, s).with_children(vec![node(
                    s,
                    4096,
                    vec![core(s * 2, &[s * 2, s * 2 + 4]), core(s * 2 + 1, &[s * 2 + 1, s * 2 + 5])],
                )])
            })
            .collect();
        facts(machine_obj(8192, sockets))
    }

    fn gpu(chip: u32) -> PciDevice {
        PciDevice {
            name: "gpu".to_string(),
            id: chip,
            bus_id: Some(format!("0000:{chip:02x}:00.0")),
            nearest_chip: Some(chip),
            kind: DeviceKind::Gpu,
        }
    }

    #[test]
    fn builds_socket_above_chip() {
        let m = Machine::from_facts(&socket_above_chip_facts(), &NoAccelerators).unwrap();

        assert!(m.is_numa());
        assert_eq!(m.total_sockets(), 2);
        assert_eq!(m.total_chips(), 2);
        assert_eq!(m.total_cores(), 4);
        assert_eq!(m.total_threads(), 8);
        assert_eq!(m.total_memory(), 8192);
        assert_eq!(m.allowed_cpuset(), "0-7");
        assert_eq!(m.available_threads(), 8);

        let chip = &m.sockets()[1].chips()[0];
        assert_eq!(chip.id(), 1);
        assert_eq!(chip.memory(), 4096);
        assert_eq!(chip.cores()[0].indices(), &[2, 6]);
    }

    #[test]
    fn builds_chip_above_socket() {
        let root = machine_obj(
            8192,
            vec![
                node(0, 4096, vec![TopologyObject::new(ObjectKind::Socket, 0)
                    .with_children(vec![core(0, &[0, 2]), core(1, &[1, 3])])]),
                node(1, 4096, vec![TopologyObject::new(ObjectKind::Socket, 1)
                    .with_children(vec![core(2, &[4, 6]), core(3, &[5, 7])])]),
            ],
        );
        let m = Machine::from_facts(&facts(root), &NoAccelerators).unwrap();

        assert_eq!(m.total_sockets(), 2);
        assert_eq!(m.sockets()[0].chips().len(), 1);
        assert_eq!(m.sockets()[1].chips()[0].id(), 1);
        assert_eq!(m.sockets()[1].chips()[0].total_cores(), 2);
        assert_eq!(m.available_memory(), 8192);
    }

    #[test]
    fn sockets_sharing_a_node_split_its_memory() {
        let root = machine_obj(
            1001,
            vec![node(
                0,
                1001,
                vec![
                    TopologyObject::new(ObjectKind::Socket, 0).with_children(vec![core(0, &[0])]),
                    TopologyObject::new(ObjectKind::Socket, 1).with_children(vec![core(1, &[1])]),
                ],
            )],
        );
        let m = Machine::from_facts(&facts(root), &NoAccelerators).unwrap();

        assert_eq!(m.sockets()[0].memory(), 501);
        assert_eq!(m.sockets()[1].memory(), 500);
        assert_eq!(m.available_memory(), 1001);
    }

    #[test]
    fn shared_node_counts_one_chip_per_socket() {
        let root = machine_obj(
            1000,
            vec![node(
                0,
                1000,
                vec![
                    TopologyObject::new(ObjectKind::Socket, 0).with_children(vec![core(0, &[0])]),
                    TopologyObject::new(ObjectKind::Socket, 1).with_children(vec![core(1, &[1])]),
                ],
            )],
        );
        let m = Machine::from_facts(&facts(root), &NoAccelerators).unwrap();

        assert_eq!(m.total_sockets(), 2);
        assert_eq!(m.total_chips(), 2);
        assert_eq!(m.available_chips(), m.total_chips());
        assert_eq!(m.available_sockets(), m.total_sockets());
        assert_eq!(m.total_memory(), 1000);
    }

    #[test]
    fn builds_non_numa() {
        let root = machine_obj(
            2048,
            vec![
                TopologyObject::new(ObjectKind::Socket, 0).with_children(vec![core(0, &[0]), core(1, &[1])]),
                TopologyObject::new(ObjectKind::Socket, 1).with_children(vec![core(2, &[2])]),
            ],
        );
        let mut f = facts(root);
        f.accelerators = vec![gpu(0)];
        let discovery = StaticAccelerators::new(f.accelerators.clone());
        let m = Machine::from_facts(&f, &discovery).unwrap();

        assert!(!m.is_numa());
        assert_eq!(m.total_sockets(), 1);
        assert_eq!(m.total_chips(), 1);
        assert_eq!(m.sockets().len(), 1);
        let chip = &m.sockets()[0].chips()[0];
        assert_eq!(chip.total_cores(), 3);
        assert!(!chip.is_threaded());
        assert_eq!(chip.memory(), 2048);
        assert_eq!(chip.cpuset(), "0-7");
        assert_eq!(chip.nodeset(), "0-1");
        assert_eq!(chip.devices().len(), 1);
        assert_eq!(m.devices().len(), 1);
    }

    #[test]
    fn devices_attach_to_local_chip() {
        let f = socket_above_chip_facts();
        let discovery = StaticAccelerators::new(vec![gpu(1)]);
        let m = Machine::from_facts(&f, &discovery).unwrap();

        assert!(m.sockets()[0].chips()[0].devices().is_empty());
        assert_eq!(m.sockets()[1].chips()[0].devices().len(), 1);
        assert_eq!(m.devices().len(), 1);
        assert!(m.to_string().contains("gpu 1 (0000:01:00.0)"));
    }

    #[test]
    fn root_must_be_machine() {
        let root = TopologyObject::new(ObjectKind::Socket, 0);
        assert!(matches!(
            Machine::from_facts(&facts(root), &NoAccelerators),
            Err(TopologyError::SystemTopologyMissing(_))
        ));
    }

    #[test]
    fn non_numa_without_socket_fails() {
        let root = machine_obj(1024, vec![core(0, &[0])]);
        assert!(matches!(
            Machine::from_facts(&facts(root), &NoAccelerators),
            Err(TopologyError::SystemTopologyMissing(_))
        ));
    }

    #[test]
    fn ambiguous_layout_fails() {
        let root = machine_obj(
            1024,
            vec![node(0, 1024, vec![]), TopologyObject::new(ObjectKind::Socket, 0)],
        );
        assert!(matches!(
            Machine::from_facts(&facts(root), &NoAccelerators),
            Err(TopologyError::UnrecognizedLayout(_))
        ));
    }
}
