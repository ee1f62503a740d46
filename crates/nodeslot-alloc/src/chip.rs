//! NUMA chips — the level where memory and exclusivity are tracked.
//!
//! A chip owns its cores and the allocations of every job currently using
//! it. Core and thread availability is derived from the cores' busy flags,
//! and available memory from the recorded allocations, so the counters a
//! caller reads can never drift from the units actually claimed.

use nodeslot_core::{PciDevice, Req};
use serde::Serialize;
use tracing::debug;

use crate::allocation::Allocation;
use crate::cores::Core;

/// Occupancy of a chip.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(tag = "state", content = "allocations", rename_all = "snake_case")]
pub enum ChipState {
    #[default]
    Free,
    /// One allocation per job using the chip.
    Shared(Vec<Allocation>),
    /// Reserved for a single job.
    Exclusive(Allocation),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Chip {
    id: u32,
    memory_kb: u64,
    cpuset: String,
    nodeset: String,
    cores: Vec<Core>,
    devices: Vec<PciDevice>,
    state: ChipState,
}

impl Chip {
    pub fn new(id: u32, memory_kb: u64) -> Self {
        Self {
            id,
            memory_kb,
            cpuset: String::new(),
            nodeset: String::new(),
            cores: Vec::new(),
            devices: Vec::new(),
            state: ChipState::Free,
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn memory(&self) -> u64 {
        self.memory_kb
    }

    pub fn set_allowed_sets(&mut self, cpuset: &str, nodeset: &str) {
        self.cpuset = cpuset.to_string();
        self.nodeset = nodeset.to_string();
    }

    pub fn cpuset(&self) -> &str {
        &self.cpuset
    }

    pub fn nodeset(&self) -> &str {
        &self.nodeset
    }

    pub fn add_core(&mut self, core: Core) {
        self.cores.push(core);
    }

    /// Add a two-thread core whose units are `id` and `id + 12`.
    pub fn make_core(&mut self, id: u32) {
        self.cores.push(Core::new(id, vec![id, id + 12]));
    }

    pub fn add_device(&mut self, device: PciDevice) {
        self.devices.push(device);
    }

    pub fn cores(&self) -> &[Core] {
        &self.cores
    }

    pub fn devices(&self) -> &[PciDevice] {
        &self.devices
    }

    pub fn state(&self) -> &ChipState {
        &self.state
    }

    pub fn total_cores(&self) -> u32 {
        self.cores.len() as u32
    }

    pub fn total_threads(&self) -> u32 {
        self.cores.iter().map(Core::total_threads).sum()
    }

    pub fn available_cores(&self) -> u32 {
        self.cores.iter().filter(|core| core.is_free()).count() as u32
    }

    pub fn available_threads(&self) -> u32 {
        self.cores.iter().map(Core::processing_units_open).sum()
    }

    pub fn available_memory(&self) -> u64 {
        let used: u64 = self.allocations().iter().map(|a| a.memory_kb).sum();
        self.memory_kb.saturating_sub(used)
    }

    pub fn is_threaded(&self) -> bool {
        self.total_threads() != self.total_cores()
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(self.state, ChipState::Exclusive(_))
    }

    pub fn chip_is_available(&self) -> bool {
        self.available_threads() == self.total_threads()
            && self.available_cores() == self.total_cores()
    }

    pub fn allocations(&self) -> &[Allocation] {
        match &self.state {
            ChipState::Free => &[],
            ChipState::Shared(allocations) => allocations,
            ChipState::Exclusive(allocation) => std::slice::from_ref(allocation),
        }
    }

    pub fn allocation_for(&self, job_id: &str) -> Option<&Allocation> {
        self.allocations().iter().find(|a| a.job_id == job_id)
    }

    /// Whether tasks of `job_id` may land here at all.
    fn accepts(&self, job_id: &str, exclusive: bool) -> bool {
        match &self.state {
            ChipState::Free => true,
            ChipState::Exclusive(owner) => owner.job_id == job_id,
            ChipState::Shared(allocations) => {
                !exclusive || allocations.iter().all(|a| a.job_id == job_id)
            }
        }
    }

    /// How many tasks of `req` would fit on this chip right now.
    pub fn how_many_tasks_fit(&self, req: &Req, job_id: &str) -> u32 {
        if !self.accepts(job_id, req.exclusive_chip) {
            return 0;
        }

        let slots = req.slots_per_task();
        let cpu_tasks = if req.uses_cores() {
            self.available_cores() / slots
        } else {
            self.available_threads() / slots
        };

        // Memory isn't required for submission.
        if req.memory_kb == 0 {
            return cpu_tasks;
        }

        let mem_tasks = self.available_memory() / req.memory_kb;
        cpu_tasks.min(u32::try_from(mem_tasks).unwrap_or(u32::MAX))
    }

    /// Place up to `to_place` tasks of `req` on this chip.
    ///
    /// Stops at the first task that does not fit. Whatever landed is
    /// recorded against the chip and folded into `master`. Returns the
    /// number of tasks placed.
    pub fn place_task(
        &mut self,
        job_id: &str,
        req: &Req,
        master: &mut Allocation,
        to_place: u32,
    ) -> u32 {
        if !self.accepts(job_id, req.exclusive_chip) {
            return 0;
        }

        let slots = req.slots_per_task();
        let mut a = Allocation::new(job_id);
        a.cores_only = req.uses_cores();
        a.exclusive = req.exclusive_chip;

        let mut memory_left = self.available_memory();
        let mut tasks_placed = 0;

        while tasks_placed < to_place {
            if memory_left < req.memory_kb {
                break;
            }

            let open = if a.cores_only {
                self.available_cores()
            } else {
                self.available_threads()
            };
            if open < slots {
                break;
            }

            memory_left -= req.memory_kb;
            a.memory_kb += req.memory_kb;
            a.cpus += slots;

            if a.cores_only {
                self.place_task_by_cores(slots, &mut a);
            } else {
                self.place_task_by_threads(slots, &mut a);
            }
            tasks_placed += 1;
        }

        if tasks_placed > 0 {
            a.tasks = tasks_placed;
            a.mem_indices.push(self.id);
            master.add_allocation(&a);
            debug!(
                chip = self.id,
                job = job_id,
                tasks = tasks_placed,
                threads = a.threads,
                memory_kb = a.memory_kb,
                "placed tasks on chip"
            );
            self.record(a);
        }

        tasks_placed
    }

    /// Claim `slots` whole cores.
    fn place_task_by_cores(&mut self, slots: u32, a: &mut Allocation) {
        for core in self.cores.iter_mut().filter(|core| core.is_free()).take(slots as usize) {
            let indices = core.mark_as_busy();
            a.cores += 1;
            a.threads += indices.len() as u32;
            a.cpu_indices.extend(indices);
        }
    }

    /// Claim `slots` processing units, filling cores in order.
    fn place_task_by_threads(&mut self, slots: u32, a: &mut Allocation) {
        let mut slots_left = slots;
        for core in self.cores.iter_mut() {
            if slots_left == 0 {
                break;
            }
            if core.processing_units_open() == 0 {
                continue;
            }
            if core.is_free() {
                a.cores += 1;
            }
            while slots_left > 0 {
                let Some(index) = core.take_open_processing_unit() else {
                    break;
                };
                a.threads += 1;
                a.cpu_indices.push(index);
                slots_left -= 1;
            }
        }
    }

    /// Store `a` as the job's allocation on this chip, merging with any
    /// allocation the job already holds here.
    fn record(&mut self, a: Allocation) {
        let exclusive = a.exclusive;
        self.state = match std::mem::take(&mut self.state) {
            ChipState::Free if exclusive => ChipState::Exclusive(a),
            ChipState::Free => ChipState::Shared(vec![a]),
            ChipState::Exclusive(mut owner) => {
                owner.add_allocation(&a);
                ChipState::Exclusive(owner)
            }
            ChipState::Shared(mut allocations) => {
                match allocations.iter_mut().find(|existing| existing.job_id == a.job_id) {
                    Some(existing) => existing.add_allocation(&a),
                    None => allocations.push(a),
                }
                // `accepts` only lets an exclusive req in when the job is alone here.
                if exclusive && allocations.len() == 1 {
                    match allocations.pop() {
                        Some(owner) => ChipState::Exclusive(owner),
                        None => ChipState::Free,
                    }
                } else {
                    ChipState::Shared(allocations)
                }
            }
        };
    }

    /// Mark the processing unit with OS index `index` as unused.
    pub fn free_cpu_index(&mut self, index: u32) {
        for core in self.cores.iter_mut().filter(|core| !core.is_free()) {
            if core.free_pu_index(index).is_some() {
                return;
            }
        }
    }

    /// Release everything `job_id` holds on this chip.
    ///
    /// Returns true if the job held an allocation here and the chip is now
    /// completely free.
    pub fn free_task(&mut self, job_id: &str) -> bool {
        let removed = match std::mem::take(&mut self.state) {
            ChipState::Free => None,
            ChipState::Exclusive(owner) if owner.job_id == job_id => Some(owner),
            ChipState::Exclusive(owner) => {
                self.state = ChipState::Exclusive(owner);
                None
            }
            ChipState::Shared(mut allocations) => {
                let removed = allocations
                    .iter()
                    .position(|a| a.job_id == job_id)
                    .map(|pos| allocations.remove(pos));
                if !allocations.is_empty() {
                    self.state = ChipState::Shared(allocations);
                }
                removed
            }
        };

        let Some(allocation) = removed else {
            return false;
        };

        for index in &allocation.cpu_indices {
            self.free_cpu_index(*index);
        }
        debug!(
            chip = self.id,
            job = job_id,
            threads = allocation.threads,
            memory_kb = allocation.memory_kb,
            "freed job allocation on chip"
        );

        self.chip_is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeslot_core::ThreadUsage;

    const GB: u64 = 1024 * 1024;

    /// 4 cores × 2 threads, 8 GB.
    fn test_chip() -> Chip {
        let mut chip = Chip::new(0, 8 * GB);
        for id in 0..4 {
            chip.make_core(id);
        }
        chip
    }

    fn assert_consistent(chip: &Chip) {
        let busy_cores = chip.cores().iter().filter(|c| !c.is_free()).count() as u32;
        assert_eq!(chip.available_cores(), chip.total_cores() - busy_cores);
        if chip.chip_is_available() {
            assert!(!chip.is_exclusive());
            assert!(chip.allocations().is_empty());
        }
        let mut seen = std::collections::HashSet::new();
        for a in chip.allocations() {
            for index in &a.cpu_indices {
                assert!(seen.insert(*index), "index {index} claimed twice");
            }
        }
    }

    #[test]
    fn new_chip_is_available() {
        let chip = test_chip();
        assert!(chip.chip_is_available());
        assert!(chip.is_threaded());
        assert_eq!(chip.total_threads(), 8);
        assert_eq!(chip.available_memory(), 8 * GB);
        assert_eq!(chip.state(), &ChipState::Free);
    }

    #[test]
    fn threads_placement_and_free() {
        let mut chip = test_chip();
        let req = Req::new(3, 2, 2 * GB);
        let mut master = Allocation::new("1.srv");

        let placed = chip.place_task("1.srv", &req, &mut master, 3);

        assert_eq!(placed, 3);
        assert_eq!(chip.available_threads(), 2);
        assert_eq!(chip.available_memory(), 2 * GB);
        assert_eq!(master.threads, 6);
        assert_eq!(master.memory_kb, 6 * GB);
        assert_eq!(master.mem_indices, vec![0]);
        assert!(master.cores <= 4);
        assert_consistent(&chip);

        assert!(chip.free_task("1.srv"));
        assert_eq!(chip.available_threads(), 8);
        assert_eq!(chip.available_memory(), 8 * GB);
        assert!(chip.chip_is_available());
        assert_consistent(&chip);
    }

    #[test]
    fn cores_only_caps_at_core_count() {
        let mut chip = test_chip();
        let req = Req::new(5, 2, 0).with_thread_usage(ThreadUsage::UseCores);
        let mut master = Allocation::new("2.srv");

        assert_eq!(chip.how_many_tasks_fit(&req, "2.srv"), 2);
        let placed = chip.place_task("2.srv", &req, &mut master, 5);

        assert_eq!(placed, 2);
        assert_eq!(chip.available_cores(), 0);
        assert_eq!(chip.available_threads(), 0);
        assert_eq!(master.cores, 4);
        assert_eq!(master.threads, 8);
        assert_eq!(master.cpu_list().to_string(), "0-3,12-15");
        assert_consistent(&chip);
    }

    #[test]
    fn memory_limits_placement() {
        let mut chip = test_chip();
        let req = Req::new(4, 1, 3 * GB);
        let mut master = Allocation::new("3.srv");

        assert_eq!(chip.how_many_tasks_fit(&req, "3.srv"), 2);
        assert_eq!(chip.place_task("3.srv", &req, &mut master, 4), 2);
        assert_eq!(chip.available_memory(), 2 * GB);
        assert_eq!(chip.available_threads(), 6);
    }

    #[test]
    fn zero_memory_is_unconstrained() {
        let chip = test_chip();
        let req = Req::new(8, 1, 0);
        assert_eq!(chip.how_many_tasks_fit(&req, "j"), 8);
    }

    #[test]
    fn threads_share_partial_core_between_jobs() {
        let mut chip = test_chip();
        let one_thread = Req::new(1, 1, 0);
        let mut a = Allocation::new("a");
        let mut b = Allocation::new("b");

        chip.place_task("a", &one_thread, &mut a, 1);
        chip.place_task("b", &one_thread, &mut b, 1);

        assert_eq!(a.cpu_indices, vec![0]);
        assert_eq!(b.cpu_indices, vec![12]);
        assert_eq!(chip.available_cores(), 3);
        assert_eq!(chip.allocations().len(), 2);
        assert_consistent(&chip);

        assert!(!chip.free_task("a"));
        assert_eq!(chip.available_cores(), 3);
        assert!(chip.free_task("b"));
        assert_eq!(chip.available_cores(), 4);
    }

    #[test]
    fn cores_only_skips_partially_used_cores() {
        let mut chip = test_chip();
        let mut a = Allocation::new("a");
        let mut b = Allocation::new("b");

        chip.place_task("a", &Req::new(1, 1, 0), &mut a, 1);
        let whole = Req::new(1, 1, 0).with_thread_usage(ThreadUsage::UseCores);
        chip.place_task("b", &whole, &mut b, 1);

        assert_eq!(b.cpu_indices, vec![1, 13]);
        assert_consistent(&chip);
    }

    #[test]
    fn exclusive_blocks_other_jobs() {
        let mut chip = test_chip();
        let req = Req::new(1, 1, GB).exclusive();
        let mut master = Allocation::new("owner");

        assert_eq!(chip.place_task("owner", &req, &mut master, 1), 1);
        assert!(chip.is_exclusive());

        let other = Req::new(1, 1, 0);
        let mut other_master = Allocation::new("other");
        assert_eq!(chip.how_many_tasks_fit(&other, "other"), 0);
        assert_eq!(chip.place_task("other", &other, &mut other_master, 1), 0);

        // The owner may keep adding tasks.
        assert_eq!(chip.place_task("owner", &other, &mut master, 1), 1);
        assert_eq!(chip.allocations().len(), 1);
        assert_eq!(chip.allocation_for("owner").map(|a| a.tasks), Some(2));

        assert!(chip.free_task("owner"));
        assert!(!chip.is_exclusive());
        assert_eq!(chip.state(), &ChipState::Free);
    }

    #[test]
    fn exclusive_refused_while_shared() {
        let mut chip = test_chip();
        let mut a = Allocation::new("a");
        chip.place_task("a", &Req::new(1, 1, 0), &mut a, 1);

        let exclusive = Req::new(1, 1, 0).exclusive();
        let mut b = Allocation::new("b");
        assert_eq!(chip.how_many_tasks_fit(&exclusive, "b"), 0);
        assert_eq!(chip.place_task("b", &exclusive, &mut b, 1), 0);
        assert!(b.is_empty());
    }

    #[test]
    fn nothing_placed_leaves_chip_untouched() {
        let mut chip = test_chip();
        let too_big = Req::new(1, 9, 0);
        let mut master = Allocation::new("j");

        assert_eq!(chip.place_task("j", &too_big, &mut master, 1), 0);
        assert_eq!(chip.state(), &ChipState::Free);
        assert!(master.mem_indices.is_empty());
    }

    #[test]
    fn free_unknown_job_is_noop() {
        let mut chip = test_chip();
        let mut master = Allocation::new("a");
        chip.place_task("a", &Req::new(2, 1, GB), &mut master, 2);

        assert!(!chip.free_task("nope"));
        assert_eq!(chip.available_threads(), 6);
        assert_eq!(chip.available_memory(), 6 * GB);
        assert_eq!(chip.allocations().len(), 1);
    }

    #[test]
    fn repeated_placement_merges_allocation() {
        let mut chip = test_chip();
        let mut master = Allocation::new("j");
        chip.place_task("j", &Req::new(1, 2, GB), &mut master, 1);
        chip.place_task("j", &Req::new(1, 2, GB), &mut master, 1);

        let a = chip.allocation_for("j").unwrap();
        assert_eq!(a.tasks, 2);
        assert_eq!(a.threads, 4);
        assert_eq!(a.mem_indices, vec![0]);

        assert!(chip.free_task("j"));
        assert!(chip.chip_is_available());
    }
}
