//! Physical packages.

use nodeslot_core::Req;
use serde::Serialize;

use crate::allocation::Allocation;
use crate::chip::Chip;

/// A processor package holding one or more NUMA chips.
///
/// Non-NUMA hardware gets a single synthetic chip, so everything below the
/// socket looks the same either way.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Socket {
    id: u32,
    chips: Vec<Chip>,
}

impl Socket {
    pub fn new(id: u32) -> Self {
        Self {
            id,
            chips: Vec::new(),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn add_chip(&mut self, chip: Chip) {
        self.chips.push(chip);
    }

    pub fn chips(&self) -> &[Chip] {
        &self.chips
    }

    pub fn total_chips(&self) -> u32 {
        self.chips.len() as u32
    }

    pub fn total_cores(&self) -> u32 {
        self.chips.iter().map(Chip::total_cores).sum()
    }

    pub fn total_threads(&self) -> u32 {
        self.chips.iter().map(Chip::total_threads).sum()
    }

    pub fn memory(&self) -> u64 {
        self.chips.iter().map(Chip::memory).sum()
    }

    pub fn available_chips(&self) -> u32 {
        self.chips.iter().filter(|chip| chip.chip_is_available()).count() as u32
    }

    pub fn available_cores(&self) -> u32 {
        self.chips.iter().map(Chip::available_cores).sum()
    }

    pub fn available_threads(&self) -> u32 {
        self.chips.iter().map(Chip::available_threads).sum()
    }

    pub fn available_memory(&self) -> u64 {
        self.chips.iter().map(Chip::available_memory).sum()
    }

    /// True when no chip on this socket holds any allocation.
    pub fn is_available(&self) -> bool {
        self.chips.iter().all(Chip::chip_is_available)
    }

    pub fn holds(&self, job_id: &str) -> bool {
        self.chips
            .iter()
            .any(|chip| chip.allocation_for(job_id).is_some())
    }

    pub fn how_many_tasks_fit(&self, req: &Req, job_id: &str) -> u32 {
        self.chips
            .iter()
            .map(|chip| chip.how_many_tasks_fit(req, job_id))
            .sum()
    }

    /// Place up to `to_place` tasks across this socket's chips, in order.
    pub fn place_task(
        &mut self,
        job_id: &str,
        req: &Req,
        master: &mut Allocation,
        to_place: u32,
    ) -> u32 {
        let mut placed = 0;
        for chip in &mut self.chips {
            if placed == to_place {
                break;
            }
            placed += chip.place_task(job_id, req, master, to_place - placed);
        }
        placed
    }

    /// Free everything `job_id` holds on this socket.
    ///
    /// Returns true if the job was using the socket and the socket is now
    /// completely free.
    pub fn free_task(&mut self, job_id: &str) -> bool {
        let held = self.holds(job_id);
        for chip in &mut self.chips {
            chip.free_task(job_id);
        }
        held && self.is_available()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nodeslot_core::ThreadUsage;

    fn two_chip_socket() -> Socket {
        let mut socket = Socket::new(0);
        for chip_id in 0..2 {
            let mut chip = Chip::new(chip_id, 4096);
            for core in 0..2 {
                chip.make_core(chip_id * 2 + core);
            }
            socket.add_chip(chip);
        }
        socket
    }

    #[test]
    fn aggregates_children() {
        let socket = two_chip_socket();
        assert_eq!(socket.total_chips(), 2);
        assert_eq!(socket.total_cores(), 4);
        assert_eq!(socket.total_threads(), 8);
        assert_eq!(socket.memory(), 8192);
        assert_eq!(socket.available_chips(), 2);
        assert!(socket.is_available());
    }

    #[test]
    fn fit_sums_chips() {
        let socket = two_chip_socket();
        let req = Req::new(4, 2, 1024).with_thread_usage(ThreadUsage::UseCores);
        assert_eq!(socket.how_many_tasks_fit(&req, "j"), 2);
        let req = Req::new(4, 1, 1024);
        assert_eq!(socket.how_many_tasks_fit(&req, "j"), 8);
    }

    #[test]
    fn place_spills_into_next_chip() {
        let mut socket = two_chip_socket();
        let req = Req::new(3, 2, 0);
        let mut master = Allocation::new("j");

        assert_eq!(socket.place_task("j", &req, &mut master, 3), 3);
        assert_eq!(master.mem_indices, vec![0, 1]);
        assert_eq!(socket.available_threads(), 2);
        assert_eq!(socket.available_chips(), 0);
        assert!(socket.holds("j"));

        assert!(socket.free_task("j"));
        assert_eq!(socket.available_threads(), 8);
        assert!(!socket.holds("j"));
    }

    #[test]
    fn free_reports_busy_socket() {
        let mut socket = two_chip_socket();
        let mut a = Allocation::new("a");
        let mut b = Allocation::new("b");
        socket.place_task("a", &Req::new(1, 1, 0), &mut a, 1);
        socket.place_task("b", &Req::new(1, 1, 0), &mut b, 1);

        assert!(!socket.free_task("a"));
        assert!(!socket.free_task("a"));
        assert!(socket.free_task("b"));
    }
}
