//! A job's claim on processing units and NUMA memory.

use nodeslot_core::IndexList;
use serde::Serialize;

/// Units and memory claimed by one job.
///
/// Built per chip while tasks are placed, then folded into a master
/// allocation that covers the job's whole footprint on the machine.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Allocation {
    pub job_id: String,
    /// OS indices of claimed processing units.
    pub cpu_indices: Vec<u32>,
    /// Ids of the chips whose memory the job uses.
    pub mem_indices: Vec<u32>,
    pub cores: u32,
    pub threads: u32,
    /// Execution slots granted, summed over tasks.
    pub cpus: u32,
    pub memory_kb: u64,
    pub tasks: u32,
    pub cores_only: bool,
    pub exclusive: bool,
}

impl Allocation {
    pub fn new(job_id: &str) -> Self {
        Self {
            job_id: job_id.to_string(),
            ..Default::default()
        }
    }

    /// Fold `other` into this allocation.
    pub fn add_allocation(&mut self, other: &Allocation) {
        self.cpu_indices.extend_from_slice(&other.cpu_indices);
        for mem in &other.mem_indices {
            if !self.mem_indices.contains(mem) {
                self.mem_indices.push(*mem);
            }
        }
        self.cores += other.cores;
        self.threads += other.threads;
        self.cpus += other.cpus;
        self.memory_kb += other.memory_kb;
        self.tasks += other.tasks;
        self.cores_only |= other.cores_only;
        self.exclusive |= other.exclusive;
    }

    pub fn cpu_list(&self) -> IndexList {
        self.cpu_indices.iter().copied().collect()
    }

    pub fn mem_list(&self) -> IndexList {
        self.mem_indices.iter().copied().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks == 0
    }
}
