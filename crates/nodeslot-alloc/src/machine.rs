//! The whole node — entry point for job placement and release.
//!
//! Placement runs per job over its reqs in order:
//! 1. Whole-fit pass: each req goes entirely onto the first socket that can
//!    hold all of its tasks for this host.
//! 2. Spill pass: reqs no single socket could hold are spread over sockets
//!    in order until placed or out of capacity.
//!
//! Running out of capacity is not an error here; callers compare the
//! placed counts in [`JobPlacement`] against what they asked for.

use std::fmt;

use nodeslot_core::{Job, PciDevice};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::allocation::Allocation;
use crate::socket::Socket;

/// The outcome of placing one req.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReqPlacement {
    pub requested: u32,
    pub placed: u32,
}

/// The outcome of [`Machine::place_job`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct JobPlacement {
    pub job_id: String,
    /// One entry per req, in request order.
    pub reqs: Vec<ReqPlacement>,
    pub allocation: Allocation,
    /// Claimed processing units, in range/list format.
    pub cpus: String,
    /// Claimed memory nodes, in range/list format.
    pub mems: String,
}

impl JobPlacement {
    pub fn fully_placed(&self) -> bool {
        self.reqs.iter().all(|r| r.placed == r.requested)
    }

    pub fn tasks_placed(&self) -> u32 {
        self.reqs.iter().map(|r| r.placed).sum()
    }
}

/// Counter snapshot for status reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MachineStatus {
    pub total_sockets: u32,
    pub total_chips: u32,
    pub total_cores: u32,
    pub total_threads: u32,
    pub total_memory_kb: u64,
    pub available_sockets: u32,
    pub available_chips: u32,
    pub available_cores: u32,
    pub available_threads: u32,
    pub available_memory_kb: u64,
    pub jobs: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Machine {
    pub(crate) total_memory_kb: u64,
    pub(crate) total_sockets: u32,
    pub(crate) total_chips: u32,
    pub(crate) total_cores: u32,
    pub(crate) total_threads: u32,
    pub(crate) is_numa: bool,
    pub(crate) allowed_cpuset: String,
    pub(crate) allowed_nodeset: String,
    pub(crate) sockets: Vec<Socket>,
    pub(crate) devices: Vec<PciDevice>,
}

impl Machine {
    /// A machine with no sockets, for assembling topologies by hand.
    pub fn empty() -> Self {
        Self {
            total_memory_kb: 0,
            total_sockets: 0,
            total_chips: 0,
            total_cores: 0,
            total_threads: 0,
            is_numa: false,
            allowed_cpuset: String::new(),
            allowed_nodeset: String::new(),
            sockets: Vec::new(),
            devices: Vec::new(),
        }
    }

    /// Append a socket and count its units into the totals.
    pub fn add_socket(&mut self, socket: Socket) {
        self.total_sockets += 1;
        self.total_chips += socket.total_chips();
        self.total_cores += socket.total_cores();
        self.total_threads += socket.total_threads();
        self.total_memory_kb += socket.memory();
        self.sockets.push(socket);
    }

    pub fn total_memory(&self) -> u64 {
        self.total_memory_kb
    }

    pub fn total_sockets(&self) -> u32 {
        self.total_sockets
    }

    pub fn total_chips(&self) -> u32 {
        self.total_chips
    }

    pub fn total_cores(&self) -> u32 {
        self.total_cores
    }

    pub fn total_threads(&self) -> u32 {
        self.total_threads
    }

    pub fn is_numa(&self) -> bool {
        self.is_numa
    }

    pub fn allowed_cpuset(&self) -> &str {
        &self.allowed_cpuset
    }

    pub fn allowed_nodeset(&self) -> &str {
        &self.allowed_nodeset
    }

    pub fn sockets(&self) -> &[Socket] {
        &self.sockets
    }

    pub fn devices(&self) -> &[PciDevice] {
        &self.devices
    }

    /// Sockets with no allocation on any of their chips.
    pub fn available_sockets(&self) -> u32 {
        self.sockets.iter().filter(|s| s.is_available()).count() as u32
    }

    pub fn available_chips(&self) -> u32 {
        self.sockets.iter().map(Socket::available_chips).sum()
    }

    pub fn available_cores(&self) -> u32 {
        self.sockets.iter().map(Socket::available_cores).sum()
    }

    pub fn available_threads(&self) -> u32 {
        self.sockets.iter().map(Socket::available_threads).sum()
    }

    pub fn available_memory(&self) -> u64 {
        self.sockets.iter().map(Socket::available_memory).sum()
    }

    /// Ids of every job holding an allocation, in topology order.
    pub fn jobs(&self) -> Vec<String> {
        let mut jobs: Vec<String> = Vec::new();
        let allocations = self
            .sockets
            .iter()
            .flat_map(|s| s.chips())
            .flat_map(|c| c.allocations());
        for a in allocations {
            if !jobs.contains(&a.job_id) {
                jobs.push(a.job_id.clone());
            }
        }
        jobs
    }

    pub fn status(&self) -> MachineStatus {
        MachineStatus {
            total_sockets: self.total_sockets,
            total_chips: self.total_chips,
            total_cores: self.total_cores,
            total_threads: self.total_threads,
            total_memory_kb: self.total_memory_kb,
            available_sockets: self.available_sockets(),
            available_chips: self.available_chips(),
            available_cores: self.available_cores(),
            available_threads: self.available_threads(),
            available_memory_kb: self.available_memory(),
            jobs: self.jobs(),
        }
    }

    /// Place every req of `job` for tasks assigned to `host`.
    pub fn place_job(&mut self, job: &Job, host: &str) -> JobPlacement {
        let job_id = job.job_id.as_str();
        let mut master = Allocation::new(job_id);
        let mut results: Vec<ReqPlacement> = job
            .reqs
            .iter()
            .map(|r| ReqPlacement {
                requested: r.tasks_for_host(host),
                placed: 0,
            })
            .collect();
        let mut partially_place: Vec<usize> = Vec::new();

        // See if each req fits completely on one socket.
        for (i, req) in job.reqs.iter().enumerate() {
            let tasks_for_node = results[i].requested;
            if tasks_for_node == 0 {
                continue;
            }

            let socket = self
                .sockets
                .iter_mut()
                .find(|s| s.how_many_tasks_fit(req, job_id) >= tasks_for_node);

            match socket {
                Some(socket) => {
                    results[i].placed = socket.place_task(job_id, req, &mut master, tasks_for_node);
                    debug!(
                        job = job_id,
                        req = i,
                        socket = socket.id(),
                        tasks = tasks_for_node,
                        "req placed on one socket"
                    );
                }
                None => partially_place.push(i),
            }
        }

        // Spread whatever did not fit on a single socket.
        for i in partially_place {
            let req = &job.reqs[i];
            let mut remaining = results[i].requested;
            for socket in &mut self.sockets {
                if remaining == 0 {
                    break;
                }
                let placed = socket.place_task(job_id, req, &mut master, remaining);
                remaining -= placed;
                results[i].placed += placed;
            }

            if remaining > 0 {
                warn!(
                    job = job_id,
                    req = i,
                    requested = results[i].requested,
                    placed = results[i].placed,
                    "could not place all tasks, insufficient node capacity"
                );
            }
        }

        let cpus = master.cpu_list().to_string();
        let mems = master.mem_list().to_string();
        info!(job = job_id, tasks = master.tasks, cpus = %cpus, mems = %mems, "job placed");

        JobPlacement {
            job_id: job_id.to_string(),
            reqs: results,
            allocation: master,
            cpus,
            mems,
        }
    }

    /// Release every allocation held by `job_id`.
    ///
    /// Returns whether anything was released; an unknown job id is a no-op.
    pub fn free_job_allocation(&mut self, job_id: &str) -> bool {
        let mut released = false;
        let mut sockets_freed = 0;
        for socket in &mut self.sockets {
            released |= socket.holds(job_id);
            if socket.free_task(job_id) {
                sockets_freed += 1;
            }
        }

        if released {
            info!(job = job_id, sockets_freed, "job allocation released");
        } else {
            debug!(job = job_id, "no allocation to release");
        }
        released
    }
}

impl fmt::Display for Machine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Machine ({}KB)", self.total_memory_kb)?;
        for socket in &self.sockets {
            writeln!(f, "  Socket {} ({}KB)", socket.id(), socket.memory())?;
            for chip in socket.chips() {
                writeln!(f, "    Chip {} ({}KB)", chip.id(), chip.memory())?;
                for core in chip.cores() {
                    let pus: Vec<String> = core.indices().iter().map(u32::to_string).collect();
                    writeln!(f, "      Core {} ({})", core.id(), pus.join(","))?;
                }
                for device in chip.devices() {
                    writeln!(f, "      {device}")?;
                }
            }
        }
        for device in &self.devices {
            writeln!(f, "  {device}")?;
        }
        Ok(())
    }
}
