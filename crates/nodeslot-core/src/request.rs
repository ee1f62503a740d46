//! Job resource requests as handed over by the job transport layer.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Whether a task's execution slots are whole cores or hardware threads.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadUsage {
    /// Every execution slot is a whole core with all of its threads.
    UseCores,
    /// Execution slots may be individual hardware threads.
    #[default]
    UseThreads,
}

/// One resource request within a job.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Req {
    /// Tasks across all hosts; used when `hostlist` is empty.
    pub task_count: u32,
    /// Host name → tasks assigned to that host.
    #[serde(default)]
    pub hostlist: HashMap<String, u32>,
    /// Execution slots (cores or threads) per task.
    pub execution_slots: u32,
    /// Memory per task in KiB. Zero means memory is not a constraint.
    #[serde(default)]
    pub memory_kb: u64,
    #[serde(default)]
    pub thread_usage: ThreadUsage,
    /// Reserve every chip this req lands on for the job alone.
    #[serde(default)]
    pub exclusive_chip: bool,
}

impl Req {
    pub fn new(task_count: u32, execution_slots: u32, memory_kb: u64) -> Self {
        Self {
            task_count,
            hostlist: HashMap::new(),
            execution_slots,
            memory_kb,
            thread_usage: ThreadUsage::default(),
            exclusive_chip: false,
        }
    }

    pub fn with_thread_usage(mut self, usage: ThreadUsage) -> Self {
        self.thread_usage = usage;
        self
    }

    pub fn exclusive(mut self) -> Self {
        self.exclusive_chip = true;
        self
    }

    pub fn on_host(mut self, host: &str, tasks: u32) -> Self {
        self.hostlist.insert(host.to_string(), tasks);
        self
    }

    /// Tasks this req wants on `host`.
    ///
    /// A req without a host list is entirely for whichever host places it;
    /// a req with one assigns nothing to hosts it does not name.
    pub fn tasks_for_host(&self, host: &str) -> u32 {
        if self.hostlist.is_empty() {
            return self.task_count;
        }
        self.hostlist.get(host).copied().unwrap_or(0)
    }

    /// Execution slots per task, never less than one.
    pub fn slots_per_task(&self) -> u32 {
        self.execution_slots.max(1)
    }

    pub fn uses_cores(&self) -> bool {
        self.thread_usage == ThreadUsage::UseCores
    }
}

/// A job as seen by the node agent: its id and its requests in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub job_id: String,
    pub reqs: Vec<Req>,
}

impl Job {
    pub fn new(job_id: impl Into<String>, reqs: Vec<Req>) -> Self {
        Self {
            job_id: job_id.into(),
            reqs,
        }
    }
}
