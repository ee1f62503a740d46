//! nodeslot node-local placement — topology model, placement, release.
//!
//! Given the discovered topology of one node and a job's resource requests,
//! this crate decides which processing units and NUMA memory nodes the
//! job's tasks use, records the claim, and reverses it when the job ends.
//! It does NOT pick which node runs a job; that decision is made upstream.
//!
//! # Components
//!
//! - **`machine`** — the node; `place_job` and `free_job_allocation`
//! - **`socket`** / **`chip`** / **`cores`** — the owned topology tree
//! - **`allocation`** — a job's claimed units and memory
//! - **`build`** / **`layout`** — construction from discovery facts
//! - **`discovery`** — pluggable accelerator enumeration
//!
//! # Concurrency
//!
//! Placement and release take `&mut Machine`. Callers sharing a machine
//! across threads hold one lock for the whole call so that no two
//! placements interleave their read-then-claim sequences.

pub mod allocation;
pub mod build;
pub mod chip;
pub mod cores;
pub mod discovery;
pub mod error;
pub mod layout;
pub mod machine;
pub mod socket;

pub use allocation::Allocation;
pub use chip::{Chip, ChipState};
pub use cores::Core;
pub use discovery::{AcceleratorDiscovery, NoAccelerators, StaticAccelerators, discover_or_empty};
pub use error::{TopologyError, TopologyResult};
pub use layout::{HardwareLayout, classify_layout};
pub use machine::{JobPlacement, Machine, MachineStatus, ReqPlacement};
pub use socket::Socket;
