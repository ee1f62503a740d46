//! nodeslotd — the nodeslot node agent.
//!
//! Builds the node's [`Machine`](nodeslot_alloc::Machine) once at startup
//! from discovery facts and then serves placement and release commands
//! against it, one at a time.

pub mod agent;

pub use agent::{Command, NodeAgent, Response};
