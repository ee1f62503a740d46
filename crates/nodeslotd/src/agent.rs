//! Node agent — owns the machine and serializes access to it.
//!
//! Commands arrive as one JSON object per line and are answered with one
//! JSON object per line:
//!
//! ```text
//! {"op":"place","job":{"job_id":"1.srv","reqs":[...]}}
//! {"op":"release","job_id":"1.srv"}
//! {"op":"status"}
//! ```

use std::io::{BufRead, Write};
use std::sync::Mutex;

use nodeslot_alloc::discovery::for_backend;
use nodeslot_alloc::{JobPlacement, Machine, MachineStatus};
use nodeslot_core::{Job, NodeConfig, TopologyFacts};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Command {
    Place {
        /// Host whose per-host task counts to use; defaults to the agent's.
        #[serde(default)]
        host: Option<String>,
        job: Job,
    },
    Release {
        job_id: String,
    },
    Status,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Placed { placement: JobPlacement },
    Released { job_id: String, released: bool },
    Status { status: MachineStatus },
    Error { message: String },
}

pub struct NodeAgent {
    hostname: String,
    machine: Mutex<Machine>,
}

impl NodeAgent {
    pub fn new(hostname: impl Into<String>, machine: Machine) -> Self {
        Self {
            hostname: hostname.into(),
            machine: Mutex::new(machine),
        }
    }

    /// Load topology facts named by `config` and build the machine.
    pub fn from_config(config: &NodeConfig) -> anyhow::Result<Self> {
        let facts = TopologyFacts::from_file(&config.node.topology)?;
        let discovery = for_backend(config.accelerators.backend, &facts.accelerators);
        let machine = Machine::from_facts(&facts, discovery.as_ref())?;
        info!(
            host = %config.node.hostname,
            topology = ?config.node.topology,
            "node agent initialized"
        );
        Ok(Self::new(config.node.hostname.clone(), machine))
    }

    pub fn hostname(&self) -> &str {
        &self.hostname
    }

    pub fn handle(&self, command: Command) -> Response {
        let mut machine = match self.machine.lock() {
            Ok(machine) => machine,
            Err(_) => {
                return Response::Error {
                    message: "machine state lock poisoned".to_string(),
                };
            }
        };

        match command {
            Command::Place { host, job } => {
                let host = host.as_deref().unwrap_or(self.hostname.as_str());
                let placement = machine.place_job(&job, host);
                Response::Placed { placement }
            }
            Command::Release { job_id } => {
                let released = machine.free_job_allocation(&job_id);
                Response::Released { job_id, released }
            }
            Command::Status => Response::Status {
                status: machine.status(),
            },
        }
    }

    /// Decode one command line and encode its response.
    pub fn handle_line(&self, line: &str) -> String {
        let response = match serde_json::from_str::<Command>(line) {
            Ok(command) => self.handle(command),
            Err(e) => {
                warn!(error = %e, "rejected malformed command");
                Response::Error {
                    message: format!("invalid command: {e}"),
                }
            }
        };
        serde_json::to_string(&response).unwrap_or_else(|e| {
            format!(r#"{{"result":"error","message":"encoding failed: {e}"}}"#)
        })
    }

    /// Serve commands from `input` until EOF.
    pub fn serve<R: BufRead, W: Write>(&self, input: R, mut output: W) -> anyhow::Result<()> {
        for line in input.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            debug!(command = %line, "command received");
            writeln!(output, "{}", self.handle_line(&line))?;
            output.flush()?;
        }
        info!("command stream closed");
        Ok(())
    }

    /// Human-readable topology listing.
    pub fn describe(&self) -> String {
        match self.machine.lock() {
            Ok(machine) => machine.to_string(),
            Err(_) => "machine state lock poisoned".to_string(),
        }
    }
}
