//! nodeslotd — the nodeslot node agent.
//!
//! # Usage
//!
//! ```text
//! nodeslotd serve --config /etc/nodeslot/nodeslot.toml < commands.jsonl
//! nodeslotd show --config /etc/nodeslot/nodeslot.toml
//! nodeslotd place --config /etc/nodeslot/nodeslot.toml --job job.json
//! nodeslotd init --hostname node01 --topology /etc/nodeslot/topology.json
//! ```

use std::io::{self, BufReader};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use nodeslot_core::{Job, NodeConfig};
use nodeslotd::{Command as AgentCommand, NodeAgent};
use tracing::info;

#[derive(Parser)]
#[command(name = "nodeslotd", about = "nodeslot node agent", version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Serve JSON-line commands on stdin, answering on stdout.
    Serve {
        /// Path to nodeslot.toml.
        #[arg(short, long, default_value = "/etc/nodeslot/nodeslot.toml")]
        config: PathBuf,

        /// Override the host name from the config file.
        #[arg(long)]
        hostname: Option<String>,
    },
    /// Print the node topology.
    Show {
        #[arg(short, long, default_value = "/etc/nodeslot/nodeslot.toml")]
        config: PathBuf,
    },
    /// Place one job and print the resulting placement.
    Place {
        #[arg(short, long, default_value = "/etc/nodeslot/nodeslot.toml")]
        config: PathBuf,

        /// Job description (JSON).
        #[arg(short, long)]
        job: PathBuf,

        #[arg(long)]
        hostname: Option<String>,
    },
    /// Print a nodeslot.toml scaffold.
    Init {
        #[arg(long)]
        hostname: String,

        #[arg(long, default_value = "/etc/nodeslot/topology.json")]
        topology: PathBuf,
    },
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::Serve { config, hostname } => {
            let agent = load_agent(&config, hostname)?;
            info!(host = agent.hostname(), "serving commands on stdin");
            agent.serve(BufReader::new(io::stdin().lock()), io::stdout().lock())
        }
        Command::Show { config } => {
            let agent = load_agent(&config, None)?;
            print!("{}", agent.describe());
            Ok(())
        }
        Command::Place {
            config,
            job,
            hostname,
        } => {
            let agent = load_agent(&config, hostname)?;
            let job: Job = serde_json::from_str(&std::fs::read_to_string(&job)?)?;
            let response = agent.handle(AgentCommand::Place { host: None, job });
            println!("{}", serde_json::to_string_pretty(&response)?);
            Ok(())
        }
        Command::Init { hostname, topology } => {
            let config = NodeConfig::scaffold(&hostname, &topology);
            print!("{}", config.to_toml_string()?);
            Ok(())
        }
    }
}

fn load_agent(path: &Path, hostname: Option<String>) -> anyhow::Result<NodeAgent> {
    let mut config = NodeConfig::from_file(path)?;
    init_tracing(config.log.filter.as_deref());
    if let Some(hostname) = hostname {
        config.node.hostname = hostname;
    }
    NodeAgent::from_config(&config)
}

/// Logs go to stderr; stdout carries command responses.
fn init_tracing(config_filter: Option<&str>) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        tracing_subscriber::EnvFilter::new(config_filter.unwrap_or("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}
