//! kickstand CLI library
//!
//! Provisions a disposable kind-based development environment: ingress
//! controller, autoscaler, GitOps controller, one application, and a
//! managed port-forward tunnel.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod prereq;
pub mod report;
pub mod stage;
pub mod stages;
pub mod tunnel;

pub use error::{Error, Result};

use clap::{Parser, Subcommand};

/// kickstand - disposable development environments
#[derive(Parser, Debug)]
#[command(name = "kickstand")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Provision the environment (destroys and recreates an existing one)
    Up(commands::up::UpArgs),

    /// Stop the background tunnel of a previous run
    Stop(commands::stop::StopArgs),

    /// Tear the environment down (tunnel, cluster, kubeconfig)
    Delete(commands::delete::DeleteArgs),
}

impl Cli {
    /// Run the CLI command
    pub async fn run(self) -> Result<()> {
        match self.command {
            Commands::Up(args) => commands::up::run(args).await,
            Commands::Stop(args) => commands::stop::run(args).await,
            Commands::Delete(args) => commands::delete::run(args).await,
        }
    }
}
