//! Stop command - terminate a persisted background tunnel
//!
//! The separate invocation that finds the tunnel through its handle file
//! and stops it. Defensive end to end: no tunnel, a stale file, or a
//! dead process all succeed quietly, and a stop failure is logged rather
//! than escalated.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use crate::config::EnvironmentConfig;
use crate::tunnel;
use crate::Result;

/// Stop the environment's background tunnel
#[derive(Args, Debug)]
pub struct StopArgs {
    /// Path to an environment config file (YAML)
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<PathBuf>,
}

pub async fn run(args: StopArgs) -> Result<()> {
    let config = EnvironmentConfig::load(args.config_file.as_deref())?;
    let pid_file = tunnel::pid_file_path(&config.name);

    match tunnel::stop_persisted(&pid_file) {
        Ok(()) => info!("tunnel for '{}' stopped (if one was running)", config.name),
        Err(e) => warn!("failed to stop tunnel for '{}': {}", config.name, e),
    }

    Ok(())
}
