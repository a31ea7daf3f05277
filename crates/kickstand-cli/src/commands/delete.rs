//! Delete command - tear down the environment
//!
//! Stops the tunnel first (the cluster it forwards into is about to
//! disappear), then deletes the kind cluster and the exported
//! kubeconfig.

use std::path::PathBuf;

use clap::Args;
use tracing::{info, warn};

use crate::config::EnvironmentConfig;
use crate::context::ProvisioningContext;
use crate::stages::cluster;
use crate::tunnel;
use crate::Result;

/// Delete the environment
#[derive(Args, Debug)]
pub struct DeleteArgs {
    /// Path to an environment config file (YAML)
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<PathBuf>,
}

pub async fn run(args: DeleteArgs) -> Result<()> {
    let config = EnvironmentConfig::load(args.config_file.as_deref())?;

    if let Err(e) = tunnel::stop_persisted(&tunnel::pid_file_path(&config.name)) {
        warn!("failed to stop tunnel: {}", e);
    }

    if cluster::cluster_exists(&config.name).await? {
        info!("deleting cluster '{}'", config.name);
        cluster::delete_cluster(&config.name).await?;
    } else {
        info!("cluster '{}' does not exist", config.name);
    }

    let ctx = ProvisioningContext::new(&config.name);
    if ctx.kubeconfig_path.exists() {
        let _ = std::fs::remove_file(&ctx.kubeconfig_path);
    }

    info!("environment '{}' deleted", config.name);
    Ok(())
}
