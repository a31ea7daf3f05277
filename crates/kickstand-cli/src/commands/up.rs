//! Up command - provision the full environment
//!
//! Runs the fixed stage sequence: cluster, ingress, autoscaler, GitOps
//! controller, application, tunnel. Fail-fast; once the tunnel has
//! started it is torn down on every exit path — normal completion, a
//! later stage failure, or Ctrl-C.

use std::path::PathBuf;

use clap::Args;
use tracing::{debug, info, warn};

use crate::config::EnvironmentConfig;
use crate::context::ProvisioningContext;
use crate::stage::{Stage, StageRunner};
use crate::stages::addons::AddonStage;
use crate::stages::app::AppStage;
use crate::stages::cluster::ClusterStage;
use crate::tunnel::{self, TunnelStage};
use crate::{prereq, report, Error, Result};

/// Provision the environment
#[derive(Args, Debug)]
pub struct UpArgs {
    /// Path to an environment config file (YAML)
    #[arg(short = 'f', long = "config")]
    pub config_file: Option<PathBuf>,
}

/// The fixed, ordered stage sequence.
///
/// The order is a real dependency chain (the application needs ingress
/// and the autoscaler in place, the tunnel needs the GitOps server), so
/// stages never run in parallel.
pub fn build_stages(config: &EnvironmentConfig) -> Vec<Box<dyn Stage>> {
    vec![
        Box::new(ClusterStage::new(config)),
        Box::new(AddonStage::ingress(config)),
        Box::new(AddonStage::autoscaler(config)),
        Box::new(AddonStage::gitops(config)),
        Box::new(AppStage::new(config)),
        Box::new(TunnelStage::new(config.tunnel.clone())),
    ]
}

pub async fn run(args: UpArgs) -> Result<()> {
    let config = EnvironmentConfig::load(args.config_file.as_deref())?;

    // Prerequisites come first; no stage runs with a tool missing
    let tool_versions = prereq::check(prereq::REQUIRED_TOOLS).await?;

    let mut ctx = ProvisioningContext::new(&config.name);
    ctx.tool_versions = tool_versions;
    for (tool, version) in &ctx.tool_versions {
        debug!("{}: {}", tool, version);
    }

    let runner = StageRunner::new(build_stages(&config));

    let result = tokio::select! {
        res = runner.run(&mut ctx) => res,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted, tearing down");
            Err(Error::Interrupted)
        }
    };

    let result = match result {
        Ok(()) => {
            report::print(&config, &ctx);
            if ctx.tunnel.is_some() {
                info!("tunnel open; press Ctrl-C to stop it and exit");
                let _ = tokio::signal::ctrl_c().await;
            }
            Ok(())
        }
        Err(e) => Err(e),
    };

    // The one mandatory cleanup-on-all-paths guarantee: from the moment
    // the tunnel started, stop it exactly once before we return.
    tunnel::finalize(&mut ctx);

    result
}
