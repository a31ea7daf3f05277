//! Prerequisite checking
//!
//! Verifies every required external tool resolves on PATH before any
//! stage runs, failing fast on the first missing one. Versions are
//! captured best-effort for the context (and the final report's benefit
//! when debugging).

use std::collections::BTreeMap;

use tokio::process::Command;
use tracing::{debug, warn};

use crate::{Error, Result};

/// One required external tool
#[derive(Debug, Clone, Copy)]
pub struct ToolSpec {
    /// Binary name looked up on PATH
    pub name: &'static str,
    /// Install hint shown when the tool is missing
    pub hint: &'static str,
    /// Arguments that make the tool print its version
    pub version_args: &'static [&'static str],
}

/// Tools every provisioning run depends on, in check order
pub const REQUIRED_TOOLS: &[ToolSpec] = &[
    ToolSpec {
        name: "docker",
        hint: "Install Docker: https://docs.docker.com/get-docker/",
        version_args: &["--version"],
    },
    ToolSpec {
        name: "kind",
        hint: "Install kind: https://kind.sigs.k8s.io/docs/user/quick-start/#installation",
        version_args: &["version"],
    },
    ToolSpec {
        name: "helm",
        hint: "Install helm: https://helm.sh/docs/intro/install/",
        version_args: &["version", "--short"],
    },
    ToolSpec {
        name: "kubectl",
        hint: "Install kubectl: https://kubernetes.io/docs/tasks/tools/",
        version_args: &["version", "--client"],
    },
];

/// Check that every tool resolves on PATH; returns discovered versions.
///
/// Fails fast on the first missing tool with `Error::MissingTool`.
pub async fn check(tools: &[ToolSpec]) -> Result<BTreeMap<String, String>> {
    let mut versions = BTreeMap::new();

    for tool in tools {
        let path = which::which(tool.name)
            .map_err(|_| Error::missing_tool(tool.name, tool.hint))?;
        debug!("found {} at {}", tool.name, path.display());

        versions.insert(tool.name.to_string(), tool_version(tool).await);
    }

    Ok(versions)
}

/// Ask a tool for its version; "unknown" if it won't say
async fn tool_version(tool: &ToolSpec) -> String {
    let output = Command::new(tool.name).args(tool.version_args).output().await;

    match output {
        Ok(output) if output.status.success() => String::from_utf8_lossy(&output.stdout)
            .lines()
            .next()
            .unwrap_or("unknown")
            .trim()
            .to_string(),
        _ => {
            warn!("could not determine {} version", tool.name);
            "unknown".to_string()
        }
    }
}
