//! Environment configuration
//!
//! Every field has a default so `kickstand up` works with no flags and no
//! config file; a YAML file overrides whatever it names.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::Result;

/// Upstream manifest set for the GitOps controller
const DEFAULT_GITOPS_MANIFEST_URL: &str =
    "https://raw.githubusercontent.com/argoproj/argo-cd/stable/manifests/install.yaml";

/// Top-level configuration for a disposable environment
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct EnvironmentConfig {
    /// Environment (kind cluster) name
    pub name: String,
    /// Number of worker nodes
    pub workers: u32,
    /// Host port mapped to the ingress controller's HTTP port
    pub http_port: u16,
    /// Host port mapped to the ingress controller's HTTPS port
    pub https_port: u16,
    /// ingress-nginx chart version
    pub ingress_chart_version: String,
    /// KEDA chart version
    pub autoscaler_chart_version: String,
    /// URL of the GitOps controller's install manifest set
    pub gitops_manifest_url: String,
    /// The application handed to the GitOps controller
    pub app: AppConfig,
    /// Port-forward tunnel to the GitOps controller UI
    pub tunnel: TunnelConfig,
}

/// Source and destination of the deployed application
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    /// Application name
    pub name: String,
    /// Source git repository URL
    pub repo_url: String,
    /// Path within the repository
    pub path: String,
    /// Git revision to track
    pub target_revision: String,
    /// Destination namespace
    pub namespace: String,
}

/// Local/remote port pair for the background tunnel
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct TunnelConfig {
    /// Local port the tunnel listens on
    pub local_port: u16,
    /// Service port the tunnel forwards to
    pub remote_port: u16,
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            name: "kickstand".to_string(),
            workers: 2,
            http_port: 8080,
            https_port: 8443,
            ingress_chart_version: "4.13.0".to_string(),
            autoscaler_chart_version: "2.17.2".to_string(),
            gitops_manifest_url: DEFAULT_GITOPS_MANIFEST_URL.to_string(),
            app: AppConfig::default(),
            tunnel: TunnelConfig::default(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            name: "dev-apps".to_string(),
            repo_url: "https://github.com/argoproj/argocd-example-apps".to_string(),
            path: "guestbook".to_string(),
            target_revision: "HEAD".to_string(),
            namespace: "default".to_string(),
        }
    }
}

impl Default for TunnelConfig {
    fn default() -> Self {
        Self {
            local_port: 8081,
            remote_port: 443,
        }
    }
}

impl EnvironmentConfig {
    /// Load configuration: defaults, overridden by the YAML file if given
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(path) => {
                let content = std::fs::read_to_string(path)?;
                serde_yaml::from_str(&content)?
            }
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    /// Validate user-supplied values
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            return Err(kickstand_common::Error::validation_for_field(
                "name",
                "environment name must not be empty",
            )
            .into());
        }
        if !self
            .name
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(kickstand_common::Error::validation_for_field(
                "name",
                "environment name must be lowercase alphanumeric or '-'",
            )
            .into());
        }
        if self.app.repo_url.is_empty() {
            return Err(kickstand_common::Error::validation_for_field(
                "app.repoUrl",
                "application repository URL must not be empty",
            )
            .into());
        }
        Ok(())
    }
}
