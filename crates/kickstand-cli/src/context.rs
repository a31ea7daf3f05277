//! Run-scoped provisioning state

use std::collections::BTreeMap;
use std::path::PathBuf;

use kube::Client;

use kickstand_common::kube_utils;

use crate::tunnel::TunnelHandle;
use crate::Result;

/// Mutable state shared by every stage of one provisioning run.
///
/// Exactly one context exists per run; the orchestrator owns it and
/// passes it by reference to each stage. The kubeconfig path is the
/// execution context: every client is built from it explicitly, so no
/// stage depends on ambient kubectl state.
#[derive(Debug)]
pub struct ProvisioningContext {
    /// Environment (kind cluster) name
    pub env_name: String,
    /// Kubeconfig written for this environment; all clients come from here
    pub kubeconfig_path: PathBuf,
    /// Versions reported by the prerequisite tools
    pub tool_versions: BTreeMap<String, String>,
    /// Admin credential extracted from the GitOps controller, if any
    pub admin_password: Option<String>,
    /// Handle to the background tunnel once started
    pub tunnel: Option<TunnelHandle>,
}

impl ProvisioningContext {
    /// Create a fresh context for the named environment
    pub fn new(env_name: &str) -> Self {
        Self {
            env_name: env_name.to_string(),
            kubeconfig_path: std::env::temp_dir().join(format!("{}-kubeconfig", env_name)),
            tool_versions: BTreeMap::new(),
            admin_password: None,
            tunnel: None,
        }
    }

    /// Build a client for this environment from its kubeconfig
    pub async fn client(&self) -> Result<Client> {
        Ok(kube_utils::create_client(&self.kubeconfig_path).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kubeconfig_path_is_per_environment() {
        let a = ProvisioningContext::new("alpha");
        let b = ProvisioningContext::new("beta");
        assert_ne!(a.kubeconfig_path, b.kubeconfig_path);
        assert!(a
            .kubeconfig_path
            .to_string_lossy()
            .contains("alpha-kubeconfig"));
    }

    #[test]
    fn test_fresh_context_is_empty() {
        let ctx = ProvisioningContext::new("dev");
        assert!(ctx.tool_versions.is_empty());
        assert!(ctx.admin_password.is_none());
        assert!(ctx.tunnel.is_none());
    }
}
