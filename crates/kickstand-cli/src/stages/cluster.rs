//! Cluster provisioning stage
//!
//! Creates the kind cluster that hosts the environment. Disposable
//! environments are recreated, never reused: an existing cluster with
//! the target name is deleted synchronously before the new one is
//! created, so every run starts from a clean state.

use std::path::Path;
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::info;

use kickstand_common::kube_utils;

use crate::config::EnvironmentConfig;
use crate::context::ProvisioningContext;
use crate::stage::Stage;
use crate::{Error, Result};

use super::run_capture;

/// List existing kind clusters and check for one with this name
pub async fn cluster_exists(name: &str) -> Result<bool> {
    let output = run_capture("kind", &["get", "clusters"]).await?;
    Ok(output.lines().any(|line| line.trim() == name))
}

/// Delete a kind cluster
pub async fn delete_cluster(name: &str) -> Result<()> {
    let output = Command::new("kind")
        .args(["delete", "cluster", "--name", name])
        .output()
        .await?;

    if !output.status.success() {
        return Err(Error::command_failed(format!(
            "kind delete cluster failed: {}",
            String::from_utf8_lossy(&output.stderr)
        )));
    }
    Ok(())
}

/// The stage that provisions the kind cluster
pub struct ClusterStage {
    name: String,
    workers: u32,
    http_port: u16,
    https_port: u16,
}

impl ClusterStage {
    /// Build the cluster stage from config
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            name: config.name.clone(),
            workers: config.workers,
            http_port: config.http_port,
            https_port: config.https_port,
        }
    }

    /// Render the kind cluster config: ingress ports mapped on the
    /// control plane, plus the configured worker count.
    fn kind_config(&self) -> String {
        let mut config = format!(
            r#"kind: Cluster
apiVersion: kind.x-k8s.io/v1alpha4
nodes:
- role: control-plane
  kubeadmConfigPatches:
  - |
    kind: InitConfiguration
    nodeRegistration:
      kubeletExtraArgs:
        node-labels: "ingress-ready=true"
  extraPortMappings:
  - containerPort: 80
    hostPort: {http}
    protocol: TCP
  - containerPort: 443
    hostPort: {https}
    protocol: TCP
"#,
            http = self.http_port,
            https = self.https_port,
        );

        for _ in 0..self.workers {
            config.push_str("- role: worker\n");
        }

        config
    }

    /// Create the cluster, piping the rendered config through stdin.
    /// `kind create` blocks until the control plane is reachable.
    async fn create_cluster(&self) -> Result<()> {
        info!("creating kind cluster: {}", self.name);

        let mut child = Command::new("kind")
            .args(["create", "cluster", "--name", &self.name, "--config", "-"])
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        if let Some(mut stdin) = child.stdin.take() {
            use tokio::io::AsyncWriteExt;
            stdin.write_all(self.kind_config().as_bytes()).await?;
        }

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "kind create cluster failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }

    async fn export_kubeconfig(&self, kubeconfig_path: &Path) -> Result<()> {
        let kubeconfig_str = kubeconfig_path
            .to_str()
            .ok_or_else(|| Error::command_failed("kubeconfig path contains invalid UTF-8"))?;

        let output = Command::new("kind")
            .args([
                "export",
                "kubeconfig",
                "--name",
                &self.name,
                "--kubeconfig",
                kubeconfig_str,
            ])
            .output()
            .await?;

        if !output.status.success() {
            return Err(Error::command_failed(format!(
                "kind export kubeconfig failed: {}",
                String::from_utf8_lossy(&output.stderr)
            )));
        }

        Ok(())
    }
}

#[async_trait]
impl Stage for ClusterStage {
    fn name(&self) -> &str {
        "cluster"
    }

    async fn action(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        if cluster_exists(&self.name).await? {
            info!("cluster '{}' already exists, deleting it first", self.name);
            delete_cluster(&self.name).await?;
        }

        self.create_cluster().await?;
        self.export_kubeconfig(&ctx.kubeconfig_path).await?;

        let client = ctx.client().await?;
        kube_utils::wait_for_nodes_ready(&client, Duration::from_secs(120)).await?;

        Ok(())
    }

    async fn check_ready(&self, ctx: &mut ProvisioningContext) -> Result<bool> {
        let client = ctx.client().await?;
        Ok(kube_utils::all_nodes_ready(&client).await?)
    }

    fn readiness_timeout(&self) -> Duration {
        Duration::from_secs(60)
    }
}
