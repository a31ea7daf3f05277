//! Addon installation stages
//!
//! One parameterized stage type covers the three addons: the ingress
//! controller and the autoscaler install from helm charts, the GitOps
//! controller from its upstream manifest set. Readiness is always "the
//! component's deployment reports Available", polled by the runner.

use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use kickstand_common::kube_utils;
use kickstand_common::{GITOPS_ADMIN_SECRET, GITOPS_NAMESPACE, GITOPS_SERVER};

use crate::config::EnvironmentConfig;
use crate::context::ProvisioningContext;
use crate::stage::Stage;
use crate::{Error, Result};

use super::run_streaming;

/// How long the admin secret gets to appear after the server is ready
const CREDENTIAL_TIMEOUT: Duration = Duration::from_secs(60);
const CREDENTIAL_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// How an addon gets onto the cluster
enum InstallMethod {
    /// `helm upgrade --install` from a chart repository
    Helm {
        release: String,
        chart: String,
        repo_url: String,
        namespace: String,
        version: String,
        set: Vec<(String, String)>,
    },
    /// Fetch a multi-document manifest set and server-side apply it
    ManifestSet { url: String, namespace: String },
}

/// A single addon install stage
pub struct AddonStage {
    name: &'static str,
    method: InstallMethod,
    ready_namespace: String,
    ready_deployment: String,
    extract_admin_credential: bool,
}

impl AddonStage {
    /// The ingress controller (ingress-nginx)
    pub fn ingress(config: &EnvironmentConfig) -> Self {
        Self {
            name: "ingress",
            method: InstallMethod::Helm {
                release: "ingress-nginx".to_string(),
                chart: "ingress-nginx".to_string(),
                repo_url: "https://kubernetes.github.io/ingress-nginx".to_string(),
                namespace: "ingress-nginx".to_string(),
                version: config.ingress_chart_version.clone(),
                set: vec![
                    // Bind the controller to the ports kind maps to the host
                    ("controller.hostPort.enabled".to_string(), "true".to_string()),
                    ("controller.service.type".to_string(), "NodePort".to_string()),
                ],
            },
            ready_namespace: "ingress-nginx".to_string(),
            ready_deployment: "ingress-nginx-controller".to_string(),
            extract_admin_credential: false,
        }
    }

    /// The autoscaling controller (KEDA; passive until workloads register)
    pub fn autoscaler(config: &EnvironmentConfig) -> Self {
        Self {
            name: "autoscaler",
            method: InstallMethod::Helm {
                release: "keda".to_string(),
                chart: "keda".to_string(),
                repo_url: "https://kedacore.github.io/charts".to_string(),
                namespace: "keda".to_string(),
                version: config.autoscaler_chart_version.clone(),
                set: Vec::new(),
            },
            ready_namespace: "keda".to_string(),
            ready_deployment: "keda-operator".to_string(),
            extract_admin_credential: false,
        }
    }

    /// The GitOps controller (Argo CD), with admin credential extraction
    pub fn gitops(config: &EnvironmentConfig) -> Self {
        Self {
            name: "gitops",
            method: InstallMethod::ManifestSet {
                url: config.gitops_manifest_url.clone(),
                namespace: GITOPS_NAMESPACE.to_string(),
            },
            ready_namespace: GITOPS_NAMESPACE.to_string(),
            ready_deployment: GITOPS_SERVER.to_string(),
            extract_admin_credential: true,
        }
    }

    /// Whether this stage extracts the admin credential after readiness
    pub fn extracts_credential(&self) -> bool {
        self.extract_admin_credential
    }

    /// Helm arguments for a chart install. No `--wait`: readiness is the
    /// runner's job, not the install operation's.
    fn helm_args(&self, kubeconfig: &str) -> Option<Vec<String>> {
        let InstallMethod::Helm {
            release,
            chart,
            repo_url,
            namespace,
            version,
            set,
        } = &self.method
        else {
            return None;
        };

        let mut args: Vec<String> = vec![
            "upgrade".to_string(),
            "--install".to_string(),
            release.clone(),
            chart.clone(),
            "--repo".to_string(),
            repo_url.clone(),
            "--version".to_string(),
            version.clone(),
            "--namespace".to_string(),
            namespace.clone(),
            "--create-namespace".to_string(),
            "--kubeconfig".to_string(),
            kubeconfig.to_string(),
        ];

        for (key, value) in set {
            args.push("--set".to_string());
            args.push(format!("{}={}", key, value));
        }

        Some(args)
    }

    async fn fetch_manifest(url: &str) -> Result<String> {
        let response = reqwest::get(url)
            .await
            .map_err(|e| Error::command_failed(format!("failed to fetch {}: {}", url, e)))?;

        if !response.status().is_success() {
            return Err(Error::command_failed(format!(
                "failed to fetch {}: HTTP {}",
                url,
                response.status()
            )));
        }

        response
            .text()
            .await
            .map_err(|e| Error::command_failed(format!("failed to read {}: {}", url, e)))
    }
}

#[async_trait]
impl Stage for AddonStage {
    fn name(&self) -> &str {
        self.name
    }

    async fn action(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        match &self.method {
            InstallMethod::Helm { .. } => {
                let kubeconfig = ctx
                    .kubeconfig_path
                    .to_str()
                    .ok_or_else(|| {
                        Error::command_failed("kubeconfig path contains invalid UTF-8")
                    })?
                    .to_string();

                let args = self.helm_args(&kubeconfig).ok_or_else(|| {
                    Error::command_failed("helm install requested for a non-helm addon")
                })?;
                let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
                run_streaming("helm", &arg_refs).await
            }
            InstallMethod::ManifestSet { url, namespace } => {
                info!("fetching manifest set from {}", url);
                let manifests = Self::fetch_manifest(url).await?;

                let client = ctx.client().await?;
                kube_utils::ensure_namespace(&client, namespace).await?;
                kube_utils::apply_manifests(&client, &manifests, Some(namespace)).await?;
                Ok(())
            }
        }
    }

    async fn check_ready(&self, ctx: &mut ProvisioningContext) -> Result<bool> {
        let client = ctx.client().await?;
        Ok(kube_utils::deployment_available(
            &client,
            &self.ready_deployment,
            &self.ready_namespace,
        )
        .await?)
    }

    /// The admin secret is generated a little after the server becomes
    /// Available, so it's polled, never assumed present. Failure here is
    /// a warning at the runner level: the run proceeds without the
    /// credential.
    async fn after_ready(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        if !self.extract_admin_credential {
            return Ok(());
        }

        let client = ctx.client().await?;
        kube_utils::wait_for_secret(
            &client,
            GITOPS_ADMIN_SECRET,
            GITOPS_NAMESPACE,
            CREDENTIAL_TIMEOUT,
            CREDENTIAL_POLL_INTERVAL,
        )
        .await?;

        let bytes =
            kube_utils::get_secret_data(&client, GITOPS_ADMIN_SECRET, GITOPS_NAMESPACE, "password")
                .await?;

        ctx.admin_password = Some(String::from_utf8_lossy(&bytes).trim().to_string());
        info!("admin credential extracted");
        Ok(())
    }
}
