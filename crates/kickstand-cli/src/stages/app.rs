//! Application deployment stage
//!
//! Hands the application descriptor to the GitOps controller and waits
//! for it to report the application Synced and Healthy. The wait polls
//! the controller's reported status with a bounded timeout; there is no
//! fixed "sleep and assume success" grace period.

use std::time::Duration;

use async_trait::async_trait;
use kube::api::{Api, DynamicObject};

use kickstand_common::kube_utils;
use kickstand_common::GITOPS_NAMESPACE;

use crate::config::{AppConfig, EnvironmentConfig};
use crate::context::ProvisioningContext;
use crate::stage::Stage;
use crate::{Error, Result};

/// The Application CRD may still be establishing when this stage runs
const APPLY_RETRY_TIMEOUT: Duration = Duration::from_secs(120);

/// The stage that submits the application to the GitOps controller
pub struct AppStage {
    app: AppConfig,
}

impl AppStage {
    /// Build the application stage from config
    pub fn new(config: &EnvironmentConfig) -> Self {
        Self {
            app: config.app.clone(),
        }
    }

    /// Render the Application descriptor: source repo reference,
    /// destination namespace, automated sync with prune and self-heal.
    fn application_manifest(&self) -> serde_json::Value {
        serde_json::json!({
            "apiVersion": "argoproj.io/v1alpha1",
            "kind": "Application",
            "metadata": {
                "name": self.app.name,
                "namespace": GITOPS_NAMESPACE,
            },
            "spec": {
                "project": "default",
                "source": {
                    "repoURL": self.app.repo_url,
                    "path": self.app.path,
                    "targetRevision": self.app.target_revision,
                },
                "destination": {
                    "server": "https://kubernetes.default.svc",
                    "namespace": self.app.namespace,
                },
                "syncPolicy": {
                    "automated": {
                        "prune": true,
                        "selfHeal": true,
                    },
                },
            },
        })
    }
}

#[async_trait]
impl Stage for AppStage {
    fn name(&self) -> &str {
        "application"
    }

    async fn action(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let client = ctx.client().await?;

        kube_utils::ensure_namespace(&client, &self.app.namespace).await?;

        let manifest = serde_json::to_string(&self.application_manifest())?;
        kube_utils::apply_manifest_with_retry(&client, &manifest, APPLY_RETRY_TIMEOUT).await?;

        Ok(())
    }

    async fn check_ready(&self, ctx: &mut ProvisioningContext) -> Result<bool> {
        let client = ctx.client().await?;
        let ar = kube_utils::build_api_resource("argoproj.io/v1alpha1", "Application");
        let api: Api<DynamicObject> =
            Api::namespaced_with(client.clone(), GITOPS_NAMESPACE, &ar);

        match api.get(&self.app.name).await {
            Ok(app) => {
                let sync = app
                    .data
                    .pointer("/status/sync/status")
                    .and_then(|v| v.as_str());
                let health = app
                    .data
                    .pointer("/status/health/status")
                    .and_then(|v| v.as_str());
                Ok(sync == Some("Synced") && health == Some("Healthy"))
            }
            Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
            Err(e) => Err(Error::command_failed(format!(
                "failed to get application {}: {}",
                self.app.name, e
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stage() -> AppStage {
        AppStage::new(&EnvironmentConfig::default())
    }

    #[test]
    fn test_application_manifest_source_and_destination() {
        let manifest = stage().application_manifest();

        assert_eq!(
            manifest.pointer("/metadata/namespace").and_then(|v| v.as_str()),
            Some(GITOPS_NAMESPACE)
        );
        assert_eq!(
            manifest.pointer("/spec/source/repoURL").and_then(|v| v.as_str()),
            Some("https://github.com/argoproj/argocd-example-apps")
        );
        assert_eq!(
            manifest.pointer("/spec/destination/namespace").and_then(|v| v.as_str()),
            Some("default")
        );
    }

    #[test]
    fn test_application_manifest_sync_policy() {
        let manifest = stage().application_manifest();

        assert_eq!(
            manifest.pointer("/spec/syncPolicy/automated/prune"),
            Some(&serde_json::Value::Bool(true))
        );
        assert_eq!(
            manifest.pointer("/spec/syncPolicy/automated/selfHeal"),
            Some(&serde_json::Value::Bool(true))
        );
    }

    #[test]
    fn test_application_manifest_is_appliable() {
        // The rendered descriptor must parse through the same path the
        // apply helpers use
        let manifest = serde_json::to_string(&stage().application_manifest()).unwrap();
        let meta = kube_utils::parse_manifest(&manifest).unwrap();
        assert_eq!(meta.name, "dev-apps");
        assert_eq!(meta.namespace.as_deref(), Some(GITOPS_NAMESPACE));
        assert_eq!(meta.api_resource.plural, "applications");
    }

    #[test]
    fn test_stage_name() {
        assert_eq!(stage().name(), "application");
    }
}
