//! Kubernetes helpers built on kube-rs
//!
//! kubectl-equivalent operations (apply, readiness checks, secret reads)
//! without shelling out to kubectl. Every kickstand stage talks to the
//! cluster through these helpers, always with an explicit kubeconfig path.

use std::future::Future;
use std::path::Path;
use std::time::Duration;

use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Namespace, Node, Secret};
use kube::api::{Api, DynamicObject, ListParams, Patch, PatchParams};
use kube::config::{KubeConfigOptions, Kubeconfig};
use kube::discovery::ApiResource;
use kube::{Client, Config};
use tracing::{trace, warn};

use crate::{Error, FIELD_MANAGER};

/// The "Ready" condition type for nodes
pub const CONDITION_READY: &str = "Ready";
/// The "Available" condition type for deployments
pub const CONDITION_AVAILABLE: &str = "Available";
/// The "True" status value for conditions
pub const STATUS_TRUE: &str = "True";

/// Default polling interval for wait operations
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// Retry interval for apply operations
const APPLY_RETRY_INTERVAL: Duration = Duration::from_secs(2);

/// Default connection timeout for kube clients
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
/// Default read timeout for kube clients
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// Create a kube client from a kubeconfig path with default timeouts
pub async fn create_client(kubeconfig: &Path) -> Result<Client, Error> {
    create_client_with_timeout(kubeconfig, DEFAULT_CONNECT_TIMEOUT, DEFAULT_READ_TIMEOUT).await
}

/// Create a kube client from a kubeconfig path with custom timeouts
pub async fn create_client_with_timeout(
    kubeconfig: &Path,
    connect_timeout: Duration,
    read_timeout: Duration,
) -> Result<Client, Error> {
    let kubeconfig = Kubeconfig::read_from(kubeconfig).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to read kubeconfig: {}", e))
    })?;
    let mut config = Config::from_custom_kubeconfig(kubeconfig, &KubeConfigOptions::default())
        .await
        .map_err(|e| {
            Error::internal_with_context(
                "create_client",
                format!("failed to load kubeconfig: {}", e),
            )
        })?;
    config.connect_timeout = Some(connect_timeout);
    config.read_timeout = Some(read_timeout);
    Client::try_from(config).map_err(|e| {
        Error::internal_with_context("create_client", format!("failed to create client: {}", e))
    })
}

/// Poll until a condition is met or timeout is reached
///
/// Repeatedly calls `check_fn` until it returns `Ok(true)` or the timeout
/// is exceeded. Errors from the check are treated as "not yet" and logged
/// at trace level, since polling failures are expected while a component
/// is coming up.
pub async fn poll_until<F, Fut>(
    timeout: Duration,
    poll_interval: Duration,
    timeout_msg: impl Into<String>,
    mut check_fn: F,
) -> Result<(), Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool, Error>>,
{
    let start = std::time::Instant::now();
    let timeout_msg = timeout_msg.into();

    loop {
        if start.elapsed() > timeout {
            return Err(Error::internal_with_context("poll_until", timeout_msg));
        }

        match check_fn().await {
            Ok(true) => return Ok(()),
            Ok(false) => {
                trace!("Polling condition not yet met, retrying...");
            }
            Err(e) => {
                trace!("Polling check returned error (retrying): {}", e);
            }
        }

        tokio::time::sleep(poll_interval).await;
    }
}

/// Trait for types that have condition-like fields (type and status)
pub trait HasConditionFields {
    /// Get the condition type field value
    fn type_field(&self) -> &str;
    /// Get the condition status field value
    fn status_field(&self) -> &str;
}

impl HasConditionFields for k8s_openapi::api::core::v1::NodeCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

impl HasConditionFields for k8s_openapi::api::apps::v1::DeploymentCondition {
    fn type_field(&self) -> &str {
        &self.type_
    }
    fn status_field(&self) -> &str {
        &self.status
    }
}

/// Check if a Kubernetes condition of the given type has status "True"
pub fn has_condition<T>(conditions: Option<&[T]>, condition_type: &str) -> bool
where
    T: HasConditionFields,
{
    conditions
        .map(|conds| {
            conds
                .iter()
                .any(|c| c.type_field() == condition_type && c.status_field() == STATUS_TRUE)
        })
        .unwrap_or(false)
}

/// Check whether the cluster has at least one node and all nodes are Ready
pub async fn all_nodes_ready(client: &Client) -> Result<bool, Error> {
    let nodes: Api<Node> = Api::all(client.clone());

    let node_list = nodes.list(&ListParams::default()).await.map_err(|e| {
        Error::internal_with_context("all_nodes_ready", format!("Failed to list nodes: {}", e))
    })?;

    if node_list.items.is_empty() {
        return Ok(false);
    }

    Ok(node_list.items.iter().all(|node| {
        let conditions = node.status.as_ref().and_then(|s| s.conditions.as_ref());
        has_condition(conditions.map(|c| c.as_slice()), CONDITION_READY)
    }))
}

/// Wait for all nodes to be ready
pub async fn wait_for_nodes_ready(client: &Client, timeout: Duration) -> Result<(), Error> {
    poll_until(
        timeout,
        DEFAULT_POLL_INTERVAL,
        "Timeout waiting for nodes to be ready",
        || async { all_nodes_ready(client).await },
    )
    .await
}

/// Check whether a deployment currently reports the Available condition
///
/// A deployment that doesn't exist yet is "not available", not an error.
pub async fn deployment_available(
    client: &Client,
    name: &str,
    namespace: &str,
) -> Result<bool, Error> {
    let deployments: Api<Deployment> = Api::namespaced(client.clone(), namespace);

    match deployments.get(name).await {
        Ok(deployment) => {
            let conditions = deployment
                .status
                .as_ref()
                .and_then(|s| s.conditions.as_ref());
            Ok(has_condition(
                conditions.map(|c| c.as_slice()),
                CONDITION_AVAILABLE,
            ))
        }
        Err(kube::Error::Api(e)) if e.code == 404 => {
            trace!("Deployment {} not found yet", name);
            Ok(false)
        }
        Err(e) => Err(Error::internal_with_context(
            "deployment_available",
            format!("Failed to get deployment {}: {}", name, e),
        )),
    }
}

/// Ensure a namespace exists (idempotent).
///
/// Uses server-side apply so it never fails on "already exists" and
/// doesn't race with concurrent creators.
pub async fn ensure_namespace(client: &Client, name: &str) -> Result<(), Error> {
    let api: Api<Namespace> = Api::all(client.clone());
    let ns = serde_json::json!({
        "apiVersion": "v1",
        "kind": "Namespace",
        "metadata": { "name": name }
    });
    api.patch(name, &PatchParams::apply(FIELD_MANAGER), &Patch::Apply(&ns))
        .await?;
    Ok(())
}

/// Get a secret data value (kube-rs returns the bytes already decoded)
pub async fn get_secret_data(
    client: &Client,
    name: &str,
    namespace: &str,
    key: &str,
) -> Result<Vec<u8>, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    let secret = secrets.get(name).await.map_err(|e| {
        Error::internal_with_context(
            "get_secret_data",
            format!("Failed to get secret {}/{}: {}", namespace, name, e),
        )
    })?;

    let data = secret
        .data
        .as_ref()
        .and_then(|d| d.get(key))
        .ok_or_else(|| {
            Error::internal_with_context(
                "get_secret_data",
                format!("Secret {}/{} missing key {}", namespace, name, key),
            )
        })?;

    Ok(data.0.clone())
}

/// Check if a secret exists
pub async fn secret_exists(client: &Client, name: &str, namespace: &str) -> Result<bool, Error> {
    let secrets: Api<Secret> = Api::namespaced(client.clone(), namespace);

    match secrets.get(name).await {
        Ok(_) => Ok(true),
        Err(kube::Error::Api(e)) if e.code == 404 => Ok(false),
        Err(e) => Err(Error::internal_with_context(
            "secret_exists",
            format!("Failed to check secret {}/{}: {}", namespace, name, e),
        )),
    }
}

/// Wait for a secret to exist
pub async fn wait_for_secret(
    client: &Client,
    name: &str,
    namespace: &str,
    timeout: Duration,
    poll_interval: Duration,
) -> Result<(), Error> {
    let client_clone = client.clone();
    let name_owned = name.to_string();
    let namespace_owned = namespace.to_string();

    poll_until(
        timeout,
        poll_interval,
        format!("Timeout waiting for secret {}/{}", namespace, name),
        || {
            let client = client_clone.clone();
            let name = name_owned.clone();
            let namespace = namespace_owned.clone();
            async move { secret_exists(&client, &name, &namespace).await }
        },
    )
    .await
}

/// Parse apiVersion into (group, version)
///
/// # Examples
/// ```
/// use kickstand_common::kube_utils::parse_api_version;
///
/// let (group, version) = parse_api_version("apps/v1");
/// assert_eq!(group, "apps");
/// assert_eq!(version, "v1");
///
/// let (group, version) = parse_api_version("v1");
/// assert_eq!(group, "");
/// assert_eq!(version, "v1");
/// ```
pub fn parse_api_version(api_version: &str) -> (String, String) {
    match api_version.split_once('/') {
        Some((group, version)) => (group.to_string(), version.to_string()),
        None => (String::new(), api_version.to_string()),
    }
}

/// Irregular resource pluralizations not covered by the suffix rules
const KIND_PLURALS: &[(&str, &str)] = &[("endpoints", "endpoints")];

/// Pluralize a Kubernetes resource kind
pub fn pluralize_kind(kind: &str) -> String {
    let lower = kind.to_lowercase();

    for (singular, plural) in KIND_PLURALS {
        if *singular == lower {
            return (*plural).to_string();
        }
    }

    if lower.ends_with('s') || lower.ends_with("ch") || lower.ends_with("sh") {
        format!("{}es", lower)
    } else if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") {
        format!("{}ies", &lower[..lower.len() - 1])
    } else {
        format!("{}s", lower)
    }
}

/// Cluster-scoped kinds this tool may encounter in addon manifest sets.
///
/// Everything else is assumed namespaced when deciding whether to inject
/// a default namespace into a manifest that doesn't carry one.
const CLUSTER_SCOPED_KINDS: &[&str] = &[
    "Namespace",
    "CustomResourceDefinition",
    "ClusterRole",
    "ClusterRoleBinding",
    "IngressClass",
    "PriorityClass",
    "StorageClass",
    "ValidatingWebhookConfiguration",
    "MutatingWebhookConfiguration",
    "APIService",
];

/// Whether a kind is cluster-scoped (not namespaced)
pub fn is_cluster_scoped_kind(kind: &str) -> bool {
    CLUSTER_SCOPED_KINDS.contains(&kind)
}

/// Build an ApiResource from a known apiVersion and kind.
///
/// The version you provide is used exactly; this is for manifests that
/// carry an explicit apiVersion.
pub fn build_api_resource(api_version: &str, kind: &str) -> ApiResource {
    let (group, version) = parse_api_version(api_version);
    ApiResource {
        group,
        version,
        kind: kind.to_string(),
        api_version: api_version.to_string(),
        plural: pluralize_kind(kind),
    }
}

/// Parsed manifest metadata for applying to Kubernetes
#[derive(Debug, Clone)]
pub struct ManifestMetadata {
    /// The parsed JSON value
    pub value: serde_json::Value,
    /// Resource name
    pub name: String,
    /// Optional namespace
    pub namespace: Option<String>,
    /// API resource definition
    pub api_resource: ApiResource,
}

/// Parse a manifest (JSON or YAML) and extract its metadata
pub fn parse_manifest(manifest: &str) -> Result<ManifestMetadata, Error> {
    let value: serde_json::Value = if manifest.trim_start().starts_with('{') {
        serde_json::from_str(manifest).map_err(|e| {
            Error::internal_with_context(
                "parse_manifest",
                format!("Failed to parse manifest as JSON: {}", e),
            )
        })?
    } else {
        serde_yaml::from_str(manifest).map_err(|e| {
            Error::internal_with_context(
                "parse_manifest",
                format!("Failed to parse manifest as YAML: {}", e),
            )
        })?
    };

    let api_version = value
        .get("apiVersion")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::internal_with_context("parse_manifest", "Manifest missing apiVersion")
        })?
        .to_string();

    let kind = value
        .get("kind")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::internal_with_context("parse_manifest", "Manifest missing kind"))?
        .to_string();

    let name = value
        .pointer("/metadata/name")
        .and_then(|v| v.as_str())
        .ok_or_else(|| {
            Error::internal_with_context("parse_manifest", "Manifest missing metadata.name")
        })?
        .to_string();

    let namespace = value
        .pointer("/metadata/namespace")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string());

    let api_resource = build_api_resource(&api_version, &kind);

    Ok(ManifestMetadata {
        value,
        name,
        namespace,
        api_resource,
    })
}

/// Apply parsed manifest metadata using server-side apply.
///
/// A namespaced resource without a namespace of its own lands in
/// `default_namespace` (the manifest is patched so the apply and the
/// API path agree).
async fn apply_parsed(
    client: &Client,
    mut metadata: ManifestMetadata,
    default_namespace: Option<&str>,
) -> Result<(), Error> {
    let kind = metadata.api_resource.kind.clone();

    if metadata.namespace.is_none() && !is_cluster_scoped_kind(&kind) {
        if let Some(ns) = default_namespace {
            if let Some(meta) = metadata
                .value
                .get_mut("metadata")
                .and_then(|m| m.as_object_mut())
            {
                meta.insert(
                    "namespace".to_string(),
                    serde_json::Value::String(ns.to_string()),
                );
            }
            metadata.namespace = Some(ns.to_string());
        }
    }

    let patch_params = PatchParams::apply(FIELD_MANAGER).force();
    let api: Api<DynamicObject> = match &metadata.namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &metadata.api_resource),
        None => Api::all_with(client.clone(), &metadata.api_resource),
    };

    api.patch(
        &metadata.name,
        &patch_params,
        &Patch::Apply(&metadata.value),
    )
    .await
    .map_err(|e| {
        Error::internal_with_context(
            "apply_manifest",
            format!("Failed to apply {}/{}: {}", kind, metadata.name, e),
        )
    })?;

    trace!(kind = %kind, name = %metadata.name, "applied manifest");
    Ok(())
}

/// Apply a single manifest using server-side apply
pub async fn apply_manifest(client: &Client, manifest: &str) -> Result<(), Error> {
    let metadata = parse_manifest(manifest)?;
    apply_parsed(client, metadata, None).await
}

/// Get priority for a Kubernetes resource kind (lower = apply first)
///
/// Foundational resources (namespaces, CRDs, RBAC) must land before the
/// workloads that reference them.
pub fn kind_priority(kind: &str) -> u8 {
    match kind {
        "Namespace" => 0,
        "CustomResourceDefinition" => 1,
        "ServiceAccount" => 2,
        "ClusterRole" | "Role" => 3,
        "ClusterRoleBinding" | "RoleBinding" => 4,
        "ConfigMap" | "Secret" => 5,
        "NetworkPolicy" => 6,
        "Service" => 7,
        "Deployment" | "DaemonSet" | "StatefulSet" => 8,
        _ => 10,
    }
}

/// Extract kind from a YAML or JSON manifest (fast, no full parse)
pub fn extract_kind(manifest: &str) -> &str {
    for line in manifest.lines() {
        let trimmed = line.trim();

        // YAML: `kind: Foo`
        if let Some(value) = trimmed.strip_prefix("kind:") {
            return value.trim();
        }

        // JSON (pretty-printed): `"kind": "Foo"` or `"kind": "Foo",`
        if let Some(rest) = trimmed.strip_prefix("\"kind\":") {
            let rest = rest.trim().trim_start_matches('"');
            if let Some(end) = rest.find('"') {
                return &rest[..end];
            }
        }
    }

    ""
}

/// Apply a multi-document YAML manifest (documents separated by ---)
///
/// Documents are sorted by [`kind_priority`] so namespaces, CRDs, and
/// RBAC land before the workloads that reference them. Namespaced
/// resources without a namespace of their own land in
/// `default_namespace`.
pub async fn apply_manifests(
    client: &Client,
    manifests: &str,
    default_namespace: Option<&str>,
) -> Result<(), Error> {
    let mut docs: Vec<&str> = manifests
        .split("\n---")
        .map(str::trim)
        // Skip non-manifest documents (empty, comments-only, etc.)
        .filter(|doc| doc.contains("apiVersion"))
        .collect();

    docs.sort_by_key(|doc| kind_priority(extract_kind(doc)));

    for doc in docs {
        let metadata = parse_manifest(doc)?;
        apply_parsed(client, metadata, default_namespace).await?;
    }
    Ok(())
}

/// Apply a manifest with retry (supports multi-document YAML)
///
/// Retries until the apply succeeds or the timeout elapses. Used where a
/// webhook or a just-created CRD may not be serving yet.
pub async fn apply_manifest_with_retry(
    client: &Client,
    manifest: &str,
    timeout: Duration,
) -> Result<(), Error> {
    use std::sync::Arc;
    use tokio::sync::Mutex;

    let client_clone = client.clone();
    let manifest_owned = manifest.to_string();
    let last_error: Arc<Mutex<Option<String>>> = Arc::new(Mutex::new(None));
    let last_error_clone = last_error.clone();

    let result = poll_until(
        timeout,
        APPLY_RETRY_INTERVAL,
        "Timeout waiting for apply",
        || {
            let client = client_clone.clone();
            let manifest = manifest_owned.clone();
            let last_error = last_error_clone.clone();
            async move {
                match apply_manifests(&client, &manifest, None).await {
                    Ok(()) => Ok(true),
                    Err(e) => {
                        let error_msg = e.to_string();
                        warn!("Apply failed (will retry): {}", error_msg);
                        *last_error.lock().await = Some(error_msg);
                        Ok(false)
                    }
                }
            }
        },
    )
    .await;

    if result.is_err() {
        if let Some(err) = last_error.lock().await.take() {
            return Err(Error::internal_with_context(
                "apply_manifest_with_retry",
                format!("Timeout applying manifest. Last error: {}", err),
            ));
        }
    }

    result
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_api_version_with_group() {
        let (group, version) = parse_api_version("argoproj.io/v1alpha1");
        assert_eq!(group, "argoproj.io");
        assert_eq!(version, "v1alpha1");
    }

    #[test]
    fn test_parse_api_version_core() {
        let (group, version) = parse_api_version("v1");
        assert_eq!(group, "");
        assert_eq!(version, "v1");
    }

    #[test]
    fn test_pluralize_kind() {
        assert_eq!(pluralize_kind("Deployment"), "deployments");
        assert_eq!(pluralize_kind("NetworkPolicy"), "networkpolicies");
        assert_eq!(pluralize_kind("IngressClass"), "ingressclasses");
        assert_eq!(
            pluralize_kind("CustomResourceDefinition"),
            "customresourcedefinitions"
        );
        assert_eq!(pluralize_kind("Endpoints"), "endpoints");
    }

    #[test]
    fn test_build_api_resource() {
        let ar = build_api_resource("argoproj.io/v1alpha1", "Application");
        assert_eq!(ar.group, "argoproj.io");
        assert_eq!(ar.version, "v1alpha1");
        assert_eq!(ar.plural, "applications");
        assert_eq!(ar.api_version, "argoproj.io/v1alpha1");
    }

    #[test]
    fn test_parse_manifest_yaml() {
        let manifest = r#"apiVersion: apps/v1
kind: Deployment
metadata:
  name: ingress-nginx-controller
  namespace: ingress-nginx
spec:
  replicas: 1
"#;
        let meta = parse_manifest(manifest).unwrap();
        assert_eq!(meta.name, "ingress-nginx-controller");
        assert_eq!(meta.namespace.as_deref(), Some("ingress-nginx"));
        assert_eq!(meta.api_resource.kind, "Deployment");
        assert_eq!(meta.api_resource.group, "apps");
    }

    #[test]
    fn test_parse_manifest_json() {
        let manifest = r#"{
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {"name": "argocd-cm", "namespace": "argocd"}
        }"#;
        let meta = parse_manifest(manifest).unwrap();
        assert_eq!(meta.name, "argocd-cm");
        assert_eq!(meta.api_resource.plural, "configmaps");
    }

    #[test]
    fn test_parse_manifest_missing_name() {
        let manifest = "apiVersion: v1\nkind: ConfigMap\nmetadata: {}\n";
        assert!(parse_manifest(manifest).is_err());
    }

    #[test]
    fn test_extract_kind_yaml_and_json() {
        assert_eq!(extract_kind("apiVersion: v1\nkind: Service\n"), "Service");
        assert_eq!(
            extract_kind("{\n  \"kind\": \"Deployment\",\n}"),
            "Deployment"
        );
        assert_eq!(extract_kind("no kind here"), "");
    }

    #[test]
    fn test_kind_priority_ordering() {
        // CRDs before RBAC, RBAC before workloads
        assert!(kind_priority("CustomResourceDefinition") < kind_priority("ServiceAccount"));
        assert!(kind_priority("ServiceAccount") < kind_priority("Deployment"));
        assert!(kind_priority("Service") < kind_priority("StatefulSet"));
        // Unknown kinds apply last
        assert!(kind_priority("Application") > kind_priority("Deployment"));
    }

    #[test]
    fn test_cluster_scoped_kinds() {
        assert!(is_cluster_scoped_kind("ClusterRole"));
        assert!(is_cluster_scoped_kind("CustomResourceDefinition"));
        assert!(!is_cluster_scoped_kind("Deployment"));
        assert!(!is_cluster_scoped_kind("ServiceAccount"));
    }

    #[test]
    fn test_has_condition() {
        use k8s_openapi::api::apps::v1::DeploymentCondition;

        let conditions = vec![DeploymentCondition {
            type_: "Available".to_string(),
            status: "True".to_string(),
            ..Default::default()
        }];
        assert!(has_condition(
            Some(conditions.as_slice()),
            CONDITION_AVAILABLE
        ));
        assert!(!has_condition(Some(conditions.as_slice()), "Progressing"));
        assert!(!has_condition::<DeploymentCondition>(None, CONDITION_AVAILABLE));
    }
}
