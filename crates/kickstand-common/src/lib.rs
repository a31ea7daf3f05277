//! Common types for kickstand: errors and Kubernetes utilities

#![deny(missing_docs)]

pub mod error;
pub mod kube_utils;

pub use error::Error;

/// Result type alias using our custom Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Namespace the GitOps controller is installed into
pub const GITOPS_NAMESPACE: &str = "argocd";

/// Name of the GitOps controller's API/UI server deployment and service
pub const GITOPS_SERVER: &str = "argocd-server";

/// Secret holding the GitOps controller's generated admin credential
pub const GITOPS_ADMIN_SECRET: &str = "argocd-initial-admin-secret";

/// Field manager name used for all server-side apply patches
pub const FIELD_MANAGER: &str = "kickstand";
