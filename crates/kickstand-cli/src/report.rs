//! Final run summary
//!
//! Pure output formatting. A missing credential degrades to a warning;
//! nothing here can fail a run that already succeeded.

use std::fmt::Write;

use tracing::warn;

use kickstand_common::{GITOPS_ADMIN_SECRET, GITOPS_NAMESPACE};

use crate::config::EnvironmentConfig;
use crate::context::ProvisioningContext;

/// Render the summary block for a successful run
pub fn format_summary(config: &EnvironmentConfig, ctx: &ProvisioningContext) -> String {
    let mut out = String::new();

    let _ = writeln!(out);
    let _ = writeln!(out, "environment '{}' is ready", ctx.env_name);
    let _ = writeln!(out);
    let _ = writeln!(
        out,
        "  ingress:      http://localhost:{}  https://localhost:{}",
        config.http_port, config.https_port
    );
    let _ = writeln!(
        out,
        "  gitops ui:    https://localhost:{}  (user: admin)",
        config.tunnel.local_port
    );
    let _ = writeln!(
        out,
        "  application:  {} -> namespace '{}'",
        config.app.name, config.app.namespace
    );
    let _ = writeln!(out, "  kubeconfig:   {}", ctx.kubeconfig_path.display());

    if let Some(password) = &ctx.admin_password {
        let _ = writeln!(out, "  admin password: {}", password);
    }

    out
}

/// Print the summary; warn (never fail) when the credential is absent
pub fn print(config: &EnvironmentConfig, ctx: &ProvisioningContext) {
    println!("{}", format_summary(config, ctx));

    if ctx.admin_password.is_none() {
        warn!(
            "admin credential was not captured; read the {}/{} secret manually",
            GITOPS_NAMESPACE, GITOPS_ADMIN_SECRET
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_summary_with_credential() {
        let config = EnvironmentConfig::default();
        let mut ctx = ProvisioningContext::new("kickstand");
        ctx.admin_password = Some("s3cret".to_string());

        let summary = format_summary(&config, &ctx);
        assert!(summary.contains("environment 'kickstand' is ready"));
        assert!(summary.contains("http://localhost:8080"));
        assert!(summary.contains("https://localhost:8081"));
        assert!(summary.contains("admin password: s3cret"));
    }

    #[test]
    fn test_summary_without_credential_omits_password_line() {
        let config = EnvironmentConfig::default();
        let ctx = ProvisioningContext::new("kickstand");

        let summary = format_summary(&config, &ctx);
        assert!(!summary.contains("admin password"));
        // The rest of the report is unaffected
        assert!(summary.contains("gitops ui"));
    }
}
