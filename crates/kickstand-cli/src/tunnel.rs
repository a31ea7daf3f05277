//! Background tunnel management
//!
//! Spawns a detached `kubectl port-forward` to the GitOps controller UI
//! and persists its PID to a fixed per-environment handle file, so a
//! later `kickstand stop` invocation can find and terminate it even if
//! this process is long gone. Stop is defensive: a missing handle file
//! or an already-dead process is a successful no-op.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, info, warn};

use kickstand_common::{GITOPS_NAMESPACE, GITOPS_SERVER};

use crate::config::TunnelConfig;
use crate::context::ProvisioningContext;
use crate::stage::Stage;
use crate::{Error, Result};

/// How long the spawned process gets to fail fast before we trust it
const STARTUP_GRACE: Duration = Duration::from_secs(2);

/// Handle to a running background tunnel
#[derive(Debug, Clone)]
pub struct TunnelHandle {
    /// PID of the detached port-forward process
    pub pid: u32,
    /// Local port the tunnel listens on
    pub local_port: u16,
    /// Service port the tunnel forwards to
    pub remote_port: u16,
    /// Handle file the PID is persisted to
    pub pid_file: PathBuf,
}

/// Fixed handle-file path for an environment.
///
/// One file per environment name enforces the at-most-one-tunnel
/// invariant.
pub fn pid_file_path(env_name: &str) -> PathBuf {
    std::env::temp_dir().join(format!("kickstand-{}-tunnel.pid", env_name))
}

/// Read a PID from a handle file; `None` for missing or garbage content
pub fn read_pid(pid_file: &Path) -> Option<u32> {
    let raw = std::fs::read_to_string(pid_file).ok()?;
    let parsed = raw.trim().parse::<u32>().ok()?;
    if parsed == 0 {
        None
    } else {
        Some(parsed)
    }
}

/// Whether a process with this PID is currently alive
#[cfg(unix)]
pub fn pid_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    // Signal 0: existence check only
    kill(Pid::from_raw(pid as i32), None).is_ok()
}

#[cfg(not(unix))]
pub fn pid_alive(_pid: u32) -> bool {
    false
}

#[cfg(unix)]
fn terminate(pid: u32) -> Result<()> {
    use nix::sys::signal::{kill, Signal};
    use nix::unistd::Pid;

    kill(Pid::from_raw(pid as i32), Signal::SIGTERM)
        .map_err(|e| Error::command_failed(format!("failed to signal pid {}: {}", pid, e)))
}

#[cfg(not(unix))]
fn terminate(_pid: u32) -> Result<()> {
    Ok(())
}

/// Start a detached port-forward tunnel for the environment.
///
/// Any stale handle for the same environment is reaped first. The
/// spawned process is given a short grace window to fail fast (bad
/// service name, dead cluster) before the PID is persisted.
pub async fn start(
    env_name: &str,
    kubeconfig: &Path,
    config: &TunnelConfig,
) -> Result<TunnelHandle> {
    let pid_file = pid_file_path(env_name);

    // At most one tunnel per environment: reap whatever the handle file
    // points at before starting a new one.
    stop_persisted(&pid_file)?;

    let kubeconfig = kubeconfig.to_str().ok_or_else(|| {
        Error::command_failed("kubeconfig path contains invalid UTF-8")
    })?;

    // std Command, not tokio: the child must outlive this process and
    // its runtime if the user asks for that.
    let mut child = std::process::Command::new("kubectl")
        .args([
            "--kubeconfig",
            kubeconfig,
            "port-forward",
            &format!("svc/{}", GITOPS_SERVER),
            &format!("{}:{}", config.local_port, config.remote_port),
            "-n",
            GITOPS_NAMESPACE,
        ])
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .spawn()?;

    let pid = child.id();

    tokio::time::sleep(STARTUP_GRACE).await;
    if let Some(status) = child.try_wait()? {
        return Err(Error::command_failed(format!(
            "port-forward exited during startup (status: {})",
            status
        )));
    }

    std::fs::write(&pid_file, format!("{}\n", pid))?;
    info!(
        "tunnel started: localhost:{} -> {}/{}:{} (pid {})",
        config.local_port, GITOPS_NAMESPACE, GITOPS_SERVER, config.remote_port, pid
    );

    Ok(TunnelHandle {
        pid,
        local_port: config.local_port,
        remote_port: config.remote_port,
        pid_file,
    })
}

/// Stop whatever process the handle file points at and remove the file.
///
/// Defensive on every path: no file, unreadable content, or a dead
/// process are all successful no-ops. The PID is never trusted blindly
/// (0/1 and garbage are ignored, the file just gets cleaned up).
pub fn stop_persisted(pid_file: &Path) -> Result<()> {
    if !pid_file.exists() {
        return Ok(());
    }

    match read_pid(pid_file) {
        Some(pid) if pid > 1 && pid_alive(pid) => {
            debug!("terminating tunnel pid {}", pid);
            terminate(pid)?;
        }
        Some(pid) => {
            debug!("tunnel pid {} already gone", pid);
        }
        None => {
            debug!("handle file {} held no usable pid", pid_file.display());
        }
    }

    if let Err(e) = std::fs::remove_file(pid_file) {
        // A concurrent stop may have beaten us to it
        if e.kind() != std::io::ErrorKind::NotFound {
            return Err(e.into());
        }
    }
    Ok(())
}

/// Stop a tunnel via its handle
pub fn stop(handle: &TunnelHandle) -> Result<()> {
    stop_persisted(&handle.pid_file)
}

/// Stop the context's tunnel exactly once, best-effort.
///
/// Taking the handle out of the context makes a second call a no-op;
/// stop failures are logged and never escalated.
pub fn finalize(ctx: &mut ProvisioningContext) {
    if let Some(handle) = ctx.tunnel.take() {
        if let Err(e) = stop(&handle) {
            warn!("failed to stop tunnel: {}", e);
        } else {
            info!("tunnel stopped");
        }
    }
}

/// The stage that opens the tunnel after the application is deployed
pub struct TunnelStage {
    config: TunnelConfig,
}

impl TunnelStage {
    /// Build the tunnel stage from config
    pub fn new(config: TunnelConfig) -> Self {
        Self { config }
    }
}

#[async_trait]
impl Stage for TunnelStage {
    fn name(&self) -> &str {
        "tunnel"
    }

    async fn action(&self, ctx: &mut ProvisioningContext) -> Result<()> {
        let handle = start(&ctx.env_name, &ctx.kubeconfig_path, &self.config).await?;
        ctx.tunnel = Some(handle);
        Ok(())
    }

    async fn check_ready(&self, ctx: &mut ProvisioningContext) -> Result<bool> {
        Ok(ctx
            .tunnel
            .as_ref()
            .map(|h| pid_alive(h.pid))
            .unwrap_or(false))
    }

    fn readiness_timeout(&self) -> std::time::Duration {
        Duration::from_secs(30)
    }

    fn poll_interval(&self) -> std::time::Duration {
        Duration::from_secs(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_pid_file(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("kickstand-test-{}-{}.pid", name, std::process::id()))
    }

    #[test]
    fn test_read_pid_roundtrip() {
        let path = scratch_pid_file("roundtrip");
        std::fs::write(&path, "12345\n").unwrap();
        assert_eq!(read_pid(&path), Some(12345));
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_pid_rejects_garbage() {
        let path = scratch_pid_file("garbage");
        std::fs::write(&path, "not a pid\n").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::write(&path, "0\n").unwrap();
        assert_eq!(read_pid(&path), None);
        std::fs::remove_file(&path).unwrap();
    }

    #[test]
    fn test_read_pid_missing_file() {
        assert_eq!(read_pid(Path::new("/nonexistent/kickstand.pid")), None);
    }

    #[test]
    fn test_stop_persisted_missing_file_is_noop() {
        let path = scratch_pid_file("missing");
        assert!(stop_persisted(&path).is_ok());
    }

    #[test]
    fn test_stop_persisted_garbage_file_is_cleaned_up() {
        let path = scratch_pid_file("cleanup");
        std::fs::write(&path, "garbage\n").unwrap();
        assert!(stop_persisted(&path).is_ok());
        assert!(!path.exists());
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_persisted_kills_live_process() {
        let mut child = std::process::Command::new("sleep")
            .arg("60")
            .spawn()
            .unwrap();
        let pid = child.id();

        let path = scratch_pid_file("live");
        std::fs::write(&path, format!("{}\n", pid)).unwrap();

        stop_persisted(&path).unwrap();
        assert!(!path.exists());

        // The child exits once SIGTERM is delivered; reap it so the
        // liveness assertion isn't confused by a zombie.
        let status = child.wait().unwrap();
        assert!(!status.success());
        assert!(!pid_alive(pid));
    }

    #[cfg(unix)]
    #[test]
    fn test_stop_persisted_dead_pid_is_noop() {
        // Spawn and fully reap a process so its PID is known-dead
        let mut child = std::process::Command::new("true").spawn().unwrap();
        let pid = child.id();
        child.wait().unwrap();

        let path = scratch_pid_file("dead");
        std::fs::write(&path, format!("{}\n", pid)).unwrap();

        assert!(stop_persisted(&path).is_ok());
        assert!(!path.exists());
    }

    #[test]
    fn test_pid_file_path_is_per_environment() {
        assert_ne!(pid_file_path("alpha"), pid_file_path("beta"));
    }

    #[test]
    fn test_finalize_is_exactly_once() {
        let mut ctx = ProvisioningContext::new("finalize-test");
        let path = scratch_pid_file("finalize");
        std::fs::write(&path, "99999999\n").unwrap();

        ctx.tunnel = Some(TunnelHandle {
            pid: 99_999_999,
            local_port: 8081,
            remote_port: 443,
            pid_file: path.clone(),
        });

        finalize(&mut ctx);
        assert!(ctx.tunnel.is_none());
        assert!(!path.exists());

        // Second call has nothing to do
        finalize(&mut ctx);
        assert!(ctx.tunnel.is_none());
    }
}
