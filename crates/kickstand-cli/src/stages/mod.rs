//! Stage definitions for the provisioning flow

pub mod addons;
pub mod app;
pub mod cluster;

use std::process::Stdio;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tracing::info;

use crate::{Error, Result};

/// Run an external tool, streaming its stdout into the log
pub(crate) async fn run_streaming(program: &str, args: &[&str]) -> Result<()> {
    let mut child = Command::new(program)
        .args(args)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    if let Some(stdout) = child.stdout.take() {
        let reader = BufReader::new(stdout);
        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            info!("{}", line);
        }
    }

    let status = child.wait().await?;
    if !status.success() {
        return Err(Error::command_failed(format!(
            "{} {} failed",
            program,
            args.join(" ")
        )));
    }

    Ok(())
}

/// Run an external tool, capturing stdout; stderr lands in the error
pub(crate) async fn run_capture(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program).args(args).output().await?;

    if !output.status.success() {
        return Err(Error::command_failed(format!(
            "{} {} failed: {}",
            program,
            args.join(" "),
            String::from_utf8_lossy(&output.stderr)
        )));
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
