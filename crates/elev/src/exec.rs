//! Privileged action executor.
//!
//! Runs one external program to completion with both output streams captured
//! in memory. The child never gets a controlling terminal; its stdin is fed
//! the optional request text and then closed.

use anyhow::{Context, Result};
use log::debug;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

use crate::registry::CommandSpec;
use elev_protocol::CommandOutcome;

/// Run `spec` to completion and capture its outcome.
///
/// A program that cannot be launched is an `Err`, never a synthetic
/// envelope. Programs that do run have their exit code reported verbatim;
/// a signal-terminated child reports -1. There is no execution timeout:
/// the call blocks for the child's full lifetime.
pub async fn run_command(spec: &CommandSpec) -> Result<CommandOutcome> {
    debug!("Executing {} {:?}", spec.program, spec.args);

    let mut cmd = Command::new(&spec.program);
    cmd.args(&spec.args)
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = cmd
        .spawn()
        .with_context(|| format!("launching {}", spec.program))?;

    if let Some(text) = &spec.stdin {
        let mut stdin = child.stdin.take().context("stdin pipe missing")?;
        stdin
            .write_all(text.as_bytes())
            .await
            .context("writing child stdin")?;
        // Dropping the handle closes the pipe so the child sees EOF.
    }

    let output = child
        .wait_with_output()
        .await
        .with_context(|| format!("waiting for {}", spec.program))?;

    Ok(CommandOutcome {
        exit_code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
        stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
    })
}
