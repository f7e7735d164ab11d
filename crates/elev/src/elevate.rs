//! On-demand elevated broker launch.
//!
//! The client relaunches its own executable in broker mode through an
//! elevation front end (pkexec, falling back to sudo). The front end may
//! prompt the user; a denial is detected from the front end exiting
//! quickly with its authorization-failure codes.

use log::{debug, info};
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

/// Exit codes with which pkexec reports an authorization failure:
/// 126 when the user dismissed the prompt, 127 when not authorized.
const PKEXEC_DISMISSED: i32 = 126;
const PKEXEC_NOT_AUTHORIZED: i32 = 127;

/// How long to watch the front end for a fast denial exit before assuming
/// the broker is coming up behind it.
const DENIAL_WATCH_PROBES: u32 = 10;
const DENIAL_WATCH_INTERVAL: Duration = Duration::from_millis(100);

/// Failures launching the elevated broker.
#[derive(Debug, thiserror::Error)]
pub enum ElevationError {
    /// Neither pkexec nor sudo is on PATH.
    #[error("no elevation front end found (tried pkexec, sudo)")]
    NoLauncher,
    /// The user declined the elevation prompt.
    #[error("elevation denied by the user")]
    Denied,
    /// The broker process exited immediately instead of serving.
    #[error("elevated broker exited immediately with code {0}")]
    Exited(i32),
    /// The front end itself could not be started.
    #[error("failed to start elevation front end")]
    Launch(#[from] std::io::Error),
}

/// Launch an elevated broker serving `socket_path`, detached from this
/// process.
///
/// Returns once the front end has survived its denial window; broker
/// readiness is established by the caller's subsequent connect (which has
/// its own bounded wait).
pub async fn launch_elevated_broker(socket_path: &Path) -> Result<(), ElevationError> {
    let exe = std::env::current_exe()?;
    let launcher = find_launcher().ok_or(ElevationError::NoLauncher)?;
    info!("Launching elevated broker via {launcher}");

    let mut child = Command::new(launcher)
        .arg(&exe)
        .arg("serve")
        .arg("--socket")
        .arg(socket_path)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .spawn()?;

    // A denial makes the front end exit within moments; a real broker
    // keeps running past this window.
    for _ in 0..DENIAL_WATCH_PROBES {
        tokio::time::sleep(DENIAL_WATCH_INTERVAL).await;
        if let Some(status) = child.try_wait()? {
            return match status.code() {
                Some(PKEXEC_DISMISSED) | Some(PKEXEC_NOT_AUTHORIZED) => {
                    Err(ElevationError::Denied)
                }
                Some(0) | None => Ok(()),
                Some(code) => Err(ElevationError::Exited(code)),
            };
        }
    }

    debug!("Elevated broker launch in progress (pid {:?})", child.id());
    Ok(())
}

/// First elevation front end present on PATH.
fn find_launcher() -> Option<&'static str> {
    ["pkexec", "sudo"].into_iter().find(|name| on_path(name))
}

fn on_path(name: &str) -> bool {
    let Some(paths) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&paths).any(|dir| dir.join(name).is_file())
}
