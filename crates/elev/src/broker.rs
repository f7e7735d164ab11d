//! Broker accept loop.
//!
//! One elevated process owns the singleton lock and serves command sessions
//! over the Unix socket, strictly one at a time. A session is: read one
//! request line, act, optionally write one JSON reply, drain, close. Only
//! the `shutdown` token ends the loop; a bad session never does.

use anyhow::{Context, Result};
use log::{debug, error, info, warn};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};

use crate::exec;
use crate::lock::SingletonLock;
use crate::registry::CommandRegistry;
use elev_protocol::{ErrorKind, Reply, Request};

/// Access policy applied to the socket (and lock file) at bind time.
///
/// The socket is the security boundary: a process of another user must not
/// be able to submit commands to an elevated broker or read its replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketPolicy {
    /// Socket reachable only by the authenticated user who requested the
    /// broker: mode 0600, owned by the invoking user when the broker runs
    /// elevated (taken from `PKEXEC_UID`/`SUDO_UID`).
    CurrentUserOnly,
}

enum SessionEnd {
    Continue,
    Stop,
}

/// The broker: singleton lock holder plus the sequential accept loop.
pub struct Broker {
    lock: SingletonLock,
    registry: CommandRegistry,
    socket_path: PathBuf,
    policy: SocketPolicy,
}

impl Broker {
    /// The lock is passed in already acquired; the broker holds it until
    /// the loop ends.
    pub fn new(
        lock: SingletonLock,
        registry: CommandRegistry,
        socket_path: impl Into<PathBuf>,
        policy: SocketPolicy,
    ) -> Self {
        Self {
            lock,
            registry,
            socket_path: socket_path.into(),
            policy,
        }
    }

    /// Run the accept loop to completion.
    ///
    /// Sessions are processed one at a time: further connect attempts queue
    /// in the listener backlog until the current session ends, so no two
    /// privileged actions ever run concurrently.
    pub async fn run(self) -> Result<()> {
        let listener = bind_socket(&self.socket_path, self.policy).await?;
        apply_policy(self.lock.path(), self.policy)?;
        info!(
            "Broker listening on {:?} ({} commands registered)",
            self.socket_path,
            self.registry.len()
        );

        loop {
            let (stream, _addr) = listener.accept().await.context("accepting connection")?;
            debug!("Client connected");

            match self.serve_session(stream).await {
                Ok(SessionEnd::Stop) => {
                    info!("Shutdown requested");
                    break;
                }
                Ok(SessionEnd::Continue) => {}
                Err(err) => warn!("Session failed: {err:#}"),
            }
        }

        let _ = tokio::fs::remove_file(&self.socket_path).await;
        info!("Broker stopped");
        // Dropping self releases the singleton lock.
        Ok(())
    }

    /// One session: read the single request line, act, reply if the
    /// protocol calls for a reply.
    async fn serve_session(&self, stream: UnixStream) -> Result<SessionEnd> {
        let (reader, mut writer) = stream.into_split();
        let mut reader = BufReader::new(reader);

        let mut line = String::new();
        let n = reader
            .read_line(&mut line)
            .await
            .context("reading request line")?;
        if n == 0 {
            debug!("Client closed without sending a request");
            return Ok(SessionEnd::Continue);
        }

        let Some(request) = Request::parse(&line) else {
            debug!("Blank request line ignored");
            return Ok(SessionEnd::Continue);
        };

        match request {
            // No reply for shutdown, by contract.
            Request::Shutdown => Ok(SessionEnd::Stop),
            Request::Run(name) => {
                let reply = self.dispatch(&name).await;

                let mut json = serde_json::to_string(&reply).context("serializing reply")?;
                json.push('\n');
                writer
                    .write_all(json.as_bytes())
                    .await
                    .context("writing reply")?;
                // Drain before disconnecting so the client never sees a
                // truncated envelope.
                writer.shutdown().await.context("draining reply")?;
                Ok(SessionEnd::Continue)
            }
        }
    }

    /// Resolve and synchronously execute one command.
    async fn dispatch(&self, name: &str) -> Reply {
        let Some(spec) = self.registry.resolve(name) else {
            warn!("Unrecognized command '{name}'");
            return Reply::error(ErrorKind::Unrecognized, format!("no such command: {name}"));
        };

        match exec::run_command(spec).await {
            Ok(outcome) => {
                info!("Command '{}' exited with code {}", name, outcome.exit_code);
                Reply::Outcome(outcome)
            }
            Err(err) => {
                error!("Command '{name}' failed to execute: {err:#}");
                Reply::error(ErrorKind::ExecFailed, format!("{err:#}"))
            }
        }
    }
}

/// Bind the socket fresh, with the runtime directory and socket restricted
/// per the policy.
async fn bind_socket(path: &Path, policy: SocketPolicy) -> Result<UnixListener> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating runtime directory {parent:?}"))?;
        match policy {
            SocketPolicy::CurrentUserOnly => restrict(parent, 0o700)?,
        }
    }

    // A stale socket file from a crashed broker would fail the bind.
    let _ = tokio::fs::remove_file(path).await;

    let listener = UnixListener::bind(path).with_context(|| format!("binding to {path:?}"))?;
    apply_policy(path, policy)?;
    Ok(listener)
}

fn apply_policy(path: &Path, policy: SocketPolicy) -> Result<()> {
    match policy {
        SocketPolicy::CurrentUserOnly => restrict(path, 0o600),
    }
}

/// Restrict `path` to the authenticated user.
///
/// When the broker runs elevated, ownership goes to the user who launched
/// it. The runtime directory must be handed over along with the socket and
/// lock: a root-owned 0700 directory would block that user from ever
/// reaching the socket inside it.
fn restrict(path: &Path, mode: u32) -> Result<()> {
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(mode))
        .with_context(|| format!("restricting {path:?}"))?;

    if unsafe { libc::geteuid() } == 0 {
        if let Some((uid, gid)) = invoking_user() {
            chown(path, uid, gid)?;
        }
    }
    Ok(())
}

/// Identity of the unprivileged user behind an elevated launch, as recorded
/// by pkexec or sudo.
fn invoking_user() -> Option<(libc::uid_t, libc::gid_t)> {
    let uid = ["PKEXEC_UID", "SUDO_UID"]
        .iter()
        .find_map(|var| std::env::var(var).ok())
        .and_then(|value| value.parse::<libc::uid_t>().ok())?;
    let gid = std::env::var("SUDO_GID")
        .ok()
        .and_then(|value| value.parse::<libc::gid_t>().ok())
        .unwrap_or(uid as libc::gid_t);
    Some((uid, gid))
}

fn chown(path: &Path, uid: libc::uid_t, gid: libc::gid_t) -> Result<()> {
    use std::os::unix::ffi::OsStrExt;

    let c_path = std::ffi::CString::new(path.as_os_str().as_bytes())
        .context("socket path contains a NUL byte")?;
    let rc = unsafe { libc::chown(c_path.as_ptr(), uid, gid) };
    if rc != 0 {
        return Err(std::io::Error::last_os_error())
            .with_context(|| format!("chowning {path:?} to uid {uid}"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_bind_restricts_socket_and_directory() {
        let dir = TempDir::new().unwrap();
        let runtime_dir = dir.path().join("elev");
        let socket = runtime_dir.join("broker.sock");

        let _listener = bind_socket(&socket, SocketPolicy::CurrentUserOnly)
            .await
            .unwrap();

        let dir_mode = std::fs::metadata(&runtime_dir).unwrap().permissions().mode();
        assert_eq!(dir_mode & 0o777, 0o700);

        let sock_mode = std::fs::metadata(&socket).unwrap().permissions().mode();
        assert_eq!(sock_mode & 0o777, 0o600);
    }

    #[tokio::test]
    async fn test_bind_replaces_stale_socket_file() {
        let dir = TempDir::new().unwrap();
        let socket = dir.path().join("broker.sock");
        std::fs::write(&socket, b"stale").unwrap();

        let listener = bind_socket(&socket, SocketPolicy::CurrentUserOnly).await;
        assert!(listener.is_ok());
    }
}
