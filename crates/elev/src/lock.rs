//! Broker singleton lock.
//!
//! At most one broker may run per socket. The guarantee comes from an
//! exclusive `flock` on a well-known lock file, acquired non-blockingly at
//! startup and held for the broker's whole lifetime. Any process may probe
//! the same file to learn whether a broker is currently running without
//! disturbing the holder.

use anyhow::{Context, Result};
use log::debug;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::os::unix::io::AsRawFd;
use std::path::{Path, PathBuf};

/// RAII handle on the broker singleton lock.
///
/// Dropping the handle releases the lock, so it must live for as long as
/// the broker accepts sessions.
#[derive(Debug)]
pub struct SingletonLock {
    file: File,
    path: PathBuf,
}

impl SingletonLock {
    /// Try to acquire the lock without blocking.
    ///
    /// Returns `Ok(None)` when another process already holds it. On
    /// success the holder's PID is written into the file for diagnostics.
    pub fn try_acquire(path: &Path) -> Result<Option<SingletonLock>> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("creating lock directory {parent:?}"))?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .with_context(|| format!("opening lock file {path:?}"))?;

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.kind() == std::io::ErrorKind::WouldBlock {
                debug!("Singleton lock at {path:?} is held elsewhere");
                return Ok(None);
            }
            return Err(err).with_context(|| format!("locking {path:?}"));
        }

        file.set_len(0).context("truncating lock file")?;
        let mut writer = &file;
        let _ = writer.write_all(std::process::id().to_string().as_bytes());
        let _ = writer.flush();

        debug!("Acquired singleton lock at {path:?}");
        Ok(Some(SingletonLock {
            file,
            path: path.to_path_buf(),
        }))
    }

    /// Probe whether some process currently holds the lock.
    ///
    /// The probe takes a shared lock: it never blocks, never disturbs a
    /// holder, and simultaneous probes from different clients are
    /// compatible with each other, so none of them can misreport a running
    /// broker. A missing or unreadable lock file means no broker is
    /// running.
    pub fn is_held(path: &Path) -> bool {
        let Ok(file) = OpenOptions::new().read(true).open(path) else {
            return false;
        };

        let rc = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_SH | libc::LOCK_NB) };
        if rc != 0 {
            return std::io::Error::last_os_error().kind() == std::io::ErrorKind::WouldBlock;
        }

        unsafe {
            libc::flock(file.as_raw_fd(), libc::LOCK_UN);
        }
        false
    }

    /// Path of the lock file this handle holds.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for SingletonLock {
    fn drop(&mut self) {
        unsafe {
            libc::flock(self.file.as_raw_fd(), libc::LOCK_UN);
        }
        debug!("Released singleton lock at {:?}", self.path);
    }
}
