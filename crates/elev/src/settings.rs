//! Runtime settings.
//!
//! Defaults point at the per-user runtime directory; an optional TOML
//! config file and `ELEV_*` environment variables may override them.
//! The lock file always lives next to the socket, so client and broker
//! agree on both paths even when the socket is overridden.

use anyhow::{Context, Result};
use config::{Config, Environment, File, FileFormat};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use elev_protocol::{DEFAULT_CONNECT_TIMEOUT, LOCK_FILE, SOCKET_FILE};

/// Raw overrides as they appear in the config file / environment.
#[derive(Debug, Default, Deserialize)]
struct RawSettings {
    runtime_dir: Option<PathBuf>,
    socket_path: Option<PathBuf>,
    connect_timeout_secs: Option<u64>,
}

/// Resolved settings used by both client and broker modes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Settings {
    pub runtime_dir: PathBuf,
    pub socket_path: PathBuf,
    pub lock_path: PathBuf,
    pub connect_timeout: Duration,
}

impl Settings {
    /// Resolve settings: built-in defaults, then the config file (the
    /// given one, required; or the default location, optional), then
    /// `ELEV_*` environment variables.
    pub fn load(config_file: Option<&Path>) -> Result<Settings> {
        let mut builder = Config::builder();
        if let Some(path) = config_file {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(true));
        } else if let Some(path) = default_config_file() {
            builder = builder.add_source(File::from(path).format(FileFormat::Toml).required(false));
        }
        builder = builder.add_source(Environment::with_prefix("ELEV"));

        let raw: RawSettings = builder
            .build()
            .context("loading configuration")?
            .try_deserialize()
            .context("parsing configuration")?;
        Ok(Self::from_raw(raw))
    }

    /// Override the socket path, keeping the lock file next to it.
    pub fn with_socket_path(mut self, socket_path: impl Into<PathBuf>) -> Settings {
        self.socket_path = socket_path.into();
        self.lock_path = lock_path_for(&self.socket_path, &self.runtime_dir);
        self
    }

    fn from_raw(raw: RawSettings) -> Settings {
        let runtime_dir = raw.runtime_dir.unwrap_or_else(default_runtime_dir);
        let socket_path = raw
            .socket_path
            .unwrap_or_else(|| runtime_dir.join(SOCKET_FILE));
        let lock_path = lock_path_for(&socket_path, &runtime_dir);
        let connect_timeout = raw
            .connect_timeout_secs
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT);

        Settings {
            runtime_dir,
            socket_path,
            lock_path,
            connect_timeout,
        }
    }
}

fn lock_path_for(socket_path: &Path, runtime_dir: &Path) -> PathBuf {
    socket_path
        .parent()
        .map(|dir| dir.join(LOCK_FILE))
        .unwrap_or_else(|| runtime_dir.join(LOCK_FILE))
}

/// Per-user runtime directory holding socket and lock.
fn default_runtime_dir() -> PathBuf {
    if let Some(dir) = dirs::runtime_dir() {
        return dir.join("elev");
    }
    let uid = unsafe { libc::geteuid() };
    std::env::temp_dir().join(format!("elev-{uid}"))
}

fn default_config_file() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("elev").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_defaults() {
        let settings = Settings::from_raw(RawSettings::default());
        assert_eq!(settings.socket_path, settings.runtime_dir.join(SOCKET_FILE));
        assert_eq!(settings.lock_path, settings.runtime_dir.join(LOCK_FILE));
        assert_eq!(settings.connect_timeout, DEFAULT_CONNECT_TIMEOUT);
    }

    #[test]
    fn test_socket_override_moves_lock_alongside() {
        let settings = Settings::from_raw(RawSettings::default())
            .with_socket_path("/tmp/elev-test/alt.sock");
        assert_eq!(
            settings.socket_path,
            PathBuf::from("/tmp/elev-test/alt.sock")
        );
        assert_eq!(
            settings.lock_path,
            PathBuf::from("/tmp/elev-test").join(LOCK_FILE)
        );
    }

    #[test]
    fn test_config_file_overrides() {
        let dir = TempDir::new().unwrap();
        let config_path = dir.path().join("config.toml");
        std::fs::write(
            &config_path,
            "runtime_dir = \"/tmp/elev-conf\"\nconnect_timeout_secs = 5\n",
        )
        .unwrap();

        let settings = Settings::load(Some(&config_path)).unwrap();
        assert_eq!(settings.runtime_dir, PathBuf::from("/tmp/elev-conf"));
        assert_eq!(
            settings.socket_path,
            PathBuf::from("/tmp/elev-conf").join(SOCKET_FILE)
        );
        assert_eq!(settings.connect_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_missing_required_config_file_errors() {
        let dir = TempDir::new().unwrap();
        let absent = dir.path().join("nope.toml");
        assert!(Settings::load(Some(&absent)).is_err());
    }
}
