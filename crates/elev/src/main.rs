//! elev - run administrator commands through a long-lived elevated broker.
//!
//! The first invocation launches an elevated broker in the background (one
//! elevation prompt); every later invocation reuses it over the per-user
//! Unix socket.
//!
//! ## Usage
//!
//! ```bash
//! # Run a registered command (starts a broker if none is running)
//! elev sessions
//!
//! # Become the broker (expected to already run elevated)
//! elev serve
//!
//! # Stop a running broker
//! elev shutdown
//! ```
//!
//! A renamed copy (or symlink) of the binary acts as a single-purpose
//! launcher: when the executable's file stem is not `elev`, the stem itself
//! is the command to run.

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use log::{debug, info, warn};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use elev::broker::{Broker, SocketPolicy};
use elev::client::BrokerClient;
use elev::elevate;
use elev::lock::SingletonLock;
use elev::notify::{ConsoleNotifier, Notifier, Severity, present_outcome};
use elev::registry::CommandRegistry;
use elev::settings::Settings;
use elev_protocol::Reply;

const APP_NAME: &str = "elev";

fn main() -> ExitCode {
    if let Err(err) = try_main() {
        let _ = writeln!(io::stderr(), "Error: {err:?}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}

#[tokio::main(flavor = "current_thread")]
async fn try_main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let mut settings = Settings::load(cli.config.as_deref())?;
    if let Some(socket) = cli.socket {
        settings = settings.with_socket_path(socket);
    }
    debug!("resolved settings: {settings:?}");

    match cli.command {
        Some(Command::Serve) => handle_serve(&settings).await,
        Some(Command::Shutdown) => handle_shutdown(&settings).await,
        None => handle_run(&settings, cli.command_name).await,
    }
}

#[derive(Debug, Parser)]
#[command(
    name = APP_NAME,
    version,
    about = "Run administrator commands through a long-lived elevated broker.",
    args_conflicts_with_subcommands = true
)]
struct Cli {
    /// Override the config file path
    #[arg(long, value_name = "PATH", global = true)]
    config: Option<PathBuf>,

    /// Override the broker socket path
    #[arg(long, value_name = "PATH", global = true)]
    socket: Option<PathBuf>,

    /// Increase logging verbosity (stackable)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Command to submit to the broker (default mode)
    #[arg(value_name = "COMMAND")]
    command_name: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Become the broker: acquire the singleton lock and serve commands
    Serve,
    /// Stop a running broker
    Shutdown,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

/// Command implied by a renamed launcher binary, if any.
///
/// `argv[0]` rather than the resolved executable path, so symlinked
/// launchers work too.
fn launcher_command() -> Option<String> {
    command_from_argv0(&std::env::args().next()?)
}

/// The file stem of the invoked binary, unless it is the default program
/// name. A renamed copy or symlink of the binary thereby becomes a
/// single-purpose launcher for the command it is named after.
fn command_from_argv0(argv0: &str) -> Option<String> {
    let stem = Path::new(argv0).file_stem()?.to_str()?;
    if stem == APP_NAME {
        None
    } else {
        Some(stem.to_string())
    }
}

/// Run-command mode: make sure a broker exists, submit, present the result.
async fn handle_run(settings: &Settings, cli_name: Option<String>) -> Result<()> {
    // A renamed launcher wins over the positional argument.
    let Some(name) = launcher_command().or(cli_name) else {
        anyhow::bail!("no command given; usage: {APP_NAME} <command>");
    };

    if !SingletonLock::is_held(&settings.lock_path) {
        info!("No broker running; launching one");
        elevate::launch_elevated_broker(&settings.socket_path)
            .await
            .context("launching elevated broker")?;
    }

    let client = BrokerClient::new(settings.socket_path.clone(), settings.connect_timeout);
    let notifier = ConsoleNotifier;

    match client.submit(&name).await {
        Ok(Reply::Outcome(outcome)) => {
            present_outcome(&outcome, &notifier);
            Ok(())
        }
        Ok(Reply::Error(err)) => {
            notifier.notify(
                &format!("command '{name}' failed ({:?}): {}", err.kind, err.message),
                Severity::Error,
            );
            Ok(())
        }
        Err(err) => Err(err).context("Fatal error"),
    }
}

/// Become-broker mode: this invocation is the broker process.
async fn handle_serve(settings: &Settings) -> Result<()> {
    let Some(lock) = SingletonLock::try_acquire(&settings.lock_path)? else {
        warn!("Broker already running (lock at {:?} is held)", settings.lock_path);
        anyhow::bail!("a broker is already running");
    };

    info!(
        "Starting broker (pid={}, socket={:?})",
        std::process::id(),
        settings.socket_path
    );

    let registry = CommandRegistry::builtin();
    let broker = Broker::new(
        lock,
        registry,
        settings.socket_path.clone(),
        SocketPolicy::CurrentUserOnly,
    );
    broker.run().await
}

/// Shut-down mode: fire-and-forget if a broker is running, otherwise no-op.
async fn handle_shutdown(settings: &Settings) -> Result<()> {
    if !SingletonLock::is_held(&settings.lock_path) {
        info!("No broker running; nothing to do");
        return Ok(());
    }

    let client = BrokerClient::new(settings.socket_path.clone(), settings.connect_timeout);
    client
        .send_shutdown()
        .await
        .context("sending shutdown request")?;
    info!("Shutdown request sent");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_program_name_implies_no_launcher_command() {
        assert_eq!(command_from_argv0("elev"), None);
        assert_eq!(command_from_argv0("/usr/local/bin/elev"), None);
        assert_eq!(command_from_argv0("./elev"), None);
    }

    #[test]
    fn test_renamed_launcher_stem_is_the_command() {
        assert_eq!(
            command_from_argv0("net-session"),
            Some("net-session".to_string())
        );
        assert_eq!(command_from_argv0("./sessions"), Some("sessions".to_string()));
        assert_eq!(
            command_from_argv0("/opt/tools/sessions"),
            Some("sessions".to_string())
        );
    }

    #[test]
    fn test_launcher_extension_is_stripped() {
        assert_eq!(command_from_argv0("/opt/tools/elev.bin"), None);
        assert_eq!(
            command_from_argv0("sessions.bin"),
            Some("sessions".to_string())
        );
    }
}
