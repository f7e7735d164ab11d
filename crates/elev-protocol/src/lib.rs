//! Broker wire protocol.
//!
//! Defines the request and reply types exchanged between an unprivileged
//! client and the elevated broker over the local Unix socket. Each session
//! carries exactly one message in each direction: the request is a single
//! newline-terminated UTF-8 line, the reply is one JSON value delimited by
//! end-of-stream. A session whose reply stream is empty is a protocol error
//! on the client side.

use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Literal request line that stops the broker. No reply is sent for it.
pub const SHUTDOWN_TOKEN: &str = "shutdown";

/// How long a client waits for a listening broker before giving up.
pub const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(20);

/// File name of the broker socket inside the runtime directory.
pub const SOCKET_FILE: &str = "broker.sock";

/// File name of the broker singleton lock, kept next to the socket.
pub const LOCK_FILE: &str = "broker.lock";

/// One parsed request line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    /// Run the named registered command.
    Run(String),
    /// Stop the broker's accept loop.
    Shutdown,
}

impl Request {
    /// Parse a raw request line. The terminating newline and surrounding
    /// whitespace are ignored; a blank line parses to `None`.
    pub fn parse(line: &str) -> Option<Request> {
        let name = line.trim();
        if name.is_empty() {
            return None;
        }
        if name == SHUTDOWN_TOKEN {
            return Some(Request::Shutdown);
        }
        Some(Request::Run(name.to_string()))
    }

    /// Wire form of the request, without the terminating newline.
    pub fn as_line(&self) -> &str {
        match self {
            Request::Run(name) => name,
            Request::Shutdown => SHUTDOWN_TOKEN,
        }
    }
}

/// Outcome of one executed command: the result envelope.
///
/// The exit code is the sole success discriminant. Callers must not infer
/// failure from a non-empty `stderr`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandOutcome {
    /// Exit code of the external program. Zero means success.
    pub exit_code: i32,
    /// Captured standard output, possibly empty.
    pub stdout: String,
    /// Captured standard error, possibly empty.
    pub stderr: String,
}

impl CommandOutcome {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Reply sent by the broker at the end of a session.
///
/// A completed command keeps the bare three-field envelope on the wire;
/// failures are a distinct object carrying an error kind. The two shapes
/// share no field names, so the untagged representation is unambiguous.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Reply {
    Outcome(CommandOutcome),
    Error(ErrorReply),
}

impl Reply {
    pub fn error(kind: ErrorKind, message: impl Into<String>) -> Reply {
        Reply::Error(ErrorReply {
            kind,
            message: message.into(),
        })
    }
}

/// Error reply from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorReply {
    /// Error category.
    pub kind: ErrorKind,
    /// Human-readable error message.
    pub message: String,
}

/// Error categories a broker can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The request line named no registered command.
    Unrecognized,
    /// The external program behind the command could not be launched.
    ExecFailed,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_run_request() {
        assert_eq!(
            Request::parse("sessions\n"),
            Some(Request::Run("sessions".to_string()))
        );
        assert_eq!(
            Request::parse("  net-session  "),
            Some(Request::Run("net-session".to_string()))
        );
    }

    #[test]
    fn test_parse_shutdown_request() {
        assert_eq!(Request::parse("shutdown\n"), Some(Request::Shutdown));
        // Case-sensitive: anything else is a command name.
        assert_eq!(
            Request::parse("SHUTDOWN"),
            Some(Request::Run("SHUTDOWN".to_string()))
        );
    }

    #[test]
    fn test_parse_blank_line() {
        assert_eq!(Request::parse(""), None);
        assert_eq!(Request::parse("   \n"), None);
    }

    #[test]
    fn test_request_as_line() {
        assert_eq!(Request::Run("sessions".to_string()).as_line(), "sessions");
        assert_eq!(Request::Shutdown.as_line(), "shutdown");
    }

    #[test]
    fn test_outcome_success_discriminant() {
        let ok = CommandOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: "noise on stderr".to_string(),
        };
        assert!(ok.is_success());

        let failed = CommandOutcome {
            exit_code: 2,
            stdout: "partial".to_string(),
            stderr: String::new(),
        };
        assert!(!failed.is_success());
    }

    #[test]
    fn test_outcome_roundtrip_is_byte_identical() {
        let outcome = CommandOutcome {
            exit_code: 3,
            stdout: "line one\nline two\n".to_string(),
            stderr: "warning: nope\n".to_string(),
        };

        let json = serde_json::to_string(&outcome).unwrap();
        let parsed: CommandOutcome = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, outcome);
        assert_eq!(parsed.stdout.as_bytes(), outcome.stdout.as_bytes());
        assert_eq!(parsed.stderr.as_bytes(), outcome.stderr.as_bytes());
    }

    #[test]
    fn test_success_reply_stays_three_field_envelope() {
        let reply = Reply::Outcome(CommandOutcome {
            exit_code: 0,
            stdout: "ok".to_string(),
            stderr: String::new(),
        });

        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("exit_code"));
        assert!(json.contains("stdout"));
        assert!(json.contains("stderr"));
        assert!(!json.contains("kind"));
    }

    #[test]
    fn test_error_reply_roundtrip() {
        let reply = Reply::error(ErrorKind::Unrecognized, "no such command: bogus");

        let json = serde_json::to_string(&reply).unwrap();
        assert!(json.contains("unrecognized"));

        let parsed: Reply = serde_json::from_str(&json).unwrap();
        match parsed {
            Reply::Error(e) => {
                assert_eq!(e.kind, ErrorKind::Unrecognized);
                assert!(e.message.contains("bogus"));
            }
            _ => panic!("wrong variant"),
        }
    }

    #[test]
    fn test_reply_disambiguates_without_tag() {
        let outcome_json = r#"{"exit_code":1,"stdout":"","stderr":"denied"}"#;
        let parsed: Reply = serde_json::from_str(outcome_json).unwrap();
        assert!(matches!(parsed, Reply::Outcome(_)));

        let error_json = r#"{"kind":"exec_failed","message":"launching net"}"#;
        let parsed: Reply = serde_json::from_str(error_json).unwrap();
        assert!(matches!(parsed, Reply::Error(_)));
    }
}
