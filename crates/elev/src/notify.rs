//! User-facing result presentation.
//!
//! Outcomes reach the user through a `Notifier`, not through exit codes.
//! The console implementation is always available; a desktop notification
//! implementation sits behind the `desktop-notifications` feature.

use elev_protocol::CommandOutcome;

/// How strongly to present a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// Outward notification capability.
pub trait Notifier {
    fn notify(&self, text: &str, severity: Severity);
}

/// Prints to the terminal: stdout for Info, stderr for Error.
#[derive(Debug, Default)]
pub struct ConsoleNotifier;

impl Notifier for ConsoleNotifier {
    fn notify(&self, text: &str, severity: Severity) {
        match severity {
            Severity::Info => println!("{text}"),
            Severity::Error => eprintln!("{text}"),
        }
    }
}

/// Desktop notification via the session notification daemon.
#[cfg(feature = "desktop-notifications")]
#[derive(Debug, Default)]
pub struct DesktopNotifier;

#[cfg(feature = "desktop-notifications")]
impl Notifier for DesktopNotifier {
    fn notify(&self, text: &str, severity: Severity) {
        let urgency = match severity {
            Severity::Info => notify_rust::Urgency::Normal,
            Severity::Error => notify_rust::Urgency::Critical,
        };
        let result = notify_rust::Notification::new()
            .summary("elev")
            .body(text)
            .urgency(urgency)
            .show();
        if let Err(err) = result {
            log::warn!("Desktop notification failed: {err}");
        }
    }
}

/// Present an outcome through a notifier. Severity follows the exit code
/// alone: zero is Info, anything else is Error.
pub fn present_outcome(outcome: &CommandOutcome, notifier: &dyn Notifier) {
    let severity = if outcome.is_success() {
        Severity::Info
    } else {
        Severity::Error
    };
    notifier.notify(&format_outcome(outcome), severity);
}

/// Render a command outcome the way it is shown to the user: the exit code
/// first, then whatever the command printed.
pub fn format_outcome(outcome: &CommandOutcome) -> String {
    let mut text = format!("code:{}", outcome.exit_code);
    if !outcome.stdout.is_empty() {
        text.push('\n');
        text.push_str(outcome.stdout.trim_end_matches('\n'));
    }
    if !outcome.stderr.is_empty() {
        text.push('\n');
        text.push_str(outcome.stderr.trim_end_matches('\n'));
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_success_outcome() {
        let outcome = CommandOutcome {
            exit_code: 0,
            stdout: "There are no entries in the list.\n".to_string(),
            stderr: String::new(),
        };
        let text = format_outcome(&outcome);
        assert!(text.contains("code:0"));
        assert!(text.contains("There are no entries in the list."));
    }

    #[test]
    fn test_format_failure_keeps_both_streams() {
        let outcome = CommandOutcome {
            exit_code: 2,
            stdout: "partial output".to_string(),
            stderr: "access denied".to_string(),
        };
        let text = format_outcome(&outcome);
        assert!(text.starts_with("code:2"));
        assert!(text.contains("partial output"));
        assert!(text.contains("access denied"));
    }

    #[test]
    fn test_format_empty_streams_is_just_the_code() {
        let outcome = CommandOutcome {
            exit_code: 0,
            stdout: String::new(),
            stderr: String::new(),
        };
        assert_eq!(format_outcome(&outcome), "code:0");
    }
}
