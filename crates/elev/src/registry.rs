//! Command registry.
//!
//! The fixed mapping from command name to privileged action. Built once at
//! startup and never mutated afterwards. Lookup is a case-sensitive exact
//! match; an absent name is not an error at this layer, callers decide how
//! to report it.

use std::collections::HashMap;

/// A registered privileged action: one external program invocation with a
/// frozen argument list and optional stdin text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandSpec {
    /// Program to execute.
    pub program: String,
    /// Fixed argument list.
    pub args: Vec<String>,
    /// Text written to the program's stdin, if any.
    pub stdin: Option<String>,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>, args: &[&str]) -> Self {
        Self {
            program: program.into(),
            args: args.iter().map(|a| (*a).to_string()).collect(),
            stdin: None,
        }
    }

    pub fn with_stdin(mut self, text: impl Into<String>) -> Self {
        self.stdin = Some(text.into());
        self
    }
}

/// Immutable name → action mapping.
#[derive(Debug, Default)]
pub struct CommandRegistry {
    commands: HashMap<String, CommandSpec>,
}

impl CommandRegistry {
    /// Registry with the built-in command set.
    pub fn builtin() -> Self {
        let mut commands = HashMap::new();
        // Query active login sessions on the machine.
        commands.insert(
            "sessions".to_string(),
            CommandSpec::new("loginctl", &["list-sessions"]),
        );
        Self { commands }
    }

    /// Registry over an explicit command set. Used by tests and embedders;
    /// the `elev` binary always serves the built-in set.
    pub fn from_entries(entries: impl IntoIterator<Item = (String, CommandSpec)>) -> Self {
        Self {
            commands: entries.into_iter().collect(),
        }
    }

    /// Look up a command by exact, case-sensitive name.
    pub fn resolve(&self, name: &str) -> Option<&CommandSpec> {
        self.commands.get(name)
    }

    /// Registered command names, in no particular order.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.commands.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.commands.len()
    }

    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}
