//! Local privilege broker.
//!
//! One long-lived elevated process (the broker) executes a fixed set of
//! administrator commands on behalf of unprivileged client invocations,
//! serialized through a per-user Unix socket.

pub mod broker;
pub mod client;
pub mod elevate;
pub mod exec;
pub mod lock;
pub mod notify;
pub mod registry;
pub mod settings;
