//! Launchlink - launcher transport and state reconciliation.
//!
//! Connects a streamed application to its launcher process and keeps the
//! application's state in step with what the launcher (and the web client
//! behind it) asks for.
//!
//! # Architecture
//!
//! - **Wire** - length-prefixed framing and the inbound reader thread
//! - **Transport** - outbound link, handshake, keep-alive, command dispatch
//! - **State** - request diffing, claim/confirm bookkeeping, timeouts, queue
//! - **Commands** - the built-in launcher command table
//!
//! Everything except the reader thread runs on the host's update thread:
//! the host calls [`Transport::tick`] and [`StateReconciler::tick`] once per
//! update and reacts to the reconciler's [`StateEvent`]s.
//!
//! # Modules
//!
//! - [`wire`] - frame codec, reassembly buffer, reader thread
//! - [`transport`] - link, command registry, transport owner
//! - [`state`] - JSON tree operations and the reconciler
//! - [`commands`] - built-in launcher commands and the JSON file commands
//! - [`host`] - [`EchoHost`], a host that applies every request as-is
//! - [`launcher`] - loopback launcher stand-in
//! - [`config`] - configuration loading/saving

pub mod commands;
pub mod host;
pub mod launcher;
pub mod state;
pub mod transport;
pub mod wire;

pub mod config;
pub mod constants;
pub mod env;
pub mod protocol;

// Re-export commonly used types
pub use config::Config;
pub use host::EchoHost;
pub use state::{StateEvent, StateReconciler, StateTimings, Tree};
pub use transport::{CommandRegistry, MessageSink, Reply, Transport, TransportOptions};
