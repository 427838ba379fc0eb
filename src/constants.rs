//! Application-wide constants for launchlink.
//!
//! Wire limits and timer intervals live here so the framing, transport and
//! state layers agree on them. Values that operators may want to change
//! (addresses, refresh rate, state timeouts) have their defaults here and are
//! overridden through [`crate::config::Config`].
//!
//! # Categories
//!
//! - **Wire**: Frame sizes and read granularity
//! - **Keep-alive**: Heartbeat and refresh-rate announcements
//! - **State**: Request warning/timeout windows
//! - **Polling**: Reader and run-loop sleeps

use std::time::Duration;

// ============================================================================
// Wire
// ============================================================================

/// Largest frame body accepted from the launcher.
///
/// A length header above this is treated as a corrupt stream.
pub const MAX_FRAME_BODY: usize = 16 * 1024 * 1024;

/// Bytes requested from the socket per read.
pub const READ_CHUNK_SIZE: usize = 1024;

/// How far into a body the name/data separator is searched for.
///
/// Names are short ASCII words; anything longer is treated as a bare name.
pub const NAME_SCAN_LIMIT: usize = 64;

/// Default socket send buffer for the outbound stream.
///
/// Image payloads can be large; a 1 MiB buffer keeps a capture from stalling
/// the update thread on a single write.
pub const DEFAULT_SEND_BUFFER: usize = 1024 * 1024;

// ============================================================================
// Keep-alive
// ============================================================================

/// Minimum spacing between `HEARTBEAT` messages after the handshake.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// Minimum spacing between `REFRESHRATE` announcements.
pub const REFRESH_RATE_INTERVAL: Duration = Duration::from_secs(10);

/// Frame rate announced when nothing else is configured.
pub const DEFAULT_REFRESH_RATE: u32 = 30;

// ============================================================================
// State
// ============================================================================

/// Elapsed time after which an unresolved request starts logging warnings.
pub const DEFAULT_STATE_WARNING: Duration = Duration::from_secs(10);

/// Elapsed time after which an unresolved request is abandoned.
pub const DEFAULT_STATE_TIMEOUT: Duration = Duration::from_secs(30);

/// Minimum spacing between repeated "still waiting" log lines.
pub const WARNING_LOG_INTERVAL: Duration = Duration::from_secs(1);

// ============================================================================
// Polling
// ============================================================================

/// Sleep when the inbound socket has no data.
pub const READER_IDLE_SLEEP: Duration = Duration::from_millis(1);

/// Sleep between accept attempts while waiting for the launcher.
pub const ACCEPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Host update period of the `run` command (about 60 updates per second).
pub const TICK_INTERVAL: Duration = Duration::from_millis(16);

/// Delay before reconnecting after a transport fault.
pub const RECONNECT_DELAY: Duration = Duration::from_secs(2);
