//! Launcher protocol vocabulary.
//!
//! Message names are plain ASCII words. Each direction has its own set; the
//! launcher ignores names it does not know and so does this side (see
//! [`crate::transport::CommandRegistry`]).

/// Protocol version announced in `VERSION:<n>` and expected back in
/// `SERVERVERSION:<n>`.
pub const PROTOCOL_VERSION: u32 = 6;

/// Messages sent to the launcher.
pub mod outbound {
    /// First frame after connecting: `VERSION:<n>`.
    pub const VERSION: &str = "VERSION";
    /// Launcher reported the expected protocol version.
    pub const VERSION_MATCH: &str = "VERSIONMATCH";
    /// Sent right after `VERSIONMATCH`.
    pub const SYN: &str = "SYN";
    /// Application is connected and ready for commands.
    pub const CONNECTED: &str = "VECONNECTED";
    /// One-time host diagnostics (JSON).
    pub const DIAGNOSTICS: &str = "VEADDSENTRYTAGS";
    /// Keep-alive, once per second after the handshake.
    pub const HEARTBEAT: &str = "HEARTBEAT";
    /// Frame rate announcement, `REFRESHRATE:<fps>`.
    pub const REFRESH_RATE: &str = "REFRESHRATE";
    /// Connect state is already in place.
    pub const STATE_READY: &str = "STATE_READY";
    /// Connect state was handed to the application.
    pub const STATE_REQUESTED: &str = "STATE_REQUESTED";
    /// Connect state could not be applied (JSON error body).
    pub const STATE_ERROR: &str = "STATE_ERROR";
    /// Connect state matched (or the wait gave up); the launcher may proceed.
    pub const INITIAL_STATE_SET: &str = "APPINITIALSTATESET";
    /// Binary image result.
    pub const CAPTURE_IMAGE_RESULT: &str = "CAPTUREIMAGERESULT";
}

/// Commands received from the launcher.
pub mod inbound {
    /// Launcher protocol version, `SERVERVERSION:<n>`.
    pub const SERVER_VERSION: &str = "SERVERVERSION";
    /// Connect-time state negotiation, optional JSON.
    pub const SET_INITIAL_STATE: &str = "SETINITIALSTATE";
    /// Runtime settings (`stateWarningTime`, `stateTimeout`).
    pub const SETTINGS: &str = "OMNISTREAM_SETTINGS";
    /// Remote stream connected (`1`) or disconnected (`0`).
    pub const CLOUD_CONNECTED: &str = "CLOUD_CONNECTED";
    /// A state request to reconcile (JSON).
    pub const STATE_REQUEST: &str = "STATE_REQUEST";
}

/// Error body sent with `STATE_ERROR` when connect state is not JSON.
pub const CONNECT_STATE_PARSE_ERROR: &str = r#"{"error":"Connect state data could not be parsed"}"#;

/// Error body sent with `STATE_ERROR` when a watch times out and is not
/// configured to release the launcher.
pub const CONNECT_STATE_TIMEOUT_ERROR: &str =
    r#"{"error":"Timeout reached waiting for state data to match onConnect request."}"#;
