//! Outbound connection to the launcher.
//!
//! Owns the app → launcher socket, the version handshake and the keep-alive
//! timers. Writes are blocking and complete (`write_all`); the first failure
//! latches [`Link::has_write_error`] and closes the socket. Nothing retries:
//! the owner sees the flag and reconnects.

use std::io::Write;
use std::net::{Shutdown, TcpStream};
use std::time::Instant;

use anyhow::{bail, Context, Result};
use serde_json::json;

use super::MessageSink;
use crate::constants::{HEARTBEAT_INTERVAL, REFRESH_RATE_INTERVAL};
use crate::protocol::outbound;
use crate::wire::{binary_body, image_payload, text_body, LengthPrefix};

/// Settings for the outbound connection.
#[derive(Debug, Clone)]
pub struct LinkOptions {
    /// Launcher address.
    pub connect_addr: String,
    /// Length header width for app → launcher frames.
    pub prefix: LengthPrefix,
    /// Protocol version announced and expected back.
    pub protocol_version: u32,
    /// Frame rate announced in `REFRESHRATE`.
    pub refresh_rate: u32,
    /// Socket send buffer size in bytes.
    pub send_buffer: usize,
}

/// Connected app → launcher socket.
#[derive(Debug)]
pub struct Link {
    stream: Option<TcpStream>,
    options: LinkOptions,
    write_error: bool,
    version_matched: bool,
    last_heartbeat: Option<Instant>,
    last_refresh: Option<Instant>,
}

impl Link {
    /// Connects to the launcher and announces the protocol version.
    pub fn connect(options: LinkOptions) -> Result<Self> {
        let stream = TcpStream::connect(&options.connect_addr)
            .with_context(|| format!("Failed to connect to launcher at {}", options.connect_addr))?;
        stream
            .set_nodelay(true)
            .context("Failed to set TCP_NODELAY")?;
        if let Err(e) = set_send_buffer(&stream, options.send_buffer) {
            log::warn!("[Transport] Could not set send buffer to {} bytes: {e}", options.send_buffer);
        }
        log::info!("[Transport] Connected to launcher at {}", options.connect_addr);

        Ok(Self::from_stream(stream, options))
    }

    /// Wraps an already connected stream and announces the protocol version.
    pub fn from_stream(stream: TcpStream, options: LinkOptions) -> Self {
        let mut link = Self {
            stream: Some(stream),
            options,
            write_error: false,
            version_matched: false,
            last_heartbeat: None,
            last_refresh: None,
        };
        let version = link.options.protocol_version.to_string();
        if let Err(e) = link.send_message(outbound::VERSION, &version) {
            log::error!("[Transport] Failed to announce version: {e:#}");
        }
        link
    }

    /// Sends `name` or `name:arg`.
    pub fn send_message(&mut self, name: &str, arg: &str) -> Result<()> {
        log::trace!("[Transport] -> {name} {arg}");
        self.write_frame(&text_body(name, arg))
    }

    /// Sends `name:` followed by raw bytes.
    pub fn send_binary(&mut self, name: &str, bytes: &[u8]) -> Result<()> {
        log::trace!("[Transport] -> {name} ({} bytes)", bytes.len());
        self.write_frame(&binary_body(name, bytes))
    }

    /// Sends a `CAPTUREIMAGERESULT` for a finished capture.
    pub fn send_image_result(&mut self, response_json: &str, uid: &str, image: &[u8]) -> Result<()> {
        let payload = image_payload(response_json, uid.as_bytes(), image)?;
        self.send_binary(outbound::CAPTURE_IMAGE_RESULT, &payload)
    }

    fn write_frame(&mut self, body: &[u8]) -> Result<()> {
        if self.write_error {
            bail!("Outbound link is in error state");
        }
        let Some(stream) = self.stream.as_mut() else {
            bail!("Outbound link is closed");
        };

        let header = self.options.prefix.header(body.len())?;
        let result = stream
            .write_all(&header)
            .and_then(|()| stream.write_all(body));

        if let Err(e) = result {
            log::error!("[Transport] Send failed: {e}");
            self.write_error = true;
            self.close();
            return Err(e).context("Failed to write frame to launcher");
        }
        Ok(())
    }

    /// Handles the launcher's `SERVERVERSION`.
    ///
    /// On a match, completes the handshake: `VERSIONMATCH`, `SYN`,
    /// `VECONNECTED`, then the diagnostics tags. Returns whether it matched.
    pub fn set_server_version(&mut self, version: u32) -> Result<bool> {
        if version != self.options.protocol_version {
            log::warn!(
                "[Transport] Launcher protocol version {version} does not match ours ({})",
                self.options.protocol_version
            );
            return Ok(false);
        }
        if self.version_matched {
            return Ok(true);
        }

        self.version_matched = true;
        log::info!("[Transport] Protocol version {version} matched");
        self.send_message(outbound::VERSION_MATCH, "")?;
        self.send_message(outbound::SYN, "")?;
        self.send_message(outbound::CONNECTED, "")?;
        self.send_message(outbound::DIAGNOSTICS, &diagnostics_tags())?;
        Ok(true)
    }

    /// Whether the launcher confirmed our protocol version.
    pub fn is_version_matched(&self) -> bool {
        self.version_matched
    }

    /// Sends `HEARTBEAT` and `REFRESHRATE` when due. Only after the
    /// handshake; the first refresh announcement goes out immediately.
    pub fn tick_keepalive(&mut self, now: Instant) {
        if !self.version_matched || !self.is_connected() {
            return;
        }

        let due = |last: Option<Instant>, every| match last {
            Some(t) => now.saturating_duration_since(t) >= every,
            None => true,
        };

        if due(self.last_heartbeat, HEARTBEAT_INTERVAL) {
            self.last_heartbeat = Some(now);
            if let Err(e) = self.send_message(outbound::HEARTBEAT, "") {
                log::warn!("[Transport] Heartbeat failed: {e:#}");
                return;
            }
        }

        if due(self.last_refresh, REFRESH_RATE_INTERVAL) {
            self.last_refresh = Some(now);
            let name = format!("{}:{}", outbound::REFRESH_RATE, self.options.refresh_rate);
            if let Err(e) = self.send_message(&name, "") {
                log::warn!("[Transport] Refresh rate announcement failed: {e:#}");
            }
        }
    }

    /// Whether the socket is open.
    pub fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    /// Sticky write fault flag.
    pub fn has_write_error(&self) -> bool {
        self.write_error
    }

    /// Closes the socket and forgets the handshake. Idempotent.
    pub fn close(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
            log::debug!("[Transport] Outbound link closed");
        }
        self.version_matched = false;
        self.last_heartbeat = None;
        self.last_refresh = None;
    }
}

impl MessageSink for Link {
    fn send_message(&mut self, name: &str, arg: &str) -> Result<()> {
        Link::send_message(self, name, arg)
    }
}

impl Drop for Link {
    fn drop(&mut self) {
        self.close();
    }
}

/// Host description sent once after the handshake.
fn diagnostics_tags() -> String {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown".to_string());
    let threads = std::thread::available_parallelism().map_or(1, std::num::NonZeroUsize::get);

    json!({
        "OS": format!("{} {}", std::env::consts::OS, std::env::consts::FAMILY),
        "CPU": format!("{} x{threads}", std::env::consts::ARCH),
        "Host": host,
        "Engine_Version": concat!("launchlink ", env!("CARGO_PKG_VERSION")),
    })
    .to_string()
}

#[cfg(unix)]
fn set_send_buffer(stream: &TcpStream, size: usize) -> std::io::Result<()> {
    use std::os::unix::io::AsRawFd;

    let value = libc::c_int::try_from(size).unwrap_or(libc::c_int::MAX);
    // SAFETY: the fd is an open socket owned by `stream`, and `value` is a
    // live c_int whose size is passed as the option length.
    let rc = unsafe {
        libc::setsockopt(
            stream.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_SNDBUF,
            std::ptr::from_ref(&value).cast::<libc::c_void>(),
            std::mem::size_of::<libc::c_int>() as libc::socklen_t,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(std::io::Error::last_os_error())
    }
}

#[cfg(not(unix))]
fn set_send_buffer(_stream: &TcpStream, _size: usize) -> std::io::Result<()> {
    Err(std::io::Error::new(
        std::io::ErrorKind::Unsupported,
        "send buffer size is only set on unix",
    ))
}
