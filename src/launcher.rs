//! Loopback launcher stand-in.
//!
//! Plays the launcher's side of both connections so the application side can
//! be run and tested without the real launcher:
//!
//! ```text
//!   app Link ──connect──► [listener on connect_addr] ─┐
//!                                                     │ LauncherSession
//!   app Reader ◄──dial──── [listen_addr] ─────────────┘
//! ```
//!
//! Answers `VERSION` with `SERVERVERSION` so the handshake completes.
//! Everything else the application sends is recorded in
//! [`LauncherSession::history`].

use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, TcpListener, TcpStream};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::{Duration, Instant};

use anyhow::{bail, Context, Result};

use crate::config::Config;
use crate::constants::{ACCEPT_POLL_INTERVAL, READER_IDLE_SLEEP, READ_CHUNK_SIZE, TICK_INTERVAL};
use crate::protocol::{inbound, outbound};
use crate::wire::{encode, FrameDecoder, LengthPrefix, OutboundMessage};

/// Addresses and framing for the launcher side.
#[derive(Debug, Clone)]
pub struct LauncherOptions {
    /// Application's inbound listen address, dialed after accepting.
    pub app_addr: String,
    /// Header width of launcher → app frames.
    pub inbound_prefix: LengthPrefix,
    /// Header width of app → launcher frames.
    pub outbound_prefix: LengthPrefix,
    /// Whether `VERSION` is answered automatically.
    pub auto_handshake: bool,
}

impl From<&Config> for LauncherOptions {
    fn from(config: &Config) -> Self {
        Self {
            app_addr: config.listen_addr.clone(),
            inbound_prefix: config.inbound_prefix,
            outbound_prefix: config.outbound_prefix,
            auto_handshake: true,
        }
    }
}

/// One connected application.
#[derive(Debug)]
pub struct LauncherSession {
    from_app: TcpStream,
    to_app: TcpStream,
    decoder: FrameDecoder,
    options: LauncherOptions,
    history: Vec<OutboundMessage>,
    closed: bool,
}

impl LauncherSession {
    /// Waits for the application to connect, then dials its listen address.
    ///
    /// Returns `Ok(None)` if `stop` turns true before anyone connects.
    pub fn accept(
        listener: &TcpListener,
        options: LauncherOptions,
        stop: impl Fn() -> bool,
    ) -> Result<Option<Self>> {
        listener.set_nonblocking(true)?;
        let from_app = loop {
            if stop() {
                return Ok(None);
            }
            match listener.accept() {
                Ok((stream, peer)) => {
                    log::info!("[Launcher] Application connected from {peer}");
                    break stream;
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL_INTERVAL),
                Err(e) => return Err(e).context("Launcher accept failed"),
            }
        };
        from_app.set_nonblocking(true)?;

        let to_app = TcpStream::connect(&options.app_addr)
            .with_context(|| format!("Failed to dial application at {}", options.app_addr))?;
        to_app.set_nodelay(true)?;

        Ok(Some(Self {
            from_app,
            to_app,
            decoder: FrameDecoder::new(options.outbound_prefix),
            options,
            history: Vec::new(),
            closed: false,
        }))
    }

    /// Sends a command: `name` or `name:data`.
    pub fn send(&mut self, name: &str, data: &str) -> Result<()> {
        let body = if data.is_empty() {
            name.to_string()
        } else {
            format!("{name}:{data}")
        };
        self.send_raw(body.as_bytes())
    }

    /// Sends a pre-formed command body.
    pub fn send_raw(&mut self, body: &[u8]) -> Result<()> {
        let frame = encode(self.options.inbound_prefix, body)?;
        self.to_app
            .write_all(&frame)
            .context("Failed to send command to application")
    }

    /// Reads whatever the application has sent so far.
    pub fn poll(&mut self) -> Result<Vec<OutboundMessage>> {
        let mut buf = [0u8; READ_CHUNK_SIZE];
        let mut received = Vec::new();
        loop {
            match self.from_app.read(&mut buf) {
                Ok(0) => {
                    self.closed = true;
                    break;
                }
                Ok(n) => {
                    for body in self.decoder.feed(&buf[..n])? {
                        received.push(OutboundMessage::parse(&body));
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == ErrorKind::Interrupted => {}
                Err(e) => {
                    self.closed = true;
                    return Err(e).context("Failed to read from application");
                }
            }
        }

        for msg in &received {
            if self.options.auto_handshake && msg.name == outbound::VERSION {
                let version = msg.arg_text();
                self.send(inbound::SERVER_VERSION, &version)?;
            }
        }
        self.history.extend(received.iter().cloned());
        Ok(received)
    }

    /// Polls until a message named `name` arrives.
    pub fn wait_for(&mut self, name: &str, timeout: Duration) -> Result<OutboundMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(msg) = self.poll()?.into_iter().find(|m| m.name == name) {
                return Ok(msg);
            }
            if self.closed {
                bail!("Application closed the connection while waiting for {name}");
            }
            if Instant::now() >= deadline {
                bail!("Timed out waiting for {name}");
            }
            thread::sleep(READER_IDLE_SLEEP);
        }
    }

    /// Every message received, in order.
    pub fn history(&self) -> &[OutboundMessage] {
        &self.history
    }

    /// Whether the application closed its outbound connection.
    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Closes both connections.
    pub fn close(&mut self) {
        let _ = self.to_app.shutdown(Shutdown::Both);
        let _ = self.from_app.shutdown(Shutdown::Both);
        self.closed = true;
    }
}

/// Runs the interactive stand-in until `shutdown` is set.
///
/// Prints every message from the application and forwards stdin lines
/// (`NAME` or `NAME:data`) as commands.
pub fn run(config: &Config, shutdown: &Arc<AtomicBool>) -> Result<()> {
    let listener = TcpListener::bind(&config.connect_addr)
        .with_context(|| format!("Failed to listen on {}", config.connect_addr))?;
    log::info!("[Launcher] Waiting for application on {}", config.connect_addr);

    let (line_tx, line_rx) = mpsc::channel::<String>();
    thread::Builder::new()
        .name("launcher-stdin".to_string())
        .spawn(move || {
            for line in std::io::stdin().lines().map_while(Result::ok) {
                if line_tx.send(line).is_err() {
                    break;
                }
            }
        })
        .context("Failed to spawn stdin reader")?;

    while !shutdown.load(Ordering::Relaxed) {
        let stop = || shutdown.load(Ordering::Relaxed);
        let Some(mut session) = LauncherSession::accept(&listener, config.into(), stop)? else {
            break;
        };

        while !shutdown.load(Ordering::Relaxed) && !session.is_closed() {
            for msg in session.poll()? {
                if msg.arg.is_empty() {
                    println!("<- {}", msg.name);
                } else {
                    println!("<- {}:{}", msg.name, msg.arg_text());
                }
            }
            for line in line_rx.try_iter() {
                let line = line.trim();
                if !line.is_empty() {
                    session.send_raw(line.as_bytes())?;
                    println!("-> {line}");
                }
            }
            thread::sleep(TICK_INTERVAL);
        }

        log::info!("[Launcher] Application disconnected");
        session.close();
    }

    Ok(())
}
