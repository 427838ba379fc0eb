//! Launcher transport.
//!
//! Two one-way TCP connections, one per direction:
//!
//! ```text
//!              connect_addr                      listen_addr
//!  app ──Link──────────────► launcher ──────────────Reader──► app
//!      VERSION, HEARTBEAT...          SERVERVERSION, STATE_REQUEST...
//! ```
//!
//! [`Transport`] owns both halves. Once per update the host calls
//! [`Transport::tick`], which sends due keep-alives, drains the reader and
//! runs each command through the [`CommandRegistry`]. Faults on either side
//! show up in [`Transport::is_healthy`]; the host then calls
//! [`Transport::shutdown`] and [`Transport::connect`] again.

pub mod link;
pub mod registry;

use std::net::SocketAddr;
use std::time::Instant;

use anyhow::{bail, Result};

pub use link::{Link, LinkOptions};
pub use registry::{CommandRegistry, Dispatch, Handler, Reply};

use crate::config::Config;
use crate::wire::{LengthPrefix, Reader};

/// Anything that can deliver a named message to the launcher.
pub trait MessageSink {
    /// Sends `name`, or `name:arg` when `arg` is non-empty.
    fn send_message(&mut self, name: &str, arg: &str) -> Result<()>;
}

/// Addresses, framing and announcements for both directions.
#[derive(Debug, Clone)]
pub struct TransportOptions {
    /// Inbound listen address.
    pub listen_addr: String,
    /// Length header width for launcher → app frames.
    pub inbound_prefix: LengthPrefix,
    /// Outbound connection settings.
    pub link: LinkOptions,
}

impl From<&Config> for TransportOptions {
    fn from(config: &Config) -> Self {
        Self {
            listen_addr: config.listen_addr.clone(),
            inbound_prefix: config.inbound_prefix,
            link: LinkOptions {
                connect_addr: config.connect_addr.clone(),
                prefix: config.outbound_prefix,
                protocol_version: config.protocol_version,
                refresh_rate: config.refresh_rate,
                send_buffer: config.send_buffer,
            },
        }
    }
}

/// Both launcher connections plus dispatch.
#[derive(Debug)]
pub struct Transport {
    options: TransportOptions,
    reader: Reader,
    link: Option<Link>,
}

impl Transport {
    /// Binds the inbound socket. Nothing is connected yet.
    pub fn bind(options: TransportOptions) -> Result<Self> {
        let reader = Reader::bind(&options.listen_addr, options.inbound_prefix)?;
        Ok(Self {
            options,
            reader,
            link: None,
        })
    }

    /// Address the inbound reader listens on.
    pub fn listen_addr(&self) -> Result<SocketAddr> {
        self.reader.local_addr()
    }

    /// Starts the reader and opens the outbound connection.
    ///
    /// Sends `VERSION:<n>` on success.
    pub fn connect(&mut self) -> Result<()> {
        self.shutdown();
        self.reader.start()?;
        match Link::connect(self.options.link.clone()) {
            Ok(link) => {
                self.link = Some(link);
                Ok(())
            }
            Err(e) => {
                self.reader.stop();
                Err(e)
            }
        }
    }

    /// One update: keep-alives, then every received command in order.
    pub fn tick<C>(&mut self, registry: &CommandRegistry<C>, host: &mut C, now: Instant) {
        let Some(link) = self.link.as_mut() else {
            return;
        };
        link.tick_keepalive(now);

        for message in self.reader.drain() {
            let mut ctx = Dispatch {
                link: &mut *link,
                host: &mut *host,
            };
            match registry.dispatch(&message, &mut ctx) {
                Some(Some(reply)) => {
                    if let Err(e) = link.send_message(&reply.name, &reply.arg) {
                        log::warn!("[Transport] Failed to reply to {}: {e:#}", message.name);
                    }
                }
                Some(None) => {}
                None => log::info!("[Transport] Unhandled message: {}", message.name),
            }
        }
    }

    /// Outbound connection, if open.
    pub fn link_mut(&mut self) -> Option<&mut Link> {
        self.link.as_mut()
    }

    /// Whether the launcher confirmed our protocol version.
    pub fn is_version_matched(&self) -> bool {
        self.link.as_ref().is_some_and(Link::is_version_matched)
    }

    /// Whether both directions are up and neither has faulted.
    pub fn is_healthy(&self) -> bool {
        self.link
            .as_ref()
            .is_some_and(|l| l.is_connected() && !l.has_write_error())
            && !self.reader.has_error()
    }

    /// Closes the outbound connection and stops the reader. Idempotent.
    pub fn shutdown(&mut self) {
        if let Some(mut link) = self.link.take() {
            link.close();
            log::info!("[Transport] Shut down");
        }
        self.reader.stop();
    }
}

impl MessageSink for Transport {
    fn send_message(&mut self, name: &str, arg: &str) -> Result<()> {
        match self.link.as_mut() {
            Some(link) => link.send_message(name, arg),
            None => bail!("Not connected to the launcher"),
        }
    }
}

impl Drop for Transport {
    fn drop(&mut self) {
        self.shutdown();
    }
}
