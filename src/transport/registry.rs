//! Inbound command table.
//!
//! Maps a command name to a [`Handler`]. The table is filled once at startup
//! and only read afterwards. Handlers run on the update thread with a
//! [`Dispatch`] context: the outbound [`Link`] plus the host's own state `C`.
//! A handler that returns a [`Reply`] has it sent back immediately.

use std::collections::HashMap;

use super::link::Link;
use crate::wire::InboundMessage;

/// Message sent back to the launcher after a handler runs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    /// Message name.
    pub name: String,
    /// Optional argument; empty sends the bare name.
    pub arg: String,
}

impl Reply {
    /// Reply with an argument.
    pub fn new(name: impl Into<String>, arg: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arg: arg.into(),
        }
    }

    /// Reply with just a name.
    pub fn bare(name: impl Into<String>) -> Self {
        Self::new(name, String::new())
    }
}

/// What a handler gets to work with.
#[derive(Debug)]
pub struct Dispatch<'a, C> {
    /// Outbound connection, for handlers that send more than one message.
    pub link: &'a mut Link,
    /// Host application state.
    pub host: &'a mut C,
}

/// Handles one inbound command.
pub trait Handler<C> {
    /// Runs the command. A returned reply is sent right away.
    fn handle(&self, message: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply>;
}

impl<C, F> Handler<C> for F
where
    F: Fn(&InboundMessage, &mut Dispatch<'_, C>) -> Option<Reply>,
{
    fn handle(&self, message: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
        self(message, ctx)
    }
}

/// Name → handler table.
pub struct CommandRegistry<C> {
    handlers: HashMap<String, Box<dyn Handler<C>>>,
}

impl<C> std::fmt::Debug for CommandRegistry<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names = self.names();
        names.sort_unstable();
        f.debug_struct("CommandRegistry")
            .field("commands", &names)
            .finish()
    }
}

impl<C> Default for CommandRegistry<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> CommandRegistry<C> {
    /// Creates an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    /// Registers a handler, replacing any previous one for `name`.
    pub fn register(&mut self, name: &str, handler: impl Handler<C> + 'static) {
        if self
            .handlers
            .insert(name.to_string(), Box::new(handler))
            .is_some()
        {
            log::debug!("[Transport] Replaced handler for {name}");
        }
    }

    /// Registers a closure handler.
    pub fn register_fn<F>(&mut self, name: &str, handler: F)
    where
        F: Fn(&InboundMessage, &mut Dispatch<'_, C>) -> Option<Reply> + 'static,
    {
        self.register(name, handler);
    }

    /// Registers a command that always answers with the same reply.
    pub fn register_reply(&mut self, name: &str, reply_name: &str, reply_arg: &str) {
        self.register(name, FixedReply(Reply::new(reply_name, reply_arg)));
    }

    /// Registers a command that is accepted without a reply.
    pub fn register_ack(&mut self, name: &str) {
        self.register(name, Acknowledge);
    }

    /// Whether `name` has a handler.
    pub fn contains(&self, name: &str) -> bool {
        self.handlers.contains_key(name)
    }

    /// Registered command names, unordered.
    pub fn names(&self) -> Vec<&str> {
        self.handlers.keys().map(String::as_str).collect()
    }

    /// Number of registered commands.
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no command is registered.
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Runs the handler for `message`.
    ///
    /// Returns `None` when the command is unknown, otherwise the handler's
    /// (possibly empty) reply.
    pub fn dispatch(
        &self,
        message: &InboundMessage,
        ctx: &mut Dispatch<'_, C>,
    ) -> Option<Option<Reply>> {
        let handler = self.handlers.get(&message.name)?;
        Some(handler.handle(message, ctx))
    }
}

struct FixedReply(Reply);

impl<C> Handler<C> for FixedReply {
    fn handle(&self, _message: &InboundMessage, _ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
        Some(self.0.clone())
    }
}

struct Acknowledge;

impl<C> Handler<C> for Acknowledge {
    fn handle(&self, message: &InboundMessage, _ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
        log::debug!("[Transport] Acknowledged {}", message.name);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::link::LinkOptions;
    use crate::wire::LengthPrefix;
    use std::net::{TcpListener, TcpStream};

    fn link() -> (Link, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let link = Link::connect(LinkOptions {
            connect_addr: listener.local_addr().unwrap().to_string(),
            prefix: LengthPrefix::Four,
            protocol_version: 6,
            refresh_rate: 30,
            send_buffer: 64 * 1024,
        })
        .unwrap();
        let (peer, _) = listener.accept().unwrap();
        (link, peer)
    }

    #[test]
    fn test_closure_handler_sees_host_state() {
        let mut registry: CommandRegistry<Vec<String>> = CommandRegistry::new();
        registry.register_fn("LOAD_STAGE", |msg, ctx| {
            ctx.host.push(msg.data.clone());
            Some(Reply::bare("LOAD_STAGE_COMPLETE"))
        });

        let (mut link, _peer) = link();
        let mut host = Vec::new();
        let mut ctx = Dispatch { link: &mut link, host: &mut host };

        let reply = registry.dispatch(&InboundMessage::parse(b"LOAD_STAGE:garage"), &mut ctx);
        assert_eq!(reply, Some(Some(Reply::bare("LOAD_STAGE_COMPLETE"))));
        assert_eq!(host, vec!["garage".to_string()]);
    }

    #[test]
    fn test_fixed_ack_and_unknown() {
        let mut registry: CommandRegistry<u32> = CommandRegistry::default();
        registry.register_reply("GETDEBUGMENU", "RETURNDEBUGMENU", "{}");
        registry.register_ack("SERVERPORT");
        assert_eq!(registry.len(), 2);
        assert!(registry.contains("SERVERPORT"));

        let (mut link, _peer) = link();
        let mut host = 0;
        let mut ctx = Dispatch { link: &mut link, host: &mut host };

        assert_eq!(
            registry.dispatch(&InboundMessage::parse(b"GETDEBUGMENU"), &mut ctx),
            Some(Some(Reply::new("RETURNDEBUGMENU", "{}")))
        );
        assert_eq!(registry.dispatch(&InboundMessage::parse(b"SERVERPORT:9"), &mut ctx), Some(None));
        assert_eq!(registry.dispatch(&InboundMessage::parse(b"NOPE"), &mut ctx), None);
    }
}
