//! Built-in launcher commands.
//!
//! Registers the handshake, connect-state negotiation, runtime settings and
//! state request commands, plus fixed answers for launcher features this
//! application does not implement. The launcher waits on some of those
//! answers, so they must reply even though nothing happens.

use serde_json::Value;

use crate::config::secs_to_duration;
use crate::protocol::{inbound, outbound, CONNECT_STATE_PARSE_ERROR};
use crate::state::{tree, StateReconciler};
use crate::transport::{CommandRegistry, Dispatch, Reply};
use crate::wire::InboundMessage;

/// Host state that exposes a reconciler to the built-in commands.
pub trait StateHost {
    /// The application's reconciler.
    fn reconciler(&mut self) -> &mut StateReconciler;
}

impl StateHost for StateReconciler {
    fn reconciler(&mut self) -> &mut StateReconciler {
        self
    }
}

/// Commands answered with a fixed reply: `(command, reply, reply arg)`.
pub const FIXED_REPLIES: &[(&str, &str, &str)] = &[
    ("ORBIT_PAUSE", "CAMERAPAUSED", ""),
    ("LOAD_STAGE", "LOAD_STAGE_COMPLETE", ""),
    ("UNLOAD_ASSET_BUNDLE", "UNLOAD_ASSET_BUNDLE_DONE", ""),
    ("RESUME_CAMERAS", "CAMERAS_RESUMED", ""),
    ("PAUSE_CAMERAS", "CAMERAS_PAUSED", ""),
    ("DEFAULTVEHICLE", "VEHICLEREADY", ""),
    ("VEHICLEUPDATE", "VEHICLEREADY", ""),
    ("GETDEBUGMENU", "RETURNDEBUGMENU", "{}"),
    ("UPDATE_DXR_PROXY", "UPDATE_DXR_PROXY_SUCCESS", ""),
    ("GET_SCREENSHOT_LAYER_OPTIONS", "RETURN_SCREENSHOT_LAYER_OPTIONS", r#"{"layers":{}}"#),
    ("SETCAMERADIRECTLYJSON", "SETCAMERADIRECTLYRETURN", ""),
];

/// Commands accepted without a reply.
pub const ACKNOWLEDGED: &[&str] = &["LOGGING_SETTINGS", "SERVERPORT", "SETFEATURES"];

/// Registers every built-in command.
pub fn register<C: StateHost + 'static>(registry: &mut CommandRegistry<C>) {
    registry.register_fn(inbound::SERVER_VERSION, server_version::<C>);
    registry.register_fn(inbound::SET_INITIAL_STATE, set_initial_state::<C>);
    registry.register_fn(inbound::SETTINGS, settings::<C>);
    registry.register_fn(inbound::CLOUD_CONNECTED, cloud_connected::<C>);
    registry.register_fn(inbound::STATE_REQUEST, state_request::<C>);

    for (name, reply, arg) in FIXED_REPLIES {
        registry.register_reply(name, reply, arg);
    }
    for name in ACKNOWLEDGED {
        registry.register_ack(name);
    }
}

fn server_version<C>(msg: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
    match msg.data.trim().parse::<u32>() {
        Ok(version) => {
            if let Err(e) = ctx.link.set_server_version(version) {
                log::error!("[Transport] Handshake failed: {e:#}");
            }
        }
        Err(_) => log::warn!("[Transport] Unparseable server version '{}'", msg.data),
    }
    None
}

fn set_initial_state<C: StateHost>(msg: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
    let reconciler = ctx.host.reconciler();

    let (json, from_default) = if msg.has_data() {
        (reconciler.merge_default_initial_state(&msg.data), false)
    } else if reconciler.has_default_initial_state() {
        let default = reconciler.default_initial_state().unwrap_or_default();
        (default.to_string(), true)
    } else {
        log::info!("[State] Launcher connected without a state");
        return Some(Reply::bare(outbound::STATE_READY));
    };

    let Some(mut target) = tree::parse_tree(&json) else {
        if from_default {
            log::warn!("[State] Default initial state is not a JSON object, ignoring it");
            return Some(Reply::bare(outbound::STATE_READY));
        }
        log::warn!("[State] Connect state could not be parsed: {}", msg.data);
        return Some(Reply::new(outbound::STATE_ERROR, CONNECT_STATE_PARSE_ERROR));
    };
    tree::sanitize(&mut target);

    if reconciler.matches_current(&target) {
        log::info!("[State] Connect state already matches");
        return Some(Reply::bare(outbound::STATE_READY));
    }

    reconciler.watch_for_state(target);
    reconciler.accept_request(&json, true);
    Some(Reply::bare(outbound::STATE_REQUESTED))
}

fn settings<C: StateHost>(msg: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
    let Some(settings) = msg.json.as_ref().and_then(Value::as_object) else {
        log::warn!("[State] Ignoring settings that are not a JSON object");
        return None;
    };

    let reconciler = ctx.host.reconciler();
    let timings = reconciler.timings();
    let read = |key: &str, current| {
        settings
            .get(key)
            .and_then(Value::as_f64)
            .map_or(current, |secs| secs_to_duration(secs, current))
    };
    let warning = read("stateWarningTime", timings.warning);
    let timeout = read("stateTimeout", timings.timeout);

    log::info!(
        "[State] Warning after {:.1}s, timeout after {:.1}s",
        warning.as_secs_f64(),
        timeout.as_secs_f64()
    );
    reconciler.set_timings(warning, timeout);
    None
}

fn cloud_connected<C: StateHost>(msg: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
    let connected = matches!(msg.data.trim(), "1" | "true");
    let reconciler = ctx.host.reconciler();
    if reconciler.stream_connected() != connected {
        log::info!("[State] Remote stream connected: {connected}");
        reconciler.set_stream_connected(connected);
    }
    None
}

fn state_request<C: StateHost>(msg: &InboundMessage, ctx: &mut Dispatch<'_, C>) -> Option<Reply> {
    if !msg.has_data() {
        log::warn!("[State] Empty state request");
        return None;
    }
    ctx.host.reconciler().accept_request(&msg.data, true);
    None
}
