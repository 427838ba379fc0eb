//! Requested-state reconciliation.
//!
//! The launcher (or the web client behind it) asks for a JSON state. The
//! application resolves it field by field and the reconciler keeps the books:
//!
//! ```text
//! accept_request(json) ──► requested_outgoing = diff(current, request)
//!        │                         │
//!        │ (busy)                  │ claim_field(path)      host starts applying
//!        ▼                         ▼
//!   FIFO queue               processing ──confirm_field(path)──► current
//!        ▲                         │
//!        └──── tick(): complete / timeout / unmatched ◄──┘
//! ```
//!
//! Completion is detected by leaf counting: the request resolves when the
//! number of confirmed leaves equals the number of leaves left after diffing
//! against `current`. Everything runs on the host's update thread; nothing in
//! here locks.

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use serde_json::Value;

use super::events::{ProcessingOutcome, StateEvent, REQUEST_ID_KEY};
use super::tree::{self, Tree};
use crate::constants::{DEFAULT_STATE_TIMEOUT, DEFAULT_STATE_WARNING, WARNING_LOG_INTERVAL};
use crate::protocol::{outbound, CONNECT_STATE_TIMEOUT_ERROR};
use crate::transport::MessageSink;

/// Warning and timeout windows for in-flight requests and the connect watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StateTimings {
    /// Elapsed time after which unresolved fields are logged.
    pub warning: Duration,
    /// Elapsed time after which a request (or watch) gives up.
    pub timeout: Duration,
    /// Whether a timed-out watch still sends `APPINITIALSTATESET`.
    pub release_watch_on_timeout: bool,
}

impl Default for StateTimings {
    fn default() -> Self {
        Self {
            warning: DEFAULT_STATE_WARNING,
            timeout: DEFAULT_STATE_TIMEOUT,
            release_watch_on_timeout: true,
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    json: String,
    compare_to_current: bool,
}

#[derive(Debug)]
struct ActiveRequest {
    id: String,
    started: Instant,
    last_warning: Instant,
    requested_leaves: usize,
    processing_leaves: usize,
    finished_leaves: usize,
}

#[derive(Debug)]
struct ServerWatch {
    target: Tree,
    started: Instant,
    last_warning: Instant,
}

/// Owns the five state trees and the request queue.
#[derive(Debug)]
pub struct StateReconciler {
    current: Tree,
    requested_incoming: Tree,
    requested_outgoing: Tree,
    processing: Tree,
    web_mirror: Tree,
    queue: VecDeque<PendingRequest>,
    active: Option<ActiveRequest>,
    next_request_id: u64,
    timings: StateTimings,
    watch: Option<ServerWatch>,
    watch_mismatch: Option<Tree>,
    default_initial_state: Option<String>,
    stream_connected: bool,
    events: Vec<StateEvent>,
}

impl Default for StateReconciler {
    fn default() -> Self {
        Self::new(StateTimings::default())
    }
}

impl StateReconciler {
    /// Creates a reconciler with empty state.
    #[must_use]
    pub fn new(timings: StateTimings) -> Self {
        Self {
            current: Tree::new(),
            requested_incoming: Tree::new(),
            requested_outgoing: Tree::new(),
            processing: Tree::new(),
            web_mirror: Tree::new(),
            queue: VecDeque::new(),
            active: None,
            next_request_id: 0,
            timings,
            watch: None,
            watch_mismatch: None,
            default_initial_state: None,
            stream_connected: false,
            events: Vec::new(),
        }
    }

    // ── Requests ────────────────────────────────────────────────────────────

    /// Accepts a requested state.
    ///
    /// Returns `true` when the request became the active one (including the
    /// case where nothing needed to change and it resolved immediately).
    /// Returns `false` when the JSON is not an object, or when another request
    /// is in flight and this one was queued instead.
    pub fn accept_request(&mut self, json: &str, compare_to_current: bool) -> bool {
        if let Some(active) = &self.active {
            let Some(mut request) = tree::parse_tree(json) else {
                log::warn!("[State] Dropping unparseable request while {} is in flight", active.id);
                return false;
            };
            tree::sanitize(&mut request);

            log::info!(
                "[State] Queueing request while waiting for RequestId {} to finish",
                active.id
            );
            self.queue.push_back(PendingRequest {
                json: json.to_string(),
                compare_to_current,
            });
            self.events.push(StateEvent::Queued {
                request,
                queue_length: self.queue.len(),
            });
            return false;
        }

        let accepted = self.begin(json, compare_to_current, Instant::now());
        self.promote_queued(Instant::now());
        accepted
    }

    fn begin(&mut self, json: &str, compare_to_current: bool, now: Instant) -> bool {
        log::info!("[State] Received state request: {json}");

        let Some(mut incoming) = tree::parse_tree(json) else {
            log::warn!("[State] Rejecting state request that is not a JSON object");
            return false;
        };
        tree::sanitize(&mut incoming);

        self.clear_processing();

        let request_id = self.next_request_id.to_string();
        self.next_request_id += 1;
        incoming.insert(REQUEST_ID_KEY.to_string(), Value::String(request_id.clone()));

        let outgoing = if compare_to_current {
            tree::diff(&self.current, &incoming)
        } else {
            incoming.clone()
        };
        let outgoing = tree::diff(&self.processing, &outgoing);
        let requested_leaves = tree::leaf_count(&outgoing).saturating_sub(1);

        if compare_to_current {
            log::info!("[State] Leaf count difference between request and current state: {requested_leaves}");
        } else {
            log::info!("[State] Leaf count in request: {requested_leaves}");
        }

        self.requested_incoming = incoming;
        self.requested_outgoing = outgoing;

        if requested_leaves == 0 {
            self.web_mirror.clone_from(&self.current);
            self.events.push(StateEvent::ProcessingEnded {
                request_id,
                outcome: ProcessingOutcome::Complete {
                    current_state: self.current.clone(),
                },
            });
            self.clear_processing();
            return true;
        }

        self.processing
            .insert(REQUEST_ID_KEY.to_string(), Value::String(request_id.clone()));
        self.active = Some(ActiveRequest {
            id: request_id.clone(),
            started: now,
            last_warning: now,
            requested_leaves,
            processing_leaves: 0,
            finished_leaves: 0,
        });

        let mut requested = self.requested_outgoing.clone();
        requested.remove(REQUEST_ID_KEY);
        self.events.push(StateEvent::ProcessingStarted { request_id, requested });
        true
    }

    fn promote_queued(&mut self, now: Instant) {
        while self.active.is_none() {
            let Some(next) = self.queue.pop_front() else {
                break;
            };
            self.begin(&next.json, next.compare_to_current, now);
        }
    }

    /// Claims a requested field for processing.
    ///
    /// Moves the value at `path` from the outstanding request into
    /// `processing` and returns it. With `instant_confirm` the value is
    /// written straight into `current` as if [`confirm_field`] had been
    /// called. Returns `None` when no request is active or the field was not
    /// requested.
    ///
    /// [`confirm_field`]: Self::confirm_field
    pub fn claim_field(&mut self, path: &str, instant_confirm: bool) -> Option<Value> {
        if is_request_id(path) {
            return None;
        }
        let active = self.active.as_mut()?;
        let value = tree::remove_path(&mut self.requested_outgoing, path)?;
        let leaves = tree::value_leaf_count(&value);

        active.processing_leaves += leaves;
        self.processing
            .insert(REQUEST_ID_KEY.to_string(), Value::String(active.id.clone()));

        if instant_confirm {
            active.finished_leaves += leaves;
            commit(&mut self.current, path, value.clone());
        } else {
            commit(&mut self.processing, path, value.clone());
        }

        Some(value)
    }

    /// Confirms that a claimed field has been applied.
    ///
    /// The value moves from `processing` into `current`; object values are
    /// deep-merged with whatever `current` already holds at `path`. Returns
    /// `false` if the field is not currently claimed.
    pub fn confirm_field(&mut self, path: &str) -> bool {
        if is_request_id(path) {
            return false;
        }
        let Some(active) = self.active.as_mut() else {
            return false;
        };
        let Some(value) = tree::remove_path(&mut self.processing, path) else {
            return false;
        };

        active.finished_leaves += tree::value_leaf_count(&value);
        commit(&mut self.current, path, value);
        true
    }

    // ── Tick ────────────────────────────────────────────────────────────────

    /// Advances timeouts and completion. Call once per update.
    ///
    /// `sink` receives the `APPINITIALSTATESET` / `STATE_ERROR` messages of
    /// the server-notify watch.
    pub fn tick(&mut self, now: Instant, sink: &mut dyn MessageSink) {
        self.tick_request(now);
        self.tick_watch(now, sink);
    }

    fn tick_request(&mut self, now: Instant) {
        let Some(active) = &mut self.active else {
            return;
        };

        if active.finished_leaves == active.requested_leaves {
            let request_id = active.id.clone();
            self.web_mirror.clone_from(&self.current);
            self.resolve(
                request_id,
                ProcessingOutcome::Complete {
                    current_state: self.current.clone(),
                },
                now,
            );
            return;
        }

        let has_pending = self.processing.keys().any(|k| k != REQUEST_ID_KEY);
        if !has_pending && active.processing_leaves < active.requested_leaves {
            let request_id = active.id.clone();
            let mut unprocessed = tree::diff(&self.current, &self.requested_outgoing);
            unprocessed.remove(REQUEST_ID_KEY);
            log::info!(
                "[State] Request {request_id} left {} field(s) unclaimed",
                unprocessed.len()
            );
            self.resolve(
                request_id,
                ProcessingOutcome::Unmatched {
                    current_state: self.current.clone(),
                    unprocessed_state: unprocessed,
                },
                now,
            );
            return;
        }

        let elapsed = now.saturating_duration_since(active.started);
        if elapsed > self.timings.timeout {
            let request_id = active.id.clone();
            let unclaimed = active.processing_leaves < active.requested_leaves;

            let mut pending = self.processing.clone();
            pending.remove(REQUEST_ID_KEY);
            let timeout_state = tree::diff(&self.current, &pending);

            let unprocessed_state = unclaimed.then(|| {
                let mut unprocessed = tree::diff(&self.current, &self.requested_outgoing);
                for key in timeout_state.keys() {
                    unprocessed.remove(key);
                }
                unprocessed.remove(REQUEST_ID_KEY);
                unprocessed
            });

            log::warn!(
                "[State] Request {request_id} timed out with {} unresolved field(s)",
                timeout_state.len()
            );
            self.resolve(
                request_id,
                ProcessingOutcome::Timeout {
                    current_state: self.current.clone(),
                    timeout_state,
                    unprocessed_state,
                },
                now,
            );
        } else if elapsed > self.timings.warning
            && now.saturating_duration_since(active.last_warning) > WARNING_LOG_INTERVAL
        {
            active.last_warning = now;
            let keys: Vec<String> = tree::diff_keys(&self.current, &self.processing)
                .into_iter()
                .filter(|k| k != REQUEST_ID_KEY)
                .collect();
            log::info!(
                "[State] Request {} still waiting for {} state object(s) to match...",
                active.id,
                keys.len()
            );
            for key in keys {
                log::info!(
                    "[State] Request waiting for {}s on {key} state",
                    elapsed.as_secs()
                );
            }
        }
    }

    fn resolve(&mut self, request_id: String, outcome: ProcessingOutcome, now: Instant) {
        log::info!("[State] Request {request_id} ended: {}", outcome.status());
        self.events.push(StateEvent::ProcessingEnded { request_id, outcome });
        self.clear_processing();
        self.promote_queued(now);
    }

    fn clear_processing(&mut self) {
        self.requested_incoming = Tree::new();
        self.requested_outgoing = Tree::new();
        self.processing = Tree::new();
        self.active = None;
    }

    // ── Server-notify watch ─────────────────────────────────────────────────

    /// Arms a one-shot wait for `current` to match `target`.
    ///
    /// When it matches, the next [`tick`](Self::tick) sends
    /// `APPINITIALSTATESET`. On timeout the unmatched diff is kept in
    /// [`watch_mismatch`](Self::watch_mismatch) and the launcher is released
    /// anyway unless [`StateTimings::release_watch_on_timeout`] is off, in
    /// which case `STATE_ERROR` is sent instead.
    pub fn watch_for_state(&mut self, target: Tree) {
        let now = Instant::now();
        self.watch = Some(ServerWatch {
            target,
            started: now,
            last_warning: now,
        });
        self.watch_mismatch = None;
    }

    fn tick_watch(&mut self, now: Instant, sink: &mut dyn MessageSink) {
        let Some(watch) = &mut self.watch else {
            return;
        };

        let mismatch = tree::diff(&self.current, &watch.target);
        if mismatch.is_empty() {
            log::info!("[State] Connect state matched");
            send(sink, outbound::INITIAL_STATE_SET, "");
            self.watch = None;
            self.events.push(StateEvent::WatchReleased {
                matched: true,
                mismatch,
            });
            return;
        }

        let elapsed = now.saturating_duration_since(watch.started);
        if elapsed > self.timings.timeout {
            log::warn!(
                "[State] Timed out waiting on {} state object(s) for connect",
                mismatch.len()
            );
            if self.timings.release_watch_on_timeout {
                send(sink, outbound::INITIAL_STATE_SET, "");
            } else {
                send(sink, outbound::STATE_ERROR, CONNECT_STATE_TIMEOUT_ERROR);
            }
            self.watch = None;
            self.watch_mismatch = Some(mismatch.clone());
            self.events.push(StateEvent::WatchReleased {
                matched: false,
                mismatch,
            });
        } else if elapsed > self.timings.warning
            && now.saturating_duration_since(watch.last_warning) > WARNING_LOG_INTERVAL
        {
            watch.last_warning = now;
            log::info!(
                "[State] Connection waiting on {} state object(s) to match...",
                mismatch.len()
            );
            for key in mismatch.keys() {
                log::info!(
                    "[State] Connection waiting for {}s on {key} state",
                    elapsed.as_secs()
                );
            }
        }
    }

    /// Whether a server-notify watch is armed.
    pub fn is_watching(&self) -> bool {
        self.watch.is_some()
    }

    /// Fields that still differed when the last watch timed out.
    pub fn watch_mismatch(&self) -> Option<&Tree> {
        self.watch_mismatch.as_ref()
    }

    // ── Current state ───────────────────────────────────────────────────────

    /// Authoritative application state.
    pub fn current_state(&self) -> &Tree {
        &self.current
    }

    /// Authoritative application state as JSON text.
    pub fn current_state_json(&self) -> String {
        Value::Object(self.current.clone()).to_string()
    }

    /// Value in `current` at a dotted path.
    pub fn current_value(&self, path: &str) -> Option<&Value> {
        tree::get_path(&self.current, path)
    }

    /// Outstanding (not yet claimed) requested value at a dotted path.
    pub fn requested_value(&self, path: &str) -> Option<&Value> {
        if is_request_id(path) {
            return None;
        }
        tree::get_path(&self.requested_outgoing, path)
    }

    /// Whether every field of `target` already holds in `current`.
    pub fn matches_current(&self, target: &Tree) -> bool {
        tree::diff(&self.current, target).is_empty()
    }

    /// Removes a dotted key from `current`, pruning emptied parents.
    pub fn remove_current_value(&mut self, path: &str) -> Option<Value> {
        tree::remove_path(&mut self.current, path)
    }

    /// Replaces `current` with `json`, or empties it when `json` is empty or
    /// not a JSON object.
    pub fn reset_current_state(&mut self, json: &str) {
        if let Some(state) = tree::parse_tree(json) {
            log::debug!("[State] Reset current state using provided json");
            self.current = state;
        } else {
            log::debug!("[State] Reset current state to empty");
            self.current = Tree::new();
        }
    }

    /// Pushes state to the web client.
    ///
    /// A complete push sends all of `current`; otherwise only what changed
    /// since the last push. Either way the mirror then equals `current`.
    pub fn send_current_state_to_web(&mut self, complete: bool) {
        let current_state = if complete {
            self.current.clone()
        } else {
            tree::diff(&self.web_mirror, &self.current)
        };
        self.events.push(StateEvent::WebSync { current_state });
        self.web_mirror.clone_from(&self.current);
    }

    /// Records whether the remote stream is connected. Any call forgets what
    /// the web client was last sent.
    pub fn set_stream_connected(&mut self, connected: bool) {
        self.stream_connected = connected;
        self.web_mirror = Tree::new();
    }

    /// Whether the remote stream is connected.
    pub fn stream_connected(&self) -> bool {
        self.stream_connected
    }

    /// Writes `current` to `path` as JSON.
    pub fn save_current_state(&self, path: &Path) -> Result<()> {
        let text = serde_json::to_string(&self.current)?;
        fs::write(path, text)
            .with_context(|| format!("Failed to write state to {}", path.display()))?;
        log::info!("[State] JSON data saved to file: {}", path.display());
        Ok(())
    }

    /// Writes all five state trees to `path` for debugging.
    pub fn dump_state(&self, path: &Path) -> Result<()> {
        let sections = [
            ("Requested State Change", &self.requested_incoming),
            ("Requested State Change (processed)", &self.requested_outgoing),
            ("Processing State Change", &self.processing),
            ("Current State", &self.current),
            ("Current Web State", &self.web_mirror),
        ];

        let mut out = format!("State dump {}\n\n", chrono::Local::now().to_rfc3339());
        for (title, state) in sections {
            let body = serde_json::to_string_pretty(state)?;
            let _ = write!(out, "{title}\n-------------------------\n\n{body}\n\n");
        }

        fs::write(path, out)
            .with_context(|| format!("Failed to write state dump to {}", path.display()))?;
        log::info!("[State] State dump saved to file: {}", path.display());
        Ok(())
    }

    // ── Default initial state ───────────────────────────────────────────────

    /// Sets the state applied when the launcher connects without one.
    ///
    /// With `apply_now` the state is also submitted as a request right away.
    pub fn set_default_initial_state(&mut self, json: &str, apply_now: bool) {
        self.default_initial_state = Some(json.to_string());
        if apply_now {
            self.accept_request(json, true);
        }
    }

    /// Whether a default initial state is configured.
    pub fn has_default_initial_state(&self) -> bool {
        self.default_initial_state.as_deref().is_some_and(|s| !s.is_empty())
    }

    /// The default initial state, if any.
    pub fn default_initial_state(&self) -> Option<&str> {
        self.default_initial_state.as_deref()
    }

    /// Merges `override_json` over the default initial state.
    ///
    /// Falls back to `override_json` unchanged if either side is not a JSON
    /// object.
    pub fn merge_default_initial_state(&self, override_json: &str) -> String {
        let default = self.default_initial_state.as_deref().and_then(tree::parse_tree);
        match (default, tree::parse_tree(override_json)) {
            (Some(default), Some(overrides)) => {
                Value::Object(tree::merge(&default, &overrides)).to_string()
            }
            _ => override_json.to_string(),
        }
    }

    // ── Introspection ───────────────────────────────────────────────────────

    /// Whether a request is in flight.
    pub fn is_processing(&self) -> bool {
        self.active.is_some()
    }

    /// Identifier of the in-flight request.
    pub fn active_request_id(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.id.as_str())
    }

    /// Requests waiting behind the in-flight one.
    pub fn queue_len(&self) -> usize {
        self.queue.len()
    }

    /// Leaves the in-flight request needs confirmed.
    pub fn requested_leaf_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.requested_leaves)
    }

    /// Leaves claimed so far by the host.
    pub fn processing_leaf_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.processing_leaves)
    }

    /// Leaves confirmed so far.
    pub fn finished_leaf_count(&self) -> usize {
        self.active.as_ref().map_or(0, |a| a.finished_leaves)
    }

    /// The last raw request accepted, after sanitizing.
    pub fn requested_incoming(&self) -> &Tree {
        &self.requested_incoming
    }

    /// Outstanding fields of the in-flight request.
    pub fn requested_outgoing(&self) -> &Tree {
        &self.requested_outgoing
    }

    /// Claimed but unconfirmed fields, plus the request id.
    pub fn processing(&self) -> &Tree {
        &self.processing
    }

    /// Last state known to have reached the web client.
    pub fn web_mirror(&self) -> &Tree {
        &self.web_mirror
    }

    /// Current warning/timeout windows.
    pub fn timings(&self) -> StateTimings {
        self.timings
    }

    /// Adjusts the warning and timeout windows.
    pub fn set_timings(&mut self, warning: Duration, timeout: Duration) {
        self.timings.warning = warning;
        self.timings.timeout = timeout;
    }

    /// Takes every event produced since the last call.
    pub fn drain_events(&mut self) -> Vec<StateEvent> {
        std::mem::take(&mut self.events)
    }
}

fn is_request_id(path: &str) -> bool {
    path == REQUEST_ID_KEY
}

/// Writes `value` at `path` in `target`, deep-merging objects.
fn commit(target: &mut Tree, path: &str, value: Value) {
    let mut wrapper = Tree::new();
    if tree::set_path(&mut wrapper, path, value) {
        tree::overlay(target, &wrapper);
    }
}

fn send(sink: &mut dyn MessageSink, name: &str, arg: &str) {
    if let Err(e) = sink.send_message(name, arg) {
        log::warn!("[State] Failed to send {name}: {e:#}");
    }
}

// ─── Tests ──────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[derive(Default)]
    struct Recorded(Vec<(String, String)>);

    impl MessageSink for Recorded {
        fn send_message(&mut self, name: &str, arg: &str) -> Result<()> {
            self.0.push((name.to_string(), arg.to_string()));
            Ok(())
        }
    }

    fn tree(v: Value) -> Tree {
        v.as_object().cloned().unwrap_or_default()
    }

    fn ended(events: &[StateEvent]) -> Vec<&ProcessingOutcome> {
        events
            .iter()
            .filter_map(|e| match e {
                StateEvent::ProcessingEnded { outcome, .. } => Some(outcome),
                _ => None,
            })
            .collect()
    }

    fn later(secs: u64) -> Instant {
        Instant::now() + Duration::from_secs(secs)
    }

    #[test]
    fn test_immediate_match_resolves_without_claims() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"a":1}"#);

        assert!(r.accept_request(r#"{"a":1}"#, true));
        assert!(!r.is_processing());
        assert_eq!(r.requested_leaf_count(), 0);

        let events = r.drain_events();
        let outcomes = ended(&events);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_complete());
    }

    #[test]
    fn test_single_field_lifecycle() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        assert!(r.accept_request(r#"{"b":2}"#, true));
        assert_eq!(r.requested_leaf_count(), 1);
        assert!(r.processing().contains_key(REQUEST_ID_KEY));

        assert_eq!(r.claim_field("b", false), Some(json!(2)));
        assert_eq!(r.processing().get("b"), Some(&json!(2)));
        assert_eq!(r.processing_leaf_count(), 1);
        assert!(r.requested_value("b").is_none());

        assert!(r.confirm_field("b"));
        assert_eq!(r.current_value("b"), Some(&json!(2)));
        assert_eq!(r.finished_leaf_count(), r.requested_leaf_count());

        r.tick(Instant::now(), &mut sink);
        assert!(!r.is_processing());
        assert!(r.processing().is_empty());
        assert_eq!(r.web_mirror(), r.current_state());

        let events = r.drain_events();
        assert!(matches!(events[0], StateEvent::ProcessingStarted { .. }));
        let outcomes = ended(&events);
        assert_eq!(outcomes.len(), 1);
        assert!(outcomes[0].is_complete());
        assert!(sink.0.is_empty());
    }

    #[test]
    fn test_timeout_reports_unconfirmed_fields() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.accept_request(r#"{"c":3}"#, true);
        r.claim_field("c", false);
        r.drain_events();

        r.tick(later(5), &mut sink);
        assert!(r.is_processing());

        r.tick(later(31), &mut sink);
        assert!(!r.is_processing());
        assert!(r.processing().is_empty());

        let events = r.drain_events();
        match ended(&events).as_slice() {
            [ProcessingOutcome::Timeout { timeout_state, unprocessed_state, .. }] => {
                assert_eq!(timeout_state, &tree(json!({"c": 3})));
                assert!(unprocessed_state.is_none());
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
        assert!(r.current_value("c").is_none());
    }

    #[test]
    fn test_timeout_also_reports_unclaimed_fields() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.accept_request(r#"{"c":3,"d":4}"#, true);
        r.claim_field("c", false);
        r.tick(later(31), &mut sink);

        let events = r.drain_events();
        match ended(&events).as_slice() {
            [ProcessingOutcome::Timeout { timeout_state, unprocessed_state, .. }] => {
                assert_eq!(timeout_state, &tree(json!({"c": 3})));
                assert_eq!(unprocessed_state.as_ref(), Some(&tree(json!({"d": 4}))));
            }
            other => panic!("expected a timeout, got {other:?}"),
        }
    }

    #[test]
    fn test_nested_dotted_instant_confirm() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.accept_request(r#"{"x":{"y":5}}"#, true);
        assert_eq!(r.claim_field("x.y", true), Some(json!(5)));
        assert_eq!(r.current_value("x.y"), Some(&json!(5)));
        assert_eq!(r.finished_leaf_count(), 1);

        r.tick(Instant::now(), &mut sink);
        let events = r.drain_events();
        assert!(ended(&events)[0].is_complete());
    }

    #[test]
    fn test_unclaimed_fields_resolve_as_unmatched() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.accept_request(r#"{"a":1,"b":2}"#, true);
        r.claim_field("a", true);
        r.tick(Instant::now(), &mut sink);

        let events = r.drain_events();
        match ended(&events).as_slice() {
            [ProcessingOutcome::Unmatched { unprocessed_state, current_state }] => {
                assert_eq!(unprocessed_state, &tree(json!({"b": 2})));
                assert_eq!(current_state, &tree(json!({"a": 1})));
            }
            other => panic!("expected unmatched, got {other:?}"),
        }
    }

    #[test]
    fn test_requests_queue_in_order_while_busy() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        assert!(r.accept_request(r#"{"step":1}"#, true));
        assert!(!r.accept_request(r#"{"step":2}"#, true));
        assert!(!r.accept_request(r#"{"step":3}"#, true));
        assert_eq!(r.queue_len(), 2);

        let mut seen = Vec::new();
        for _ in 0..3 {
            for event in r.drain_events() {
                if let StateEvent::ProcessingStarted { requested, .. } = event {
                    seen.push(requested["step"].clone());
                }
            }
            r.claim_field("step", true);
            r.tick(Instant::now(), &mut sink);
        }
        for event in r.drain_events() {
            if let StateEvent::ProcessingStarted { requested, .. } = event {
                seen.push(requested["step"].clone());
            }
        }

        assert_eq!(seen, vec![json!(1), json!(2), json!(3)]);
        assert_eq!(r.queue_len(), 0);
        assert!(!r.is_processing());
        assert_eq!(r.current_value("step"), Some(&json!(3)));
    }

    #[test]
    fn test_queued_events_report_queue_length() {
        let mut r = StateReconciler::default();
        r.accept_request(r#"{"a":1}"#, true);
        r.accept_request(r#"{"a":2}"#, true);
        assert!(!r.accept_request("not json", true));

        let queued: Vec<usize> = r
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                StateEvent::Queued { queue_length, .. } => Some(queue_length),
                _ => None,
            })
            .collect();
        assert_eq!(queued, vec![1]);
    }

    #[test]
    fn test_invalid_json_is_rejected_without_mutation() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"keep":true}"#);
        assert!(!r.accept_request("{broken", true));
        assert!(!r.accept_request("[1,2,3]", true));
        assert!(!r.is_processing());
        assert_eq!(r.current_state(), &tree(json!({"keep": true})));
        assert!(r.drain_events().is_empty());
    }

    #[test]
    fn test_nulls_are_stripped_from_requests() {
        let mut r = StateReconciler::default();
        r.accept_request(r#"{"a":null,"b":{"c":null,"d":1}}"#, false);
        assert_eq!(r.requested_leaf_count(), 1);
        assert!(r.requested_value("a").is_none());
        assert_eq!(r.requested_value("b.d"), Some(&json!(1)));
    }

    #[test]
    fn test_compare_flag_controls_diff_against_current() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"a":1,"b":2}"#);

        r.accept_request(r#"{"a":1,"b":3}"#, true);
        assert_eq!(r.requested_leaf_count(), 1);
        r.claim_field("b", true);
        r.tick(Instant::now(), &mut Recorded::default());

        r.accept_request(r#"{"a":1,"b":3}"#, false);
        assert_eq!(r.requested_leaf_count(), 2);
    }

    #[test]
    fn test_confirm_unclaimed_field_is_noop() {
        let mut r = StateReconciler::default();
        assert!(!r.confirm_field("a"));

        r.accept_request(r#"{"a":1}"#, true);
        assert!(!r.confirm_field("a"));
        assert!(!r.confirm_field(REQUEST_ID_KEY));
        assert_eq!(r.finished_leaf_count(), 0);
        assert!(r.current_state().is_empty());
    }

    #[test]
    fn test_claim_object_counts_its_leaves_and_confirm_deep_merges() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"env":{"weather":"sun","time":9}}"#);

        r.accept_request(r#"{"env":{"time":18,"fog":{"density":0.2}}}"#, true);
        assert_eq!(r.requested_leaf_count(), 2);

        let claimed = r.claim_field("env", false).unwrap();
        assert_eq!(claimed, json!({"time": 18, "fog": {"density": 0.2}}));
        assert_eq!(r.processing_leaf_count(), 2);

        assert!(r.confirm_field("env"));
        assert_eq!(r.finished_leaf_count(), 2);
        assert_eq!(
            r.current_state(),
            &tree(json!({"env": {"weather": "sun", "time": 18, "fog": {"density": 0.2}}}))
        );
    }

    #[test]
    fn test_partial_confirms_of_claimed_object() {
        let mut r = StateReconciler::default();
        r.accept_request(r#"{"cam":{"x":1,"y":2}}"#, true);
        r.claim_field("cam", false);

        assert!(r.confirm_field("cam.x"));
        r.tick(Instant::now(), &mut Recorded::default());
        assert!(r.is_processing());

        assert!(r.confirm_field("cam.y"));
        assert!(!r.processing().contains_key("cam"));
        r.tick(Instant::now(), &mut Recorded::default());
        assert!(!r.is_processing());
        assert_eq!(r.current_state(), &tree(json!({"cam": {"x": 1, "y": 2}})));
    }

    #[test]
    fn test_leaf_conservation_across_claims() {
        let request = json!({"a": 1, "b": [1, 2], "c": {"d": "x", "e": {"f": true}}});
        let mut r = StateReconciler::default();
        r.accept_request(&request.to_string(), true);
        assert_eq!(r.requested_leaf_count(), tree::leaf_count(&tree(request)));

        r.claim_field("a", false);
        r.claim_field("b", true);
        r.claim_field("c.e.f", false);
        r.claim_field("c", false);
        for path in ["a", "c.e.f", "c"] {
            assert!(r.confirm_field(path));
        }
        assert_eq!(r.finished_leaf_count(), r.requested_leaf_count());
    }

    #[test]
    fn test_watch_fires_when_state_matches() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.watch_for_state(tree(json!({"car": "red"})));
        r.tick(Instant::now(), &mut sink);
        assert!(sink.0.is_empty());
        assert!(r.is_watching());

        r.reset_current_state(r#"{"car":"red","extra":1}"#);
        r.tick(Instant::now(), &mut sink);
        assert_eq!(sink.0, vec![(outbound::INITIAL_STATE_SET.to_string(), String::new())]);
        assert!(!r.is_watching());

        r.tick(Instant::now(), &mut sink);
        assert_eq!(sink.0.len(), 1);
    }

    #[test]
    fn test_watch_timeout_releases_and_records_mismatch() {
        let mut r = StateReconciler::default();
        let mut sink = Recorded::default();

        r.watch_for_state(tree(json!({"car": "red"})));
        r.tick(later(31), &mut sink);

        assert_eq!(sink.0, vec![(outbound::INITIAL_STATE_SET.to_string(), String::new())]);
        assert_eq!(r.watch_mismatch(), Some(&tree(json!({"car": "red"}))));
        let events = r.drain_events();
        assert!(matches!(
            events.as_slice(),
            [StateEvent::WatchReleased { matched: false, .. }]
        ));
    }

    #[test]
    fn test_watch_timeout_can_report_error_instead() {
        let mut r = StateReconciler::new(StateTimings {
            release_watch_on_timeout: false,
            ..StateTimings::default()
        });
        let mut sink = Recorded::default();

        r.watch_for_state(tree(json!({"car": "red"})));
        r.tick(later(31), &mut sink);
        assert_eq!(sink.0[0].0, outbound::STATE_ERROR);
        assert_eq!(sink.0[0].1, CONNECT_STATE_TIMEOUT_ERROR);
    }

    #[test]
    fn test_set_timings_shortens_timeout() {
        let mut r = StateReconciler::default();
        r.set_timings(Duration::from_secs(1), Duration::from_secs(2));
        r.accept_request(r#"{"c":3}"#, true);
        r.claim_field("c", false);
        r.tick(later(3), &mut Recorded::default());
        assert!(!r.is_processing());
    }

    #[test]
    fn test_web_sync_sends_minimal_diff() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"a":1,"b":2}"#);
        r.send_current_state_to_web(false);
        r.reset_current_state(r#"{"a":1,"b":3}"#);
        r.send_current_state_to_web(false);
        r.send_current_state_to_web(true);

        let pushes: Vec<Tree> = r
            .drain_events()
            .into_iter()
            .filter_map(|e| match e {
                StateEvent::WebSync { current_state } => Some(current_state),
                _ => None,
            })
            .collect();
        assert_eq!(
            pushes,
            vec![
                tree(json!({"a": 1, "b": 2})),
                tree(json!({"b": 3})),
                tree(json!({"a": 1, "b": 3})),
            ]
        );

        r.set_stream_connected(true);
        assert!(r.web_mirror().is_empty());
        assert!(r.stream_connected());
    }

    #[test]
    fn test_remove_current_value_prunes_parents() {
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"a":{"b":{"c":1}},"d":1}"#);
        assert_eq!(r.remove_current_value("a.b.c"), Some(json!(1)));
        assert_eq!(r.current_state(), &tree(json!({"d": 1})));
        r.reset_current_state("");
        assert!(r.current_state().is_empty());
    }

    #[test]
    fn test_default_initial_state_merge() {
        let mut r = StateReconciler::default();
        assert!(!r.has_default_initial_state());
        assert_eq!(r.merge_default_initial_state(r#"{"a":1}"#), r#"{"a":1}"#);

        r.set_default_initial_state(r#"{"car":"red","tags":["x"]}"#, false);
        assert!(r.has_default_initial_state());
        let merged: Value = serde_json::from_str(&r.merge_default_initial_state(
            r#"{"car":"blue","tags":["y"]}"#,
        ))
        .unwrap();
        assert_eq!(merged, json!({"car": "blue", "tags": ["x", "y"]}));
    }

    #[test]
    fn test_default_initial_state_apply_now() {
        let mut r = StateReconciler::default();
        r.set_default_initial_state(r#"{"car":"red"}"#, true);
        assert!(r.is_processing());
        assert_eq!(r.requested_value("car"), Some(&json!("red")));
    }

    #[test]
    fn test_save_and_dump_state() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut r = StateReconciler::default();
        r.reset_current_state(r#"{"a":1}"#);

        let state_path = dir.path().join("state.json");
        r.save_current_state(&state_path).unwrap();
        let saved: Value = serde_json::from_str(&fs::read_to_string(&state_path).unwrap()).unwrap();
        assert_eq!(saved, json!({"a": 1}));

        let dump_path = dir.path().join("StateDump.txt");
        r.dump_state(&dump_path).unwrap();
        let dump = fs::read_to_string(&dump_path).unwrap();
        assert!(dump.contains("Current Web State"));
        assert!(dump.contains("Requested State Change (processed)"));
    }

    #[test]
    fn test_request_ids_increase() {
        let mut r = StateReconciler::default();
        r.accept_request(r#"{"a":1}"#, true);
        assert_eq!(r.active_request_id(), Some("0"));
        r.claim_field("a", true);
        r.tick(Instant::now(), &mut Recorded::default());
        r.accept_request(r#"{"a":2}"#, true);
        assert_eq!(r.active_request_id(), Some("1"));
    }
}
