//! Notifications produced by the reconciler.
//!
//! The reconciler never talks to the remote web client directly. It queues
//! [`StateEvent`]s which the host drains once per tick; [`StateEvent::to_web_json`]
//! renders the exact payload the web client expects:
//!
//! ```text
//! Queued             {"state_queued":{..},"queue_length":n}
//! ProcessingStarted  {"RequestId":"7","state_processing":{..}}
//! ProcessingEnded    {"RequestId":"7","state_processing_ended":{"status":..,"current_state":..}}
//! WebSync            {"state_notify_web":{"status":"complete","current_state":..}}
//! ```

use serde::Serialize;
use serde_json::{json, Value};

use super::tree::Tree;

/// Field stamped into every in-flight request tree.
pub const REQUEST_ID_KEY: &str = "RequestId";

/// How an in-flight request finished.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum ProcessingOutcome {
    /// Every requested leaf was confirmed.
    Complete {
        /// Authoritative state after the request.
        current_state: Tree,
    },
    /// Claimed fields were not confirmed before the timeout.
    Timeout {
        /// Authoritative state at the time of the timeout.
        current_state: Tree,
        /// Claimed fields that never reached `current`.
        timeout_state: Tree,
        /// Requested fields that were never claimed, if any.
        #[serde(skip_serializing_if = "Option::is_none")]
        unprocessed_state: Option<Tree>,
    },
    /// Some requested fields were never claimed by the host.
    Unmatched {
        /// Authoritative state when the request was abandoned.
        current_state: Tree,
        /// Requested fields that were never claimed.
        unprocessed_state: Tree,
    },
}

impl ProcessingOutcome {
    /// Short status label, as sent on the wire.
    pub fn status(&self) -> &'static str {
        match self {
            Self::Complete { .. } => "complete",
            Self::Timeout { .. } => "timeout",
            Self::Unmatched { .. } => "unmatched",
        }
    }

    /// Whether the request finished with every leaf confirmed.
    pub fn is_complete(&self) -> bool {
        matches!(self, Self::Complete { .. })
    }
}

/// Something the host (and usually the web client) should hear about.
#[derive(Debug, Clone, PartialEq)]
pub enum StateEvent {
    /// A request arrived while another was in flight and was queued.
    Queued {
        /// The sanitized request.
        request: Tree,
        /// Queue length after enqueueing.
        queue_length: usize,
    },
    /// A request was accepted and has fields for the host to claim.
    ProcessingStarted {
        /// Request identifier.
        request_id: String,
        /// Fields to resolve, without the request id.
        requested: Tree,
    },
    /// A request resolved.
    ProcessingEnded {
        /// Request identifier.
        request_id: String,
        /// Result and diagnostics.
        outcome: ProcessingOutcome,
    },
    /// A state push to the web client, full or minimal.
    WebSync {
        /// Full state or the diff against the last push.
        current_state: Tree,
    },
    /// The server-notify watch released the launcher.
    WatchReleased {
        /// `true` when `current` matched the target, `false` on timeout.
        matched: bool,
        /// Fields still differing at release (empty when matched).
        mismatch: Tree,
    },
}

impl StateEvent {
    /// Renders the payload for the web client.
    ///
    /// Returns `None` for events that only concern the host.
    pub fn to_web_json(&self) -> Option<Value> {
        match self {
            Self::Queued { request, queue_length } => Some(json!({
                "state_queued": request,
                "queue_length": queue_length,
            })),
            Self::ProcessingStarted { request_id, requested } => Some(json!({
                REQUEST_ID_KEY: request_id,
                "state_processing": requested,
            })),
            Self::ProcessingEnded { request_id, outcome } => Some(json!({
                REQUEST_ID_KEY: request_id,
                "state_processing_ended": outcome,
            })),
            Self::WebSync { current_state } => Some(json!({
                "state_notify_web": {
                    "status": "complete",
                    "current_state": current_state,
                },
            })),
            Self::WatchReleased { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree(v: Value) -> Tree {
        v.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_timeout_outcome_serializes_with_status_tag() {
        let event = StateEvent::ProcessingEnded {
            request_id: "3".into(),
            outcome: ProcessingOutcome::Timeout {
                current_state: tree(json!({"a": 1})),
                timeout_state: tree(json!({"b": 2})),
                unprocessed_state: None,
            },
        };
        let web = event.to_web_json().unwrap();
        assert_eq!(
            web,
            json!({
                "RequestId": "3",
                "state_processing_ended": {
                    "status": "timeout",
                    "current_state": {"a": 1},
                    "timeout_state": {"b": 2},
                }
            })
        );
    }

    #[test]
    fn test_unmatched_outcome_carries_unprocessed_state() {
        let outcome = ProcessingOutcome::Unmatched {
            current_state: Tree::new(),
            unprocessed_state: tree(json!({"c": 3})),
        };
        assert_eq!(outcome.status(), "unmatched");
        assert!(!outcome.is_complete());
        let value = serde_json::to_value(&outcome).unwrap();
        assert_eq!(value["unprocessed_state"], json!({"c": 3}));
    }

    #[test]
    fn test_queued_payload() {
        let event = StateEvent::Queued {
            request: tree(json!({"car": "red"})),
            queue_length: 2,
        };
        assert_eq!(
            event.to_web_json().unwrap(),
            json!({"state_queued": {"car": "red"}, "queue_length": 2})
        );
    }

    #[test]
    fn test_watch_release_is_host_only() {
        let event = StateEvent::WatchReleased { matched: true, mismatch: Tree::new() };
        assert!(event.to_web_json().is_none());
    }
}
