//! Stand-in application host.
//!
//! A real application applies each requested field to its scene and
//! confirms it when done. [`EchoHost`] applies everything instantly: every
//! top-level field of a started request is claimed with instant confirm, so
//! requests complete on the next tick. The `run` command uses it to exercise
//! a launcher end to end.

use serde_json::Value;

use crate::commands::StateHost;
use crate::state::{StateEvent, StateReconciler, StateTimings};

/// Host that accepts every requested field as-is.
#[derive(Debug, Default)]
pub struct EchoHost {
    reconciler: StateReconciler,
    completed: usize,
}

impl EchoHost {
    /// Creates a host with the given reconciler windows.
    #[must_use]
    pub fn new(timings: StateTimings) -> Self {
        Self {
            reconciler: StateReconciler::new(timings),
            completed: 0,
        }
    }

    /// Reacts to reconciler events and returns the web notices they produce.
    ///
    /// Call after anything that may start a request (dispatch or tick) so
    /// fields are claimed before the reconciler next checks progress.
    pub fn process_events(&mut self) -> Vec<Value> {
        let mut notices = Vec::new();
        for event in self.reconciler.drain_events() {
            match &event {
                StateEvent::ProcessingStarted { request_id, requested } => {
                    log::debug!(
                        "[State] Applying {} field(s) for request {request_id}",
                        requested.len()
                    );
                    for path in requested.keys() {
                        self.reconciler.claim_field(path, true);
                    }
                }
                StateEvent::ProcessingEnded { request_id, outcome } => {
                    if outcome.is_complete() {
                        self.completed += 1;
                    }
                    log::info!("[State] Request {request_id} {}", outcome.status());
                }
                StateEvent::WatchReleased { matched, mismatch } => {
                    if !matched {
                        log::warn!(
                            "[State] Launcher released with {} mismatched field(s)",
                            mismatch.len()
                        );
                    }
                }
                StateEvent::Queued { .. } | StateEvent::WebSync { .. } => {}
            }
            notices.extend(event.to_web_json());
        }
        notices
    }

    /// Requests that completed with every field confirmed.
    pub fn completed(&self) -> usize {
        self.completed
    }

    /// Read access to the reconciler.
    pub fn state(&self) -> &StateReconciler {
        &self.reconciler
    }
}

impl StateHost for EchoHost {
    fn reconciler(&mut self) -> &mut StateReconciler {
        &mut self.reconciler
    }
}
