//! Application state reconciliation.
//!
//! State is a JSON object tree. A request arrives as JSON, is diffed against
//! what the application already shows, and the remaining leaves are handed
//! to the host to claim and confirm:
//!
//! ```text
//!          accept_request           claim_field          confirm_field
//!  Idle ──────────────────► InFlight ──────────► claimed ───────────► current
//!   ▲                          │
//!   │      tick(): complete | timeout | unmatched
//!   └──────────────────────────┘  (next queued request is promoted)
//! ```
//!
//! - [`tree`]: diff / merge / leaf counting and dotted-path access
//! - [`events`]: notifications for the host and the web client
//! - [`reconciler`]: the state machine itself

pub mod events;
pub mod reconciler;
pub mod tree;

pub use events::{ProcessingOutcome, StateEvent, REQUEST_ID_KEY};
pub use reconciler::{StateReconciler, StateTimings};
pub use tree::Tree;
