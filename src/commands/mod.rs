//! Command implementations.
//!
//! - [`builtin`] - launcher commands registered into the transport's table
//! - [`json`] - JSON tree operations on files (diff, merge, leaves)

pub mod builtin;
pub mod json;

#[doc(inline)]
pub use builtin::{register as register_builtin, StateHost};
