//! Launcher wire layer.
//!
//! - [`codec`]: length prefixes, message bodies, the launcher-side decoder
//! - [`frame_buffer`]: cursor-based reassembly buffer for the inbound stream
//! - [`reader`]: the inbound socket thread

pub mod codec;
pub mod frame_buffer;
pub mod reader;

pub use codec::{
    binary_body, encode, image_payload, text_body, FrameDecoder, InboundMessage, LengthPrefix,
    OutboundMessage,
};
pub use frame_buffer::FrameBuffer;
pub use reader::Reader;
