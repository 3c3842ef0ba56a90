//! Protocol module - the little that is known about the sensor's wire format.

pub mod codec;
pub mod constants;
pub mod status;

pub use codec::{BulkPayload, CodecError, FrameVariant};
pub use constants::*;
pub use status::StatusWord;

/// Register address carried in `bRequest`.
pub type RegisterAddress = u8;

/// Value carried in `wValue` of a control write.
pub type RegisterValue = u16;
