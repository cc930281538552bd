//! # Wire Protocol
//!
//! Length-prefixed frames over a byte stream.
//!
//! ## Frame Structure
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │ Header (5 bytes)                                             │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Type (1) │ Length (4, little-endian)                         │
//! ├──────────────────────────────────────────────────────────────┤
//! │ Payload (Length bytes)                                       │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Type = 1` is Opaque (anti-cheat engine traffic, never interpreted here).
//! `Type = 2` is RegistrationInfo:
//!
//! ```text
//! platform (1) │ productUserId (UTF-8, NUL) │ identityToken (UTF-8, NUL)
//! ```
//!
//! Every field is encoded and decoded explicitly; nothing is copied from
//! in-memory layout.

mod codec;
mod frame;

pub use codec::{
    decode_buffer, encode_frame, DecodeOutcome, FrameDecoder, FrameEncoder, FramingPolicy,
};
pub use frame::{ClientPlatform, Frame, FrameType, RegistrationInfo, FRAME_HEADER_LEN};
