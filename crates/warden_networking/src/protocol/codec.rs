//! # Frame Codec
//!
//! Encoding into a reusable buffer, and decoding of a connection's byte
//! stream into frames.
//!
//! ## Design
//!
//! - Stream sockets do not keep message boundaries: one read may hold zero,
//!   one or several frames, or a frame split across reads.
//! - The decoder peels complete frames off the front of its buffer. What
//!   happens to an incomplete tail depends on [`FramingPolicy`].
//! - A header declaring more than `max_frame_len` bytes cannot be trusted, so
//!   the stream cannot be resynchronised: the buffer is discarded.

use serde::{Deserialize, Serialize};

use super::frame::{Frame, FrameType, RegistrationInfo, FRAME_HEADER_LEN};
use crate::error::{FrameError, FrameResult};

/// Treatment of a frame whose payload is not fully buffered yet.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FramingPolicy {
    /// Keep the partial frame and complete it on later reads.
    #[default]
    Reassemble,
    /// Report a truncated frame and drop everything after it.
    DiscardPartial,
}

/// Frame encoder - writes frames to a reusable buffer.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    buffer: Vec<u8>,
}

impl FrameEncoder {
    /// Creates an encoder with an empty buffer.
    #[must_use]
    pub const fn new() -> Self {
        Self { buffer: Vec::new() }
    }

    /// Clears the buffer for reuse.
    #[inline]
    pub fn reset(&mut self) {
        self.buffer.clear();
    }

    /// Number of bytes written.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Returns true if nothing has been written.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Written bytes.
    #[inline]
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.buffer
    }

    /// Appends an Opaque frame.
    pub fn encode_opaque(&mut self, payload: &[u8]) -> FrameResult<()> {
        let length = payload_length(payload.len())?;
        self.write_header(FrameType::Opaque, length);
        self.buffer.extend_from_slice(payload);
        Ok(())
    }

    /// Appends a RegistrationInfo frame.
    pub fn encode_registration(&mut self, info: &RegistrationInfo) -> FrameResult<()> {
        let length = payload_length(info.payload_len())?;
        let start = self.buffer.len();
        self.write_header(FrameType::RegistrationInfo, length);
        if let Err(error) = info.encode_payload(&mut self.buffer) {
            self.buffer.truncate(start);
            return Err(error);
        }
        Ok(())
    }

    /// Appends any frame.
    pub fn encode(&mut self, frame: &Frame) -> FrameResult<()> {
        match frame {
            Frame::Opaque(payload) => self.encode_opaque(payload),
            Frame::RegistrationInfo(info) => self.encode_registration(info),
        }
    }

    fn write_header(&mut self, frame_type: FrameType, length: u32) {
        self.buffer.push(frame_type.as_u8());
        self.buffer.extend_from_slice(&length.to_le_bytes());
    }
}

fn payload_length(len: usize) -> FrameResult<u32> {
    u32::try_from(len).map_err(|_| FrameError::PayloadTooLarge(len))
}

/// Encodes one frame into a fresh buffer.
pub fn encode_frame(frame: &Frame) -> FrameResult<Vec<u8>> {
    let mut encoder = FrameEncoder::new();
    encoder.encode(frame)?;
    Ok(encoder.buffer)
}

/// Frames and errors produced by one decoder push.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct DecodeOutcome {
    /// Complete frames, in stream order.
    pub frames: Vec<Frame>,
    /// Protocol errors hit while decoding.
    pub errors: Vec<FrameError>,
}

impl DecodeOutcome {
    /// Returns true if nothing was produced.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.frames.is_empty() && self.errors.is_empty()
    }
}

/// Stream decoder for one connection.
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    policy: FramingPolicy,
    max_frame_len: usize,
}

impl FrameDecoder {
    /// Creates a decoder.
    #[must_use]
    pub fn new(policy: FramingPolicy, max_frame_len: usize) -> Self {
        Self {
            buffer: Vec::new(),
            policy,
            max_frame_len,
        }
    }

    /// Bytes held back waiting for the rest of a frame.
    #[inline]
    #[must_use]
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    /// Active policy.
    #[inline]
    #[must_use]
    pub const fn policy(&self) -> FramingPolicy {
        self.policy
    }

    /// Appends bytes read from the stream and decodes every complete frame.
    pub fn push(&mut self, bytes: &[u8]) -> DecodeOutcome {
        self.buffer.extend_from_slice(bytes);

        let mut outcome = DecodeOutcome::default();
        let mut offset = 0;

        loop {
            let remaining = &self.buffer[offset..];
            if remaining.is_empty() {
                break;
            }

            if remaining.len() < FRAME_HEADER_LEN {
                if self.policy == FramingPolicy::DiscardPartial {
                    outcome.errors.push(FrameError::TruncatedHeader {
                        available: remaining.len(),
                    });
                    offset = self.buffer.len();
                }
                break;
            }

            let type_byte = remaining[0];
            let declared =
                u32::from_le_bytes([remaining[1], remaining[2], remaining[3], remaining[4]]) as usize;

            if declared > self.max_frame_len {
                outcome.errors.push(FrameError::Oversized {
                    declared,
                    max: self.max_frame_len,
                });
                offset = self.buffer.len();
                break;
            }

            let available = remaining.len() - FRAME_HEADER_LEN;
            if declared > available {
                if self.policy == FramingPolicy::DiscardPartial {
                    outcome
                        .errors
                        .push(FrameError::Truncated { declared, available });
                    offset = self.buffer.len();
                }
                break;
            }

            let payload = &remaining[FRAME_HEADER_LEN..FRAME_HEADER_LEN + declared];
            match Frame::from_payload(type_byte, payload) {
                Ok(frame) => outcome.frames.push(frame),
                Err(error) => outcome.errors.push(error),
            }
            offset += FRAME_HEADER_LEN + declared;
        }

        self.buffer.drain(..offset);
        outcome
    }

    /// Drops any partially buffered frame.
    pub fn clear(&mut self) {
        self.buffer.clear();
    }
}

/// Decodes a self-contained buffer.
///
/// Anything after the last complete frame is reported and discarded.
#[must_use]
pub fn decode_buffer(bytes: &[u8], max_frame_len: usize) -> DecodeOutcome {
    FrameDecoder::new(FramingPolicy::DiscardPartial, max_frame_len).push(bytes)
}
