//! # Frame Definitions
//!
//! Typed values for the two frame shapes, and the RegistrationInfo payload
//! layout.

use crate::error::{FrameError, FrameResult};

/// Size of the frame header: type byte plus 32-bit length.
pub const FRAME_HEADER_LEN: usize = 5;

/// Types of frames in the protocol.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    /// Bidirectional: anti-cheat engine payload, forwarded verbatim.
    Opaque = 1,
    /// Bidirectional: who the sender claims to be.
    RegistrationInfo = 2,
}

impl FrameType {
    /// Maps a wire byte to a frame type.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            1 => Some(Self::Opaque),
            2 => Some(Self::RegistrationInfo),
            _ => None,
        }
    }

    /// Wire byte for this type.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }
}

/// Platform a client runs on, as reported to the anti-cheat engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientPlatform {
    /// Not reported.
    #[default]
    Unknown = 0,
    /// Microsoft Windows.
    Windows = 1,
    /// Apple macOS.
    Mac = 2,
    /// Linux.
    Linux = 3,
    /// Xbox consoles.
    Xbox = 4,
    /// PlayStation consoles.
    PlayStation = 5,
    /// Nintendo consoles.
    Nintendo = 6,
    /// Apple iOS.
    Ios = 7,
    /// Android.
    Android = 8,
}

impl ClientPlatform {
    /// Maps a wire ordinal to a platform.
    #[must_use]
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Unknown),
            1 => Some(Self::Windows),
            2 => Some(Self::Mac),
            3 => Some(Self::Linux),
            4 => Some(Self::Xbox),
            5 => Some(Self::PlayStation),
            6 => Some(Self::Nintendo),
            7 => Some(Self::Ios),
            8 => Some(Self::Android),
            _ => None,
        }
    }

    /// Wire ordinal for this platform.
    #[inline]
    #[must_use]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Platform this binary was compiled for.
    #[must_use]
    pub const fn current() -> Self {
        if cfg!(target_os = "windows") {
            Self::Windows
        } else if cfg!(target_os = "macos") {
            Self::Mac
        } else if cfg!(target_os = "linux") {
            Self::Linux
        } else if cfg!(target_os = "ios") {
            Self::Ios
        } else if cfg!(target_os = "android") {
            Self::Android
        } else {
            Self::Unknown
        }
    }
}

/// Registration message: who the sender claims to be.
///
/// Sent to every peer as soon as a connection is established.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct RegistrationInfo {
    /// Sender's platform.
    pub platform: ClientPlatform,
    /// Stable product-user identity.
    pub product_user_id: String,
    /// Identity token (a JWT) proving `product_user_id`.
    pub identity_token: String,
}

impl RegistrationInfo {
    /// Smallest valid payload: platform byte plus two empty C-strings.
    pub const MIN_PAYLOAD_LEN: usize = 3;

    /// Creates a registration message.
    #[must_use]
    pub fn new(
        platform: ClientPlatform,
        product_user_id: impl Into<String>,
        identity_token: impl Into<String>,
    ) -> Self {
        Self {
            platform,
            product_user_id: product_user_id.into(),
            identity_token: identity_token.into(),
        }
    }

    /// Payload size once encoded.
    #[must_use]
    pub fn payload_len(&self) -> usize {
        1 + self.product_user_id.len() + 1 + self.identity_token.len() + 1
    }

    /// Appends the payload to `out`.
    ///
    /// Strings containing NUL cannot be represented as C-strings and are
    /// rejected.
    pub fn encode_payload(&self, out: &mut Vec<u8>) -> FrameResult<()> {
        if self.product_user_id.contains('\0') {
            return Err(FrameError::MalformedRegistration("product user id contains NUL"));
        }
        if self.identity_token.contains('\0') {
            return Err(FrameError::MalformedRegistration("identity token contains NUL"));
        }

        out.reserve(self.payload_len());
        out.push(self.platform.as_u8());
        out.extend_from_slice(self.product_user_id.as_bytes());
        out.push(0);
        out.extend_from_slice(self.identity_token.as_bytes());
        out.push(0);
        Ok(())
    }

    /// Parses a payload.
    pub fn decode_payload(payload: &[u8]) -> FrameResult<Self> {
        if payload.len() < Self::MIN_PAYLOAD_LEN {
            return Err(FrameError::MalformedRegistration("payload too short"));
        }
        if payload.last() != Some(&0) {
            return Err(FrameError::MalformedRegistration("missing NUL terminator"));
        }

        let platform =
            ClientPlatform::from_u8(payload[0]).ok_or(FrameError::UnknownPlatform(payload[0]))?;

        let body = &payload[1..];
        let user_end = body
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(FrameError::MalformedRegistration("missing NUL terminator"))?;
        let rest = &body[user_end + 1..];
        let token_end = rest
            .iter()
            .position(|byte| *byte == 0)
            .ok_or(FrameError::MalformedRegistration("missing identity token"))?;
        if token_end + 1 != rest.len() {
            return Err(FrameError::MalformedRegistration("trailing bytes after identity token"));
        }

        let product_user_id =
            std::str::from_utf8(&body[..user_end]).map_err(|_| FrameError::InvalidUtf8)?;
        let identity_token =
            std::str::from_utf8(&rest[..token_end]).map_err(|_| FrameError::InvalidUtf8)?;

        Ok(Self::new(platform, product_user_id, identity_token))
    }
}

/// A decoded frame.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Frame {
    /// Engine payload.
    Opaque(Vec<u8>),
    /// Registration message.
    RegistrationInfo(RegistrationInfo),
}

impl Frame {
    /// Type byte this frame is written with.
    #[must_use]
    pub const fn frame_type(&self) -> FrameType {
        match self {
            Self::Opaque(_) => FrameType::Opaque,
            Self::RegistrationInfo(_) => FrameType::RegistrationInfo,
        }
    }

    /// Decodes a complete payload of the given type.
    pub fn from_payload(type_byte: u8, payload: &[u8]) -> FrameResult<Self> {
        match FrameType::from_u8(type_byte) {
            Some(FrameType::Opaque) => Ok(Self::Opaque(payload.to_vec())),
            Some(FrameType::RegistrationInfo) => {
                RegistrationInfo::decode_payload(payload).map(Self::RegistrationInfo)
            }
            None => Err(FrameError::UnknownType(type_byte)),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn encoded(info: &RegistrationInfo) -> Vec<u8> {
        let mut out = Vec::new();
        info.encode_payload(&mut out).unwrap();
        out
    }

    #[test]
    fn test_payload_layout() {
        let info = RegistrationInfo::new(ClientPlatform::Linux, "abc", "tok");
        assert_eq!(encoded(&info), b"\x03abc\0tok\0".to_vec());
        assert_eq!(info.payload_len(), 9);
    }

    #[test]
    fn test_decode_empty_strings() {
        let info = RegistrationInfo::decode_payload(&[1, 0, 0]).unwrap();
        assert_eq!(info.platform, ClientPlatform::Windows);
        assert!(info.product_user_id.is_empty());
        assert!(info.identity_token.is_empty());
    }

    #[test]
    fn test_decode_rejects_short_payload() {
        assert_eq!(
            RegistrationInfo::decode_payload(&[1, 0]),
            Err(FrameError::MalformedRegistration("payload too short"))
        );
    }

    #[test]
    fn test_decode_rejects_missing_terminator() {
        assert_eq!(
            RegistrationInfo::decode_payload(b"\x03user\0tok"),
            Err(FrameError::MalformedRegistration("missing NUL terminator"))
        );
    }

    #[test]
    fn test_decode_rejects_missing_token() {
        assert_eq!(
            RegistrationInfo::decode_payload(b"\x03user\0"),
            Err(FrameError::MalformedRegistration("missing identity token"))
        );
    }

    #[test]
    fn test_decode_rejects_trailing_fields() {
        assert!(matches!(
            RegistrationInfo::decode_payload(b"\x03a\0b\0c\0"),
            Err(FrameError::MalformedRegistration(_))
        ));
    }

    #[test]
    fn test_decode_rejects_unknown_platform() {
        assert_eq!(
            RegistrationInfo::decode_payload(b"\x09a\0b\0"),
            Err(FrameError::UnknownPlatform(9))
        );
    }

    #[test]
    fn test_decode_rejects_invalid_utf8() {
        assert_eq!(
            RegistrationInfo::decode_payload(&[1, 0xff, 0xfe, 0, b'x', 0]),
            Err(FrameError::InvalidUtf8)
        );
    }

    #[test]
    fn test_encode_rejects_interior_nul() {
        let info = RegistrationInfo::new(ClientPlatform::Mac, "a\0b", "tok");
        let mut out = Vec::new();
        assert!(info.encode_payload(&mut out).is_err());
        assert!(out.is_empty());
    }

    #[test]
    fn test_unknown_frame_type() {
        assert_eq!(Frame::from_payload(7, b""), Err(FrameError::UnknownType(7)));
        assert_eq!(FrameType::from_u8(0), None);
    }
}
