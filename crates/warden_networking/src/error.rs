//! # Networking Error Types
//!
//! One error enum per layer. None of these ever escape `tick()`: the
//! transport logs them and turns them into state transitions.

use std::io;

use thiserror::Error;

use crate::transport::PeerHandle;

/// Errors raised by a single socket (connect, listen, accept, send).
#[derive(Error, Debug)]
pub enum ConnectionError {
    /// Host name could not be resolved.
    #[error("could not resolve {host}:{port}: {source}")]
    Resolve {
        /// Host that was looked up.
        host: String,
        /// Requested port.
        port: u16,
        /// Resolver error.
        #[source]
        source: io::Error,
    },

    /// Resolution succeeded but produced no usable address.
    #[error("no address found for {host}:{port}")]
    NoAddress {
        /// Host that was looked up.
        host: String,
        /// Requested port.
        port: u16,
    },

    /// This process already has a listener on the port.
    #[error("port {0} is already being listened on by this process")]
    PortInUseLocally(u16),

    /// The socket accepted fewer bytes than requested.
    #[error("partial write: {written} of {expected} bytes")]
    PartialWrite {
        /// Bytes actually written.
        written: usize,
        /// Bytes requested.
        expected: usize,
    },

    /// Operation requires a connected socket.
    #[error("connection is not connected")]
    NotConnected,

    /// Underlying socket error.
    #[error("socket error: {0}")]
    Io(#[from] io::Error),
}

/// Errors raised while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Frame type byte is not a known frame type.
    #[error("unknown frame type {0}")]
    UnknownType(u8),

    /// Header declares more payload than is buffered.
    #[error("truncated frame: declared {declared} bytes, {available} available")]
    Truncated {
        /// Declared payload length.
        declared: usize,
        /// Payload bytes actually present.
        available: usize,
    },

    /// Fewer than five bytes left where a header was expected.
    #[error("truncated frame header: {available} bytes available")]
    TruncatedHeader {
        /// Bytes present.
        available: usize,
    },

    /// Declared payload length exceeds the configured maximum.
    #[error("frame declares {declared} bytes, maximum is {max}")]
    Oversized {
        /// Declared payload length.
        declared: usize,
        /// Configured maximum.
        max: usize,
    },

    /// RegistrationInfo payload does not have the expected shape.
    #[error("malformed registration payload: {0}")]
    MalformedRegistration(&'static str),

    /// Platform ordinal is out of range.
    #[error("unknown client platform {0}")]
    UnknownPlatform(u8),

    /// A registration string is not valid UTF-8.
    #[error("registration string is not valid UTF-8")]
    InvalidUtf8,

    /// Payload cannot be described by a 32-bit length field.
    #[error("payload of {0} bytes does not fit in a frame")]
    PayloadTooLarge(usize),
}

/// Non-success results from the anti-cheat engine boundary.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    /// The engine refused the call.
    #[error("engine rejected the call: {0}")]
    Rejected(String),

    /// The engine does not know the peer.
    #[error("engine does not know the peer")]
    UnknownPeer,
}

/// Errors loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read.
    #[error("could not read config: {0}")]
    Io(#[from] io::Error),

    /// Config file is not valid TOML for this schema.
    #[error("could not parse config: {0}")]
    Parse(#[from] toml::de::Error),

    /// A value is out of range.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Errors returned by the transport façade.
#[derive(Error, Debug)]
pub enum TransportError {
    /// The handle does not refer to a live connection.
    #[error("unknown peer {0}")]
    UnknownPeer(PeerHandle),

    /// A listener is already running on this transport.
    #[error("already listening on port {0}")]
    AlreadyListening(u16),

    /// Socket-level failure.
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Frame could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// Configuration was rejected.
    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for socket operations.
pub type ConnectionResult<T> = Result<T, ConnectionError>;

/// Result type for codec operations.
pub type FrameResult<T> = Result<T, FrameError>;

/// Result type for engine calls.
pub type EngineResult<T> = Result<T, EngineError>;

/// Result type for configuration.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Result type for transport operations.
pub type TransportResult<T> = Result<T, TransportError>;
