//! # WARDEN Networking - Peer-to-Peer Anti-Cheat Transport
//!
//! Stream connections between game clients, a length-prefixed frame
//! protocol, and the registration handshake that verifies a peer's identity
//! before it is admitted to the anti-cheat session.
//!
//! ## Architecture
//!
//! - **Connection**: one non-blocking stream socket per peer, plus a listener
//! - **Protocol**: `type | length | payload` frames, reassembled from the stream
//! - **Registration**: `RegistrationInfo` frame → async verification → admit
//! - **Transport**: owns everything, drives it from a single `tick()`
//!
//! ## Handshake
//!
//! ```text
//! PEER A                            PEER B
//!   |                                 |
//!   |--- RegistrationInfo(A) -------->|  <- B asks the verifier about A
//!   |<-------- RegistrationInfo(B) ---|  <- A asks the verifier about B
//!   |                                 |
//!   |                                 |  <- Verified: B admits A to its engine
//!   |<========= Opaque ==============>|
//! ```
//!
//! A peer is only trusted once its identity token has been verified. Until
//! then it is connected, but unknown to the engine.
//!
//! ## Example
//!
//! ```rust,ignore
//! use warden_networking::{
//!     ClientPlatform, MockAntiCheatEngine, MockIdentityVerifier, PeerTransport,
//!     RecordingEvents, RegistrationInfo, TransportConfig,
//! };
//!
//! let mut transport = PeerTransport::new(
//!     TransportConfig::default(),
//!     RegistrationInfo::new(ClientPlatform::current(), "user", "jwt"),
//!     Box::new(MockIdentityVerifier::default()),
//!     Box::new(MockAntiCheatEngine::new()),
//!     Box::new(RecordingEvents::new()),
//! )?;
//!
//! transport.start_listening(1234)?;
//! loop {
//!     transport.tick(); // once per frame
//! }
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::pedantic)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]
#![deny(clippy::perf)]

pub mod config;
pub mod connection;
pub mod error;
pub mod integration;
pub mod protocol;
pub mod registration;
pub mod transport;

// Re-exports for convenience
pub use config::TransportConfig;
pub use connection::{Connection, ConnectionRole, ConnectionState, Listener, PeerStream};
pub use error::{
    ConfigError, ConnectionError, EngineError, FrameError, TransportError, TransportResult,
};
pub use integration::{
    AdmitRequest, AntiCheatEngine, ClientType, EngineDirective, IdentityVerifier,
    MockAntiCheatEngine, MockIdentityVerifier, PeerTarget, RecordingEvents, TransportEvent,
    TransportEvents, VerificationOutcome, VerificationRequest, VerificationVerdict,
    VerifierPolicy,
};
pub use protocol::{ClientPlatform, Frame, FrameDecoder, FrameEncoder, FramingPolicy, RegistrationInfo};
pub use registration::{PeerRegistry, PeerState, PendingRegistration};
pub use transport::{PeerHandle, PeerTransport, TransportStats};

/// Bytes read from a connection per poll.
pub const DEFAULT_READ_CHUNK_SIZE: usize = 4096;

/// Authentication timeout handed to the engine when a peer is admitted.
pub const DEFAULT_AUTH_TIMEOUT_SECS: u64 = 120;
