//! # External Collaborators
//!
//! Interfaces between the transport and the services around it:
//!
//! - **Identity verification**: checks the token carried by a
//!   `RegistrationInfo` frame, answers later through a channel
//! - **Anti-cheat engine**: admits and evicts verified peers, exchanges
//!   Opaque payloads, issues directives back to the transport
//! - **Application**: receives transport events
//!
//! ```text
//! ┌──────────────┐  VerificationRequest   ┌──────────────────┐
//! │              │ ─────────────────────▶ │ IdentityVerifier │
//! │              │ ◀── EventChannel ───── │                  │
//! │ PeerTransport│                        └──────────────────┘
//! │              │  admit / evict / msg   ┌──────────────────┐
//! │              │ ─────────────────────▶ │ AntiCheatEngine  │
//! │              │ ◀── EventChannel ───── │                  │
//! └──────┬───────┘   EngineDirective      └──────────────────┘
//!        │ TransportEvents
//!        ▼
//!   application
//! ```

mod events;
mod traits;

pub use events::{
    AdmitRequest, ClientType, DirectiveSink, EngineDirective, EventChannel, PeerTarget,
    TransportEvent, VerificationOutcome, VerificationRequest, VerificationSink,
    VerificationTicket, VerificationVerdict,
};
pub use traits::{
    AntiCheatEngine, IdentityVerifier, MockAntiCheatEngine, MockIdentityVerifier,
    RecordingEvents, TransportEvents, VerifierPolicy,
};
