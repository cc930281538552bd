//! # Boundary Messages
//!
//! Values exchanged with the identity verification service and the
//! anti-cheat engine.
//!
//! ## Flow for one inbound peer:
//! ```text
//! 1. Peer → Transport:      RegistrationInfo frame
//! 2. Transport → Verifier:  VerificationRequest (with ticket)
//! 3. Verifier → Transport:  VerificationOutcome, queued on an EventChannel
//! 4. Transport → Engine:    AdmitRequest
//! 5. Engine → Transport:    EngineDirective (SendMessage / RemovePeer)
//! ```
//!
//! Steps 3 and 5 arrive on channels and are drained inside `tick()`, never
//! delivered as concurrent callbacks.

use std::net::IpAddr;
use std::time::Duration;

use crate::connection::ConnectionRole;
use crate::protocol::ClientPlatform;
use crate::transport::PeerHandle;

// ============================================================================
// IDENTITY VERIFICATION
// ============================================================================

/// Correlates a verification request with its outcome.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VerificationTicket(pub u64);

/// Ask the verification service to check an identity token.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationRequest {
    /// Must be echoed back in the outcome.
    pub ticket: VerificationTicket,
    /// Claimed identity.
    pub product_user_id: String,
    /// Token to verify.
    pub identity_token: String,
}

/// Verification result.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum VerificationVerdict {
    /// Token proves the claimed identity.
    Verified,
    /// Token does not prove the claimed identity.
    Rejected,
}

/// Answer to a [`VerificationRequest`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct VerificationOutcome {
    /// Ticket of the request being answered.
    pub ticket: VerificationTicket,
    /// Identity that was checked.
    pub product_user_id: String,
    /// Result.
    pub verdict: VerificationVerdict,
}

impl VerificationOutcome {
    /// Outcome answering `request` with `verdict`.
    #[must_use]
    pub fn for_request(request: &VerificationRequest, verdict: VerificationVerdict) -> Self {
        Self {
            ticket: request.ticket,
            product_user_id: request.product_user_id.clone(),
            verdict,
        }
    }
}

/// Where verification outcomes are sent.
pub type VerificationSink = crossbeam_channel::Sender<VerificationOutcome>;

// ============================================================================
// ANTI-CHEAT ENGINE
// ============================================================================

/// Kind of client registered with the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ClientType {
    /// Client running the anti-cheat runtime.
    ProtectedClient = 0,
    /// Client without the anti-cheat runtime.
    UnprotectedClient = 1,
    /// Bot controlled by the game.
    AiBot = 2,
}

/// Parameters for admitting a verified peer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AdmitRequest {
    /// Connection the peer is reachable on.
    pub handle: PeerHandle,
    /// Always [`ClientType::ProtectedClient`] for peers admitted here.
    pub client_type: ClientType,
    /// Platform the peer claimed.
    pub platform: ClientPlatform,
    /// Peer IP, if the socket reported one.
    pub ip: Option<IpAddr>,
    /// How long the engine waits for the peer to authenticate.
    pub auth_timeout: Duration,
    /// Verified identity.
    pub product_user_id: String,
}

/// Target of an engine "remove peer" directive.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerTarget {
    /// The local user: other peers will reject us, the session must end.
    Local,
    /// One remote peer.
    Remote(PeerHandle),
}

/// Engine-initiated request to the transport.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum EngineDirective {
    /// Send an Opaque payload to a peer.
    SendMessage {
        /// Destination.
        handle: PeerHandle,
        /// Engine payload.
        payload: Vec<u8>,
    },
    /// Remove a peer from the session.
    RemovePeer {
        /// Who to remove.
        target: PeerTarget,
        /// Engine-supplied reason.
        reason: String,
    },
}

/// Where engine directives are sent.
pub type DirectiveSink = crossbeam_channel::Sender<EngineDirective>;

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Upward notification, as recorded by
/// [`RecordingEvents`](super::RecordingEvents).
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TransportEvent {
    /// Connection established.
    PeerConnected {
        /// New connection.
        handle: PeerHandle,
        /// Who opened it.
        role: ConnectionRole,
    },
    /// Registration frame received, verification started.
    PeerPendingRegistration {
        /// Connection that sent it.
        handle: PeerHandle,
        /// Claimed identity.
        product_user_id: String,
    },
    /// Peer verified and admitted.
    PeerAdmitted {
        /// Connection.
        handle: PeerHandle,
        /// Verified identity.
        product_user_id: String,
    },
    /// Opaque frame received.
    OpaqueMessage {
        /// Sender.
        handle: PeerHandle,
        /// Payload.
        payload: Vec<u8>,
    },
    /// Connection gone.
    PeerDisconnected {
        /// Closed connection.
        handle: PeerHandle,
    },
    /// The engine removed the local user.
    Kicked {
        /// Engine-supplied reason.
        reason: String,
    },
}

// ============================================================================
// EVENT CHANNELS
// ============================================================================

/// Queue between a producer (any thread) and the tick thread.
/// Uses crossbeam for lock-free communication.
#[derive(Debug)]
pub struct EventChannel<T> {
    sender: crossbeam_channel::Sender<T>,
    receiver: crossbeam_channel::Receiver<T>,
}

impl<T> EventChannel<T> {
    /// Creates a new unbounded event channel.
    #[must_use]
    pub fn unbounded() -> Self {
        let (sender, receiver) = crossbeam_channel::unbounded();
        Self { sender, receiver }
    }

    /// Tries to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<T, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Everything queued right now.
    pub fn drain(&self) -> Vec<T> {
        self.receiver.try_iter().collect()
    }

    /// Gets a clone of the sender for another thread.
    #[must_use]
    pub fn sender(&self) -> crossbeam_channel::Sender<T> {
        self.sender.clone()
    }
}

impl<T> Default for EventChannel<T> {
    fn default() -> Self {
        Self::unbounded()
    }
}
