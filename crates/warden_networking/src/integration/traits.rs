//! # Collaborator Traits
//!
//! Abstract interfaces for the services the transport talks to, plus
//! recording mock implementations for tests and the demo node.
//!
//! ## Design:
//! - The transport is generic over `dyn` collaborators, injected at construction
//! - Verification is asynchronous: results come back through a channel sink
//! - Engine directives are pushed through a channel, never called back into
//!   the transport

use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::Mutex;

use super::events::{
    AdmitRequest, TransportEvent, VerificationOutcome, VerificationRequest, VerificationSink,
    VerificationVerdict,
};
use crate::connection::ConnectionRole;
use crate::error::{EngineError, EngineResult};
use crate::registration::PendingRegistration;
use crate::transport::PeerHandle;

// ============================================================================
// IDENTITY VERIFIER
// ============================================================================

/// Identity verification service.
pub trait IdentityVerifier: Send {
    /// Starts verifying `request`.
    ///
    /// Exactly one [`VerificationOutcome`] carrying `request.ticket` should be
    /// sent on `sink`, from any thread and at any later time. Sending it
    /// before returning is allowed.
    fn verify(&mut self, request: VerificationRequest, sink: VerificationSink);
}

// ============================================================================
// ANTI-CHEAT ENGINE
// ============================================================================

/// Anti-cheat engine session.
///
/// Directives flowing the other way go through
/// [`PeerTransport::directive_sender`](crate::transport::PeerTransport::directive_sender).
pub trait AntiCheatEngine: Send {
    /// Registers a verified peer.
    fn admit_peer(&mut self, request: AdmitRequest) -> EngineResult<()>;

    /// Unregisters a previously admitted peer.
    fn evict_peer(&mut self, handle: PeerHandle) -> EngineResult<()>;

    /// Hands over an Opaque payload received from `handle`.
    fn receive_message(&mut self, handle: PeerHandle, payload: &[u8]);
}

// ============================================================================
// TRANSPORT EVENTS
// ============================================================================

/// Upward notifications to the embedding application.
pub trait TransportEvents: Send {
    /// Opaque frame received.
    fn on_opaque_message(&mut self, handle: PeerHandle, payload: &[u8]);

    /// Registration frame received and verification started.
    fn on_peer_pending_registration(&mut self, handle: PeerHandle, pending: &PendingRegistration);

    /// Connection closed, locally or by the remote side.
    fn on_peer_disconnected(&mut self, handle: PeerHandle);

    /// The engine removed the local user from the session.
    fn on_kicked(&mut self, reason: &str);

    /// Connection established.
    fn on_peer_connected(&mut self, handle: PeerHandle, role: ConnectionRole) {
        let _ = (handle, role);
    }

    /// Peer verified and admitted to the engine.
    fn on_peer_admitted(&mut self, handle: PeerHandle, product_user_id: &str) {
        let _ = (handle, product_user_id);
    }
}

// ============================================================================
// MOCK IMPLEMENTATIONS
// ============================================================================

/// How [`MockIdentityVerifier`] answers.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum VerifierPolicy {
    /// Every token is valid.
    #[default]
    AcceptAll,
    /// Every token is invalid.
    RejectAll,
    /// Hold requests until [`MockIdentityVerifier::resolve`] is called.
    Deferred,
}

#[derive(Debug, Default)]
struct VerifierState {
    policy: VerifierPolicy,
    requests: Vec<VerificationRequest>,
    deferred: VecDeque<(VerificationRequest, VerificationSink)>,
}

/// Mock verifier. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MockIdentityVerifier {
    state: Arc<Mutex<VerifierState>>,
}

impl MockIdentityVerifier {
    /// Creates a verifier with the given policy.
    #[must_use]
    pub fn new(policy: VerifierPolicy) -> Self {
        let verifier = Self::default();
        verifier.set_policy(policy);
        verifier
    }

    /// Changes how future requests are answered.
    pub fn set_policy(&self, policy: VerifierPolicy) {
        self.state.lock().policy = policy;
    }

    /// Every request seen so far.
    #[must_use]
    pub fn requests(&self) -> Vec<VerificationRequest> {
        self.state.lock().requests.clone()
    }

    /// Number of deferred requests still unanswered.
    #[must_use]
    pub fn deferred_count(&self) -> usize {
        self.state.lock().deferred.len()
    }

    /// Answers the oldest deferred request for `product_user_id`.
    ///
    /// Returns false if none is waiting.
    pub fn resolve(&self, product_user_id: &str, verdict: VerificationVerdict) -> bool {
        let mut state = self.state.lock();
        let Some(position) = state
            .deferred
            .iter()
            .position(|(request, _)| request.product_user_id == product_user_id)
        else {
            return false;
        };
        let Some((request, sink)) = state.deferred.remove(position) else {
            return false;
        };
        drop(state);

        // Receiver gone means the transport was dropped.
        let _ = sink.send(VerificationOutcome::for_request(&request, verdict));
        true
    }
}

impl IdentityVerifier for MockIdentityVerifier {
    fn verify(&mut self, request: VerificationRequest, sink: VerificationSink) {
        let mut state = self.state.lock();
        state.requests.push(request.clone());

        let verdict = match state.policy {
            VerifierPolicy::AcceptAll => VerificationVerdict::Verified,
            VerifierPolicy::RejectAll => VerificationVerdict::Rejected,
            VerifierPolicy::Deferred => {
                state.deferred.push_back((request, sink));
                return;
            }
        };
        drop(state);

        let _ = sink.send(VerificationOutcome::for_request(&request, verdict));
    }
}

#[derive(Debug, Default)]
struct EngineState {
    admitted: Vec<AdmitRequest>,
    evicted: Vec<PeerHandle>,
    messages: Vec<(PeerHandle, Vec<u8>)>,
    fail_admits: bool,
}

/// Mock anti-cheat engine that records every call. Clones share state.
#[derive(Clone, Debug, Default)]
pub struct MockAntiCheatEngine {
    state: Arc<Mutex<EngineState>>,
}

impl MockAntiCheatEngine {
    /// Creates an engine that accepts every admit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes future admits fail.
    pub fn set_fail_admits(&self, fail: bool) {
        self.state.lock().fail_admits = fail;
    }

    /// Every admit request received, including failed ones.
    #[must_use]
    pub fn admitted(&self) -> Vec<AdmitRequest> {
        self.state.lock().admitted.clone()
    }

    /// Every evicted handle.
    #[must_use]
    pub fn evicted(&self) -> Vec<PeerHandle> {
        self.state.lock().evicted.clone()
    }

    /// Every Opaque payload received.
    #[must_use]
    pub fn messages(&self) -> Vec<(PeerHandle, Vec<u8>)> {
        self.state.lock().messages.clone()
    }
}

impl AntiCheatEngine for MockAntiCheatEngine {
    fn admit_peer(&mut self, request: AdmitRequest) -> EngineResult<()> {
        let mut state = self.state.lock();
        let fail = state.fail_admits;
        state.admitted.push(request);
        if fail {
            return Err(EngineError::Rejected("admits disabled".into()));
        }
        Ok(())
    }

    fn evict_peer(&mut self, handle: PeerHandle) -> EngineResult<()> {
        let mut state = self.state.lock();
        if !state.admitted.iter().any(|request| request.handle == handle) {
            return Err(EngineError::UnknownPeer);
        }
        state.evicted.push(handle);
        Ok(())
    }

    fn receive_message(&mut self, handle: PeerHandle, payload: &[u8]) {
        self.state.lock().messages.push((handle, payload.to_vec()));
    }
}

/// [`TransportEvents`] implementation that records every notification.
/// Clones share state.
#[derive(Clone, Debug, Default)]
pub struct RecordingEvents {
    events: Arc<Mutex<Vec<TransportEvent>>>,
}

impl RecordingEvents {
    /// Creates an empty recorder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Every event so far, in order.
    #[must_use]
    pub fn events(&self) -> Vec<TransportEvent> {
        self.events.lock().clone()
    }

    /// Forgets recorded events.
    pub fn clear(&self) {
        self.events.lock().clear();
    }

    fn record(&self, event: TransportEvent) {
        self.events.lock().push(event);
    }
}

impl TransportEvents for RecordingEvents {
    fn on_opaque_message(&mut self, handle: PeerHandle, payload: &[u8]) {
        self.record(TransportEvent::OpaqueMessage {
            handle,
            payload: payload.to_vec(),
        });
    }

    fn on_peer_pending_registration(&mut self, handle: PeerHandle, pending: &PendingRegistration) {
        self.record(TransportEvent::PeerPendingRegistration {
            handle,
            product_user_id: pending.product_user_id.clone(),
        });
    }

    fn on_peer_disconnected(&mut self, handle: PeerHandle) {
        self.record(TransportEvent::PeerDisconnected { handle });
    }

    fn on_kicked(&mut self, reason: &str) {
        self.record(TransportEvent::Kicked {
            reason: reason.to_owned(),
        });
    }

    fn on_peer_connected(&mut self, handle: PeerHandle, role: ConnectionRole) {
        self.record(TransportEvent::PeerConnected { handle, role });
    }

    fn on_peer_admitted(&mut self, handle: PeerHandle, product_user_id: &str) {
        self.record(TransportEvent::PeerAdmitted {
            handle,
            product_user_id: product_user_id.to_owned(),
        });
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::integration::{EventChannel, VerificationTicket};

    fn request(user: &str, ticket: u64) -> VerificationRequest {
        VerificationRequest {
            ticket: VerificationTicket(ticket),
            product_user_id: user.into(),
            identity_token: "token".into(),
        }
    }

    #[test]
    fn test_accept_all_answers_immediately() {
        let channel = EventChannel::unbounded();
        let mut verifier = MockIdentityVerifier::new(VerifierPolicy::AcceptAll);
        verifier.verify(request("alice", 1), channel.sender());

        let outcome = channel.try_recv().unwrap();
        assert_eq!(outcome.ticket, VerificationTicket(1));
        assert_eq!(outcome.verdict, VerificationVerdict::Verified);
        assert_eq!(verifier.requests().len(), 1);
    }

    #[test]
    fn test_deferred_waits_for_resolve() {
        let channel = EventChannel::unbounded();
        let mut verifier = MockIdentityVerifier::new(VerifierPolicy::Deferred);
        verifier.verify(request("bob", 4), channel.sender());

        assert!(channel.try_recv().is_err());
        assert_eq!(verifier.deferred_count(), 1);

        assert!(!verifier.resolve("carol", VerificationVerdict::Verified));
        assert!(verifier.resolve("bob", VerificationVerdict::Rejected));

        let outcome = channel.try_recv().unwrap();
        assert_eq!(outcome.ticket, VerificationTicket(4));
        assert_eq!(outcome.verdict, VerificationVerdict::Rejected);
    }

    #[test]
    fn test_engine_eviction_requires_admit() {
        let mut arena = crate::transport::ConnectionArena::new();
        let handle = arena.insert(());
        let mut engine = MockAntiCheatEngine::new();

        assert!(matches!(engine.evict_peer(handle), Err(EngineError::UnknownPeer)));
    }

    #[test]
    fn test_engine_failing_admits() {
        let mut arena = crate::transport::ConnectionArena::new();
        let handle = arena.insert(());
        let mut engine = MockAntiCheatEngine::new();
        engine.set_fail_admits(true);

        let result = engine.admit_peer(AdmitRequest {
            handle,
            client_type: crate::integration::ClientType::ProtectedClient,
            platform: crate::protocol::ClientPlatform::Linux,
            ip: None,
            auth_timeout: std::time::Duration::from_secs(120),
            product_user_id: "dave".into(),
        });
        assert!(matches!(result, Err(EngineError::Rejected(_))));
        assert_eq!(engine.admitted().len(), 1);
    }
}
