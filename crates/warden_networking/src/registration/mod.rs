//! # Peer Registration
//!
//! Correlates `RegistrationInfo` frames with asynchronous identity
//! verification and with the engine's admit/evict calls.
//!
//! ## States per connection
//!
//! ```text
//!            RegistrationInfo            Verified + admit ok
//! Unseen ─────────────────────▶ Awaiting ─────────────────────▶ Registered
//!   ▲                             │  │
//!   │      replaced / admit error │  │ Rejected
//!   └─────────────────────────────┘  ▼
//!                                 Rejected
//! ```
//!
//! Disconnect is reachable from every state and simply forgets the peer.
//!
//! ## Invariants
//!
//! - At most one pending entry per identity and per connection
//! - Every verification request carries a fresh ticket; an outcome whose
//!   ticket is not the current pending entry's is ignored
//! - Disconnect purges pending entries, so a late outcome is a no-op

use std::collections::HashMap;
use std::net::IpAddr;
use std::time::Duration;

use crate::error::{FrameError, FrameResult};
use crate::integration::{
    AdmitRequest, AntiCheatEngine, ClientType, EventChannel, IdentityVerifier,
    VerificationOutcome, VerificationRequest, VerificationTicket, VerificationVerdict,
};
use crate::protocol::{ClientPlatform, RegistrationInfo};
use crate::transport::PeerHandle;

/// A registration waiting for its verification outcome.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PendingRegistration {
    /// Connection the frame arrived on.
    pub handle: PeerHandle,
    /// Remote IP of that connection.
    pub ip: Option<IpAddr>,
    /// Claimed platform.
    pub platform: ClientPlatform,
    /// Claimed identity.
    pub product_user_id: String,
    /// Ticket of the outstanding verification request.
    pub ticket: VerificationTicket,
}

/// Registration state of one connection.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum PeerState {
    /// No registration in progress.
    #[default]
    Unseen,
    /// Verification requested.
    AwaitingVerification {
        /// Claimed identity.
        product_user_id: String,
    },
    /// Verified and admitted to the engine.
    Registered {
        /// Verified identity.
        product_user_id: String,
    },
    /// Verification failed. The peer stays connected but untrusted.
    Rejected {
        /// Identity that failed verification.
        product_user_id: String,
    },
}

impl PeerState {
    /// Returns true once admitted.
    #[must_use]
    pub const fn is_registered(&self) -> bool {
        matches!(self, Self::Registered { .. })
    }
}

/// What processing one verification outcome did.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum VerificationStep {
    /// Stale or unknown ticket, nothing changed.
    Ignored,
    /// Peer admitted to the engine.
    Admitted {
        /// Admitted connection.
        handle: PeerHandle,
        /// Verified identity.
        product_user_id: String,
    },
    /// Verified, but the engine refused the admit.
    AdmitFailed(PeerHandle),
    /// Token rejected.
    Rejected(PeerHandle),
}

/// The registration state machine.
///
/// Mutated only from the tick thread. Verification outcomes may be produced
/// on any thread; they are queued on an internal channel and applied by
/// [`PeerRegistry::drain_verifications`].
#[derive(Debug)]
pub struct PeerRegistry {
    pending: HashMap<String, PendingRegistration>,
    peers: HashMap<PeerHandle, PeerState>,
    next_ticket: u64,
    auth_timeout: Duration,
    verification: EventChannel<VerificationOutcome>,
}

impl PeerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new(auth_timeout: Duration) -> Self {
        Self {
            pending: HashMap::new(),
            peers: HashMap::new(),
            next_ticket: 0,
            auth_timeout,
            verification: EventChannel::unbounded(),
        }
    }

    /// Starts tracking a new connection as [`PeerState::Unseen`].
    pub fn track(&mut self, handle: PeerHandle) {
        self.peers.insert(handle, PeerState::Unseen);
    }

    /// State of a tracked connection.
    #[must_use]
    pub fn peer_state(&self, handle: PeerHandle) -> Option<&PeerState> {
        self.peers.get(&handle)
    }

    /// Pending entry for an identity.
    #[must_use]
    pub fn pending(&self, product_user_id: &str) -> Option<&PendingRegistration> {
        self.pending.get(product_user_id)
    }

    /// Number of pending entries.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Snapshot of every pending entry.
    #[must_use]
    pub fn pending_registrations(&self) -> Vec<PendingRegistration> {
        self.pending.values().cloned().collect()
    }

    /// Handles a `RegistrationInfo` frame received on `handle`.
    ///
    /// Creates or replaces the pending entry for the claimed identity and
    /// asks `verifier` to check the token. Returns `Ok(None)` when the
    /// connection already finished registering; a connection that was
    /// admitted or rejected must reconnect to register again.
    pub fn on_registration_info(
        &mut self,
        handle: PeerHandle,
        ip: Option<IpAddr>,
        info: RegistrationInfo,
        verifier: &mut dyn IdentityVerifier,
    ) -> FrameResult<Option<&PendingRegistration>> {
        if info.product_user_id.is_empty() {
            return Err(FrameError::MalformedRegistration("empty product user id"));
        }

        let state = self.peers.entry(handle).or_default();
        if matches!(state, PeerState::Registered { .. } | PeerState::Rejected { .. }) {
            tracing::warn!(
                peer = %handle,
                user = %info.product_user_id,
                "ignoring registration from a peer that already finished registering"
            );
            return Ok(None);
        }
        *state = PeerState::AwaitingVerification {
            product_user_id: info.product_user_id.clone(),
        };

        // One pending entry per connection.
        self.pending
            .retain(|user, pending| pending.handle != handle || *user == info.product_user_id);

        let ticket = VerificationTicket(self.next_ticket);
        self.next_ticket += 1;

        let replaced = self.pending.insert(
            info.product_user_id.clone(),
            PendingRegistration {
                handle,
                ip,
                platform: info.platform,
                product_user_id: info.product_user_id.clone(),
                ticket,
            },
        );
        if let Some(previous) = replaced.filter(|previous| previous.handle != handle) {
            tracing::warn!(
                user = %info.product_user_id,
                previous = %previous.handle,
                peer = %handle,
                "registration replaced a pending one from another connection"
            );
            if let Some(state) = self.peers.get_mut(&previous.handle) {
                *state = PeerState::Unseen;
            }
        }

        tracing::debug!(peer = %handle, user = %info.product_user_id, ?ticket, "verifying identity");
        verifier.verify(
            VerificationRequest {
                ticket,
                product_user_id: info.product_user_id.clone(),
                identity_token: info.identity_token,
            },
            self.verification.sender(),
        );

        Ok(self.pending.get(&info.product_user_id))
    }

    /// Applies every queued verification outcome.
    pub fn drain_verifications(&mut self, engine: &mut dyn AntiCheatEngine) -> Vec<VerificationStep> {
        self.verification
            .drain()
            .into_iter()
            .map(|outcome| self.on_verification(outcome, engine))
            .collect()
    }

    /// Applies one verification outcome.
    pub fn on_verification(
        &mut self,
        outcome: VerificationOutcome,
        engine: &mut dyn AntiCheatEngine,
    ) -> VerificationStep {
        let current = self
            .pending
            .get(&outcome.product_user_id)
            .is_some_and(|pending| pending.ticket == outcome.ticket);
        if !current {
            tracing::warn!(
                user = %outcome.product_user_id,
                ticket = ?outcome.ticket,
                "ignoring stale verification outcome"
            );
            return VerificationStep::Ignored;
        }
        let Some(pending) = self.pending.remove(&outcome.product_user_id) else {
            return VerificationStep::Ignored;
        };
        let handle = pending.handle;

        match outcome.verdict {
            VerificationVerdict::Verified => {
                let request = AdmitRequest {
                    handle,
                    client_type: ClientType::ProtectedClient,
                    platform: pending.platform,
                    ip: pending.ip,
                    auth_timeout: self.auth_timeout,
                    product_user_id: pending.product_user_id.clone(),
                };
                match engine.admit_peer(request) {
                    Ok(()) => {
                        tracing::info!(peer = %handle, user = %pending.product_user_id, "peer admitted");
                        self.set_state(
                            handle,
                            PeerState::Registered {
                                product_user_id: pending.product_user_id.clone(),
                            },
                        );
                        VerificationStep::Admitted {
                            handle,
                            product_user_id: pending.product_user_id,
                        }
                    }
                    Err(error) => {
                        tracing::warn!(peer = %handle, %error, "engine refused to admit peer");
                        self.set_state(handle, PeerState::Unseen);
                        VerificationStep::AdmitFailed(handle)
                    }
                }
            }
            VerificationVerdict::Rejected => {
                tracing::warn!(peer = %handle, user = %pending.product_user_id, "identity verification failed");
                self.set_state(
                    handle,
                    PeerState::Rejected {
                        product_user_id: pending.product_user_id,
                    },
                );
                VerificationStep::Rejected(handle)
            }
        }
    }

    /// Forgets a closed connection.
    ///
    /// Purges its pending entry and evicts it from the engine if it was
    /// admitted. Returns its last state.
    pub fn on_disconnect(
        &mut self,
        handle: PeerHandle,
        engine: &mut dyn AntiCheatEngine,
    ) -> Option<PeerState> {
        self.pending.retain(|_, pending| pending.handle != handle);

        let state = self.peers.remove(&handle)?;
        if state.is_registered() {
            if let Err(error) = engine.evict_peer(handle) {
                tracing::warn!(peer = %handle, %error, "engine refused to evict peer");
            } else {
                tracing::debug!(peer = %handle, "peer evicted");
            }
        }
        Some(state)
    }

    fn set_state(&mut self, handle: PeerHandle, state: PeerState) {
        if let Some(slot) = self.peers.get_mut(&handle) {
            *slot = state;
        }
    }
}
