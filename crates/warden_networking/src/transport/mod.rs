//! # Peer Transport
//!
//! Owns the listener and every peer connection, drives them once per
//! `tick()`, and routes decoded frames to the registration state machine and
//! the anti-cheat engine.
//!
//! ## One tick
//!
//! ```text
//! 1. Listener   → accept up to max_accepts_per_tick sockets, announce ourselves
//! 2. Peers      → one bounded read each, decode frames, dispatch
//! 3. Verifier   → apply queued verification outcomes (admit / reject)
//! 4. Engine     → apply queued directives (send / remove peer)
//! ```
//!
//! Nothing blocks and no thread is spawned. Results produced elsewhere
//! (verification, engine directives) are queued on channels and applied in
//! steps 3 and 4.

mod arena;

pub use arena::{ConnectionArena, PeerHandle};

use std::net::IpAddr;

use crate::config::TransportConfig;
use crate::connection::{Connection, ConnectionRole, Listener, PeerStream, PollOutcome};
use crate::error::{FrameError, TransportError, TransportResult};
use crate::integration::{
    AntiCheatEngine, DirectiveSink, EngineDirective, EventChannel, IdentityVerifier, PeerTarget,
    TransportEvents,
};
use crate::protocol::{DecodeOutcome, Frame, FrameDecoder, FrameEncoder, RegistrationInfo};
use crate::registration::{PeerRegistry, PeerState, PendingRegistration, VerificationStep};

/// Transport statistics.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TransportStats {
    /// Frames sent.
    pub frames_sent: u64,
    /// Frames decoded.
    pub frames_received: u64,
    /// Bytes sent.
    pub bytes_sent: u64,
    /// Bytes read.
    pub bytes_received: u64,
    /// Frames dropped as malformed.
    pub protocol_errors: u64,
    /// Short or failed sends.
    pub send_failures: u64,
}

/// A live peer: its connection and its stream decoder.
#[derive(Debug)]
struct PeerSlot {
    connection: Connection,
    decoder: FrameDecoder,
}

/// What one connection poll produced.
enum Polled {
    Idle,
    Decoded(DecodeOutcome),
    Closed,
}

/// The peer-to-peer transport.
pub struct PeerTransport {
    config: TransportConfig,
    /// Announced to every new peer.
    local: RegistrationInfo,
    listener: Option<Listener>,
    connections: ConnectionArena<PeerSlot>,
    registry: PeerRegistry,
    verifier: Box<dyn IdentityVerifier>,
    engine: Box<dyn AntiCheatEngine>,
    events: Box<dyn TransportEvents>,
    directives: EventChannel<EngineDirective>,
    encoder: FrameEncoder,
    stats: TransportStats,
}

impl PeerTransport {
    /// Creates a transport.
    ///
    /// `local` is the registration sent to every peer on connect.
    pub fn new(
        config: TransportConfig,
        local: RegistrationInfo,
        verifier: Box<dyn IdentityVerifier>,
        engine: Box<dyn AntiCheatEngine>,
        events: Box<dyn TransportEvents>,
    ) -> TransportResult<Self> {
        config.validate()?;
        Ok(Self {
            registry: PeerRegistry::new(config.auth_timeout()),
            config,
            local,
            listener: None,
            connections: ConnectionArena::new(),
            verifier,
            engine,
            events,
            directives: EventChannel::unbounded(),
            encoder: FrameEncoder::new(),
            stats: TransportStats::default(),
        })
    }

    // ------------------------------------------------------------------
    // Listening
    // ------------------------------------------------------------------

    /// Starts accepting peers on `port` (0 picks one). Returns the bound port.
    pub fn start_listening(&mut self, port: u16) -> TransportResult<u16> {
        if let Some(listener) = self.listener.as_ref().filter(|l| l.is_listening()) {
            return Err(TransportError::AlreadyListening(listener.port()));
        }
        let listener = Listener::bind(port)?;
        Ok(self.install_listener(listener))
    }

    /// Stops accepting peers. Existing connections are kept.
    ///
    /// Returns true if a listener was running.
    pub fn stop_listening(&mut self) -> bool {
        self.listener.take().is_some_and(|mut listener| {
            let was_listening = listener.is_listening();
            listener.close();
            was_listening
        })
    }

    /// Returns true while the listener accepts peers.
    #[must_use]
    pub fn is_listening(&self) -> bool {
        self.listener.as_ref().is_some_and(Listener::is_listening)
    }

    /// Port the listener is bound to.
    #[must_use]
    pub fn local_port(&self) -> Option<u16> {
        self.listener
            .as_ref()
            .filter(|listener| listener.is_listening())
            .map(Listener::port)
    }

    // ------------------------------------------------------------------
    // Connections
    // ------------------------------------------------------------------

    /// Connects to a peer and sends our registration.
    ///
    /// `on_peer_connected` fires before this returns. If the registration
    /// cannot be delivered and the connection is closed for it, the send
    /// error is returned instead of a handle.
    pub fn connect_to_peer(&mut self, host: &str, port: u16) -> TransportResult<PeerHandle> {
        let connection = Connection::connect(host, port, &self.config).map_err(|error| {
            tracing::warn!(host, port, %error, "could not connect to peer");
            error
        })?;
        self.adopt(connection)
    }

    /// Adds an already-open, non-blocking stream as a peer.
    ///
    /// Fails like [`connect_to_peer`](Self::connect_to_peer) when the
    /// registration send closes the connection.
    pub fn adopt_stream(
        &mut self,
        stream: Box<dyn PeerStream>,
        role: ConnectionRole,
    ) -> TransportResult<PeerHandle> {
        let connection = Connection::from_stream(stream, role, self.config.read_chunk_size);
        self.adopt(connection)
    }

    /// Closes one connection. `on_peer_disconnected` fires before this
    /// returns.
    pub fn disconnect(&mut self, handle: PeerHandle) -> TransportResult<()> {
        if self.destroy(handle) {
            Ok(())
        } else {
            Err(TransportError::UnknownPeer(handle))
        }
    }

    /// Closes every connection, then the listener.
    pub fn disconnect_all(&mut self) {
        for handle in self.connections.handles() {
            self.destroy(handle);
        }
        self.stop_listening();
    }

    /// Sends an Opaque payload.
    pub fn send_opaque(&mut self, handle: PeerHandle, payload: &[u8]) -> TransportResult<()> {
        if !self.connections.contains(handle) {
            return Err(TransportError::UnknownPeer(handle));
        }
        if payload.len() > self.config.max_frame_len {
            return Err(FrameError::Oversized {
                declared: payload.len(),
                max: self.config.max_frame_len,
            }
            .into());
        }
        self.encoder.reset();
        self.encoder.encode_opaque(payload)?;
        self.send_encoded(handle)
    }

    // ------------------------------------------------------------------
    // Tick
    // ------------------------------------------------------------------

    /// Runs one poll cycle. Never blocks.
    pub fn tick(&mut self) {
        self.poll_listener();
        for handle in self.connections.handles() {
            self.poll_peer(handle);
        }
        self.process_verifications();
        self.process_directives();
    }

    /// Sender for engine directives, usable from any thread.
    ///
    /// Directives are applied during the next `tick()`.
    #[must_use]
    pub fn directive_sender(&self) -> DirectiveSink {
        self.directives.sender()
    }

    // ------------------------------------------------------------------
    // Introspection
    // ------------------------------------------------------------------

    /// Replaces the registration announced to peers connected from now on.
    pub fn set_local_registration(&mut self, local: RegistrationInfo) {
        self.local = local;
    }

    /// Registration announced to new peers.
    #[must_use]
    pub const fn local_registration(&self) -> &RegistrationInfo {
        &self.local
    }

    /// Registration state of a live connection.
    #[must_use]
    pub fn peer_state(&self, handle: PeerHandle) -> Option<&PeerState> {
        self.registry.peer_state(handle)
    }

    /// Remote IP of a live connection.
    #[must_use]
    pub fn peer_ip(&self, handle: PeerHandle) -> Option<IpAddr> {
        self.connections
            .get(handle)
            .and_then(|slot| slot.connection.remote_ip())
    }

    /// Who opened a live connection.
    #[must_use]
    pub fn peer_role(&self, handle: PeerHandle) -> Option<ConnectionRole> {
        self.connections
            .get(handle)
            .map(|slot| slot.connection.role())
    }

    /// Every live connection.
    #[must_use]
    pub fn connected_peers(&self) -> Vec<PeerHandle> {
        self.connections.handles()
    }

    /// Snapshot of registrations awaiting verification.
    #[must_use]
    pub fn pending_registrations(&self) -> Vec<PendingRegistration> {
        self.registry.pending_registrations()
    }

    /// Counters since creation.
    #[inline]
    #[must_use]
    pub const fn stats(&self) -> TransportStats {
        self.stats
    }

    /// Active configuration.
    #[must_use]
    pub const fn config(&self) -> &TransportConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn install_listener(&mut self, listener: Listener) -> u16 {
        let port = listener.port();
        self.listener = Some(listener);
        port
    }

    fn adopt(&mut self, connection: Connection) -> TransportResult<PeerHandle> {
        let role = connection.role();
        let ip = connection.remote_ip();
        let decoder = FrameDecoder::new(self.config.framing_policy, self.config.max_frame_len);
        let handle = self.connections.insert(PeerSlot { connection, decoder });
        self.registry.track(handle);

        tracing::info!(peer = %handle, ?role, ?ip, "peer connected");
        self.events.on_peer_connected(handle, role);
        match self.announce(handle) {
            Err(error) if !self.connections.contains(handle) => Err(error),
            _ => Ok(handle),
        }
    }

    /// Sends our registration to a new peer.
    fn announce(&mut self, handle: PeerHandle) -> TransportResult<()> {
        self.encoder.reset();
        if let Err(error) = self.encoder.encode_registration(&self.local) {
            tracing::warn!(peer = %handle, %error, "local registration cannot be encoded");
            return Ok(());
        }
        self.send_encoded(handle).map_err(|error| {
            tracing::debug!(peer = %handle, %error, "registration not delivered");
            error
        })
    }

    /// Writes the encoder's contents to `handle`.
    fn send_encoded(&mut self, handle: PeerHandle) -> TransportResult<()> {
        let Some(slot) = self.connections.get_mut(handle) else {
            return Err(TransportError::UnknownPeer(handle));
        };
        let bytes = self.encoder.as_slice();

        match slot.connection.send(bytes) {
            Ok(()) => {
                self.stats.frames_sent += 1;
                self.stats.bytes_sent += bytes.len() as u64;
                tracing::trace!(peer = %handle, len = bytes.len(), "frame sent");
                Ok(())
            }
            Err(error) => {
                self.stats.send_failures += 1;
                if self.config.disconnect_on_partial_write {
                    tracing::warn!(peer = %handle, %error, "send failed, disconnecting");
                    self.destroy(handle);
                } else {
                    tracing::warn!(peer = %handle, %error, "send failed");
                }
                Err(error.into())
            }
        }
    }

    /// Closes and forgets a connection.
    ///
    /// Returns false if the handle was stale.
    fn destroy(&mut self, handle: PeerHandle) -> bool {
        let Some(mut slot) = self.connections.remove(handle) else {
            return false;
        };
        if slot.connection.close() {
            self.notify_disconnect(handle);
        }
        true
    }

    fn notify_disconnect(&mut self, handle: PeerHandle) {
        self.registry.on_disconnect(handle, &mut *self.engine);
        tracing::info!(peer = %handle, "peer disconnected");
        self.events.on_peer_disconnected(handle);
    }

    fn poll_listener(&mut self) {
        let Some(listener) = self.listener.as_mut() else {
            return;
        };
        let batch = listener.poll(self.config.max_accepts_per_tick, self.config.read_chunk_size);
        if let Some(error) = batch.failure {
            tracing::warn!(%error, "listener failed");
            self.listener = None;
        }
        for connection in batch.accepted {
            if let Err(error) = self.adopt(connection) {
                tracing::debug!(%error, "accepted peer lost during registration send");
            }
        }
    }

    fn poll_peer(&mut self, handle: PeerHandle) {
        // Earlier dispatch in this tick may have closed it.
        let Some(slot) = self.connections.get_mut(handle) else {
            return;
        };

        let polled = match slot.connection.poll() {
            PollOutcome::Idle => Polled::Idle,
            PollOutcome::Received(bytes) => {
                self.stats.bytes_received += bytes.len() as u64;
                Polled::Decoded(slot.decoder.push(bytes))
            }
            PollOutcome::Closed => Polled::Closed,
        };

        match polled {
            Polled::Idle => {}
            Polled::Closed => {
                self.connections.remove(handle);
                self.notify_disconnect(handle);
            }
            Polled::Decoded(outcome) => {
                for error in outcome.errors {
                    self.stats.protocol_errors += 1;
                    tracing::warn!(peer = %handle, %error, "dropping malformed frame");
                }
                for frame in outcome.frames {
                    self.dispatch(handle, frame);
                }
            }
        }
    }

    fn dispatch(&mut self, handle: PeerHandle, frame: Frame) {
        self.stats.frames_received += 1;
        match frame {
            Frame::Opaque(payload) => {
                tracing::trace!(peer = %handle, len = payload.len(), "opaque frame");
                self.engine.receive_message(handle, &payload);
                self.events.on_opaque_message(handle, &payload);
            }
            Frame::RegistrationInfo(info) => {
                let ip = self.peer_ip(handle);
                match self
                    .registry
                    .on_registration_info(handle, ip, info, &mut *self.verifier)
                {
                    Ok(Some(pending)) => self.events.on_peer_pending_registration(handle, pending),
                    Ok(None) => {}
                    Err(error) => {
                        self.stats.protocol_errors += 1;
                        tracing::warn!(peer = %handle, %error, "rejecting registration frame");
                    }
                }
            }
        }
    }

    fn process_verifications(&mut self) {
        for step in self.registry.drain_verifications(&mut *self.engine) {
            if let VerificationStep::Admitted {
                handle,
                product_user_id,
            } = step
            {
                self.events.on_peer_admitted(handle, &product_user_id);
            }
        }
    }

    fn process_directives(&mut self) {
        for directive in self.directives.drain() {
            match directive {
                EngineDirective::SendMessage { handle, payload } => {
                    if let Err(error) = self.send_opaque(handle, &payload) {
                        tracing::debug!(peer = %handle, %error, "engine message not delivered");
                    }
                }
                EngineDirective::RemovePeer {
                    target: PeerTarget::Local,
                    reason,
                } => {
                    tracing::info!(%reason, "removed from the session");
                    self.events.on_kicked(&reason);
                }
                EngineDirective::RemovePeer {
                    target: PeerTarget::Remote(handle),
                    reason,
                } => {
                    tracing::info!(peer = %handle, %reason, "engine removed peer");
                    if !self.destroy(handle) {
                        tracing::warn!(peer = %handle, "remove directive for unknown peer");
                    }
                }
            }
        }
    }
}

impl Drop for PeerTransport {
    fn drop(&mut self) {
        self.disconnect_all();
    }
}
