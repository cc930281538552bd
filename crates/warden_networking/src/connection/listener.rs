//! # Listener
//!
//! Accepts inbound sockets and hands them out as incoming [`Connection`]s.
//!
//! Ports listened on by this process are tracked locally, so that a second
//! listen on the same port is refused with [`ConnectionError::PortInUseLocally`]
//! instead of a generic OS error.

use std::fmt;
use std::io;
use std::net::{Ipv4Addr, SocketAddr, TcpListener};

use parking_lot::Mutex;

use super::{Connection, ConnectionRole, PeerStream};
use crate::error::{ConnectionError, ConnectionResult};

/// Ports with a live [`Listener`] in this process.
static LISTENING_PORTS: Mutex<Vec<u16>> = parking_lot::const_mutex(Vec::new());

/// Returns true if this process already listens on `port`.
#[must_use]
pub fn is_listening_locally(port: u16) -> bool {
    LISTENING_PORTS.lock().contains(&port)
}

/// Source of inbound streams underneath a [`Listener`].
///
/// Implemented for [`TcpListener`]. Must already be non-blocking: with no
/// peer waiting, `accept_peer` returns [`io::ErrorKind::WouldBlock`].
pub trait PeerAcceptor: Send + fmt::Debug {
    /// Accepts one waiting peer.
    ///
    /// `Ok(None)` means a socket was accepted but could not be set up and
    /// has been dropped.
    fn accept_peer(&mut self) -> io::Result<Option<(Box<dyn PeerStream>, SocketAddr)>>;
}

impl PeerAcceptor for TcpListener {
    fn accept_peer(&mut self) -> io::Result<Option<(Box<dyn PeerStream>, SocketAddr)>> {
        let (stream, addr) = self.accept()?;
        if let Err(error) = stream
            .set_nonblocking(true)
            .and_then(|()| stream.set_nodelay(true))
        {
            tracing::warn!(%addr, %error, "dropping accepted socket");
            return Ok(None);
        }
        let stream: Box<dyn PeerStream> = Box::new(stream);
        Ok(Some((stream, addr)))
    }
}

/// Sockets accepted by one listener poll.
#[derive(Debug, Default)]
pub struct AcceptBatch {
    /// Newly accepted connections.
    pub accepted: Vec<Connection>,
    /// Set if accepting failed; the listener has closed itself.
    pub failure: Option<ConnectionError>,
}

/// Listening socket.
#[derive(Debug)]
pub struct Listener {
    socket: Option<Box<dyn PeerAcceptor>>,
    port: u16,
}

impl Listener {
    /// Binds on all interfaces. Port 0 picks an ephemeral port.
    pub fn bind(port: u16) -> ConnectionResult<Self> {
        let mut ports = LISTENING_PORTS.lock();
        if port != 0 && ports.contains(&port) {
            return Err(ConnectionError::PortInUseLocally(port));
        }

        let socket = TcpListener::bind((Ipv4Addr::UNSPECIFIED, port))?;
        socket.set_nonblocking(true)?;
        let bound = socket.local_addr()?.port();
        ports.push(bound);

        tracing::info!(port = bound, "listening for peers");
        Ok(Self {
            socket: Some(Box::new(socket)),
            port: bound,
        })
    }

    /// Listens through an already-bound acceptor, registering `port` as in
    /// use by this process.
    pub fn from_acceptor(acceptor: Box<dyn PeerAcceptor>, port: u16) -> ConnectionResult<Self> {
        let mut ports = LISTENING_PORTS.lock();
        if ports.contains(&port) {
            return Err(ConnectionError::PortInUseLocally(port));
        }
        ports.push(port);

        tracing::info!(port, "listening for peers");
        Ok(Self {
            socket: Some(acceptor),
            port,
        })
    }

    /// Bound port.
    #[inline]
    #[must_use]
    pub const fn port(&self) -> u16 {
        self.port
    }

    /// Always [`ConnectionRole::Listener`].
    #[inline]
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        ConnectionRole::Listener
    }

    /// Returns true until closed.
    #[inline]
    #[must_use]
    pub const fn is_listening(&self) -> bool {
        self.socket.is_some()
    }

    /// Accepts up to `max_accepts` pending sockets without blocking.
    ///
    /// An accept error closes the listener and is returned in
    /// [`AcceptBatch::failure`].
    pub fn poll(&mut self, max_accepts: usize, read_chunk_size: usize) -> AcceptBatch {
        let mut batch = AcceptBatch::default();
        let Some(socket) = self.socket.as_mut() else {
            return batch;
        };

        while batch.accepted.len() < max_accepts {
            match socket.accept_peer() {
                Ok(Some((stream, addr))) => {
                    tracing::debug!(%addr, "accepted incoming connection");
                    batch.accepted.push(Connection::from_stream(
                        stream,
                        ConnectionRole::Incoming,
                        read_chunk_size,
                    ));
                }
                Ok(None) => continue,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => {
                    tracing::warn!(port = self.port, %error, "accept failed, closing listener");
                    batch.failure = Some(ConnectionError::Io(error));
                    self.close();
                    break;
                }
            }
        }

        batch
    }

    /// Stops listening and frees the port.
    pub fn close(&mut self) {
        if self.socket.take().is_some() {
            LISTENING_PORTS.lock().retain(|port| *port != self.port);
            tracing::info!(port = self.port, "listener closed");
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        self.close();
    }
}
