//! # Peer Connections
//!
//! One stream socket per peer, driven by non-blocking polls.
//!
//! ## Design
//!
//! - Sockets are switched to non-blocking mode at creation; `poll` never waits
//! - One bounded read per poll (`read_chunk_size` bytes)
//! - A zero-length read or a read error is a remote close
//! - Lifecycle notifications are raised by the transport, which owns every
//!   connection: `poll` and `close` report the transition, the transport
//!   fires the callbacks

mod listener;

pub use listener::{is_listening_locally, AcceptBatch, Listener, PeerAcceptor};

use std::fmt;
use std::io::{self, Read, Write};
use std::net::{IpAddr, Shutdown, TcpStream, ToSocketAddrs};

use crate::config::TransportConfig;
use crate::error::{ConnectionError, ConnectionResult};

/// Byte stream underneath a [`Connection`].
///
/// Implemented for [`TcpStream`]. Must already be non-blocking: reads with
/// nothing available return [`io::ErrorKind::WouldBlock`].
pub trait PeerStream: Read + Write + Send + fmt::Debug {
    /// Remote IP, if known.
    fn peer_ip(&self) -> Option<IpAddr>;

    /// Shuts both directions down.
    fn shutdown(&mut self) -> io::Result<()>;
}

impl PeerStream for TcpStream {
    fn peer_ip(&self) -> Option<IpAddr> {
        self.peer_addr().ok().map(|addr| addr.ip())
    }

    fn shutdown(&mut self) -> io::Result<()> {
        TcpStream::shutdown(self, Shutdown::Both)
    }
}

/// Who opened the socket.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ConnectionRole {
    /// We connected out to the peer.
    Outgoing = 0,
    /// The peer connected to our listener.
    Incoming = 1,
    /// Accepting socket; never connected itself.
    Listener = 2,
}

/// State of a connection.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionState {
    /// Socket opening. `connect` blocks through this state, so a
    /// [`Connection`] value is never observed in it.
    Connecting = 0,
    /// Fully connected and active.
    Connected = 1,
    /// Closed. Terminal.
    Disconnected = 2,
}

/// Result of one poll.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome<'a> {
    /// Nothing to read.
    Idle,
    /// Bytes read this poll.
    Received(&'a [u8]),
    /// The remote side closed, or the socket failed. The connection is now
    /// `Disconnected`; this is reported once.
    Closed,
}

/// A connection to one peer.
pub struct Connection {
    /// The socket, dropped on close.
    stream: Option<Box<dyn PeerStream>>,
    /// Outgoing or incoming.
    role: ConnectionRole,
    /// Lifecycle state.
    state: ConnectionState,
    /// Remote IP, best effort.
    remote_ip: Option<IpAddr>,
    /// Read buffer, `read_chunk_size` bytes.
    read_buffer: Box<[u8]>,
}

impl Connection {
    /// Resolves `host` and opens a connection to the first address that
    /// accepts.
    ///
    /// On success the connection is already `Connected`.
    pub fn connect(host: &str, port: u16, config: &TransportConfig) -> ConnectionResult<Self> {
        let addrs: Vec<_> = (host, port)
            .to_socket_addrs()
            .map_err(|source| ConnectionError::Resolve {
                host: host.to_owned(),
                port,
                source,
            })?
            .collect();

        let mut last_error = None;
        for addr in &addrs {
            match TcpStream::connect_timeout(addr, config.connect_timeout()) {
                Ok(stream) => {
                    stream.set_nonblocking(true)?;
                    stream.set_nodelay(true)?;
                    tracing::debug!(%addr, "outgoing connection established");
                    return Ok(Self::from_stream(
                        Box::new(stream),
                        ConnectionRole::Outgoing,
                        config.read_chunk_size,
                    ));
                }
                Err(error) => {
                    tracing::debug!(%addr, %error, "connect attempt failed");
                    last_error = Some(error);
                }
            }
        }

        match last_error {
            Some(error) => Err(ConnectionError::Io(error)),
            None => Err(ConnectionError::NoAddress {
                host: host.to_owned(),
                port,
            }),
        }
    }

    /// Wraps an already-open, non-blocking stream.
    #[must_use]
    pub fn from_stream(
        stream: Box<dyn PeerStream>,
        role: ConnectionRole,
        read_chunk_size: usize,
    ) -> Self {
        let remote_ip = stream.peer_ip();
        Self {
            stream: Some(stream),
            role,
            state: ConnectionState::Connected,
            remote_ip,
            read_buffer: vec![0u8; read_chunk_size].into_boxed_slice(),
        }
    }

    /// Outgoing or incoming.
    #[inline]
    #[must_use]
    pub const fn role(&self) -> ConnectionRole {
        self.role
    }

    /// Current lifecycle state.
    #[inline]
    #[must_use]
    pub const fn state(&self) -> ConnectionState {
        self.state
    }

    /// Returns true while connected.
    #[inline]
    #[must_use]
    pub const fn is_connected(&self) -> bool {
        matches!(self.state, ConnectionState::Connected)
    }

    /// Remote IP, if the socket reported one.
    #[inline]
    #[must_use]
    pub const fn remote_ip(&self) -> Option<IpAddr> {
        self.remote_ip
    }

    /// Non-blocking read of at most one chunk.
    pub fn poll(&mut self) -> PollOutcome<'_> {
        if !self.is_connected() {
            return PollOutcome::Idle;
        }
        let Some(stream) = self.stream.as_mut() else {
            return PollOutcome::Idle;
        };

        match stream.read(&mut self.read_buffer) {
            Ok(0) => {
                tracing::debug!(ip = ?self.remote_ip, "remote closed the connection");
                self.release();
                PollOutcome::Closed
            }
            Ok(n) => PollOutcome::Received(&self.read_buffer[..n]),
            Err(error)
                if matches!(
                    error.kind(),
                    io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted
                ) =>
            {
                PollOutcome::Idle
            }
            Err(error) => {
                tracing::warn!(ip = ?self.remote_ip, %error, "read failed, treating as disconnect");
                self.release();
                PollOutcome::Closed
            }
        }
    }

    /// Writes `bytes` with a single write call.
    ///
    /// A short write is reported as [`ConnectionError::PartialWrite`]; the
    /// connection itself is left as it is.
    pub fn send(&mut self, bytes: &[u8]) -> ConnectionResult<()> {
        if !self.is_connected() {
            return Err(ConnectionError::NotConnected);
        }
        let stream = self.stream.as_mut().ok_or(ConnectionError::NotConnected)?;

        match stream.write(bytes) {
            Ok(written) if written == bytes.len() => Ok(()),
            Ok(written) => Err(ConnectionError::PartialWrite {
                written,
                expected: bytes.len(),
            }),
            Err(error) if error.kind() == io::ErrorKind::WouldBlock => {
                Err(ConnectionError::PartialWrite {
                    written: 0,
                    expected: bytes.len(),
                })
            }
            Err(error) => Err(ConnectionError::Io(error)),
        }
    }

    /// Closes the socket.
    ///
    /// Returns true if the connection was `Connected`, meaning the caller
    /// owes a disconnect notification.
    pub fn close(&mut self) -> bool {
        let was_connected = self.is_connected();
        self.release();
        was_connected
    }

    fn release(&mut self) {
        self.state = ConnectionState::Disconnected;
        if let Some(mut stream) = self.stream.take() {
            if let Err(error) = stream.shutdown() {
                tracing::trace!(%error, "shutdown on close failed");
            }
        }
    }
}

impl Drop for Connection {
    fn drop(&mut self) {
        self.release();
    }
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("role", &self.role)
            .field("state", &self.state)
            .field("remote_ip", &self.remote_ip)
            .finish_non_exhaustive()
    }
}
