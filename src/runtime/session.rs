//! Per-connection session state machine.
//!
//! ```text
//! AwaitingHandshake -> Routing -> Connecting -> Forwarding -> Closed
//! ```
//!
//! Phases only move forward. Every handler returns `Result<(), SessionError>`
//! and the event loop turns any error into `Closed` by removing the session
//! from the registry and calling `stop`, so teardown has a single entry
//! point no matter which phase failed.
//!
//! Handlers never block. They perform non-blocking reads and writes until the
//! socket reports `WouldBlock` and return, to be called again on the next
//! readiness event for the same socket.

use crate::codec::{self, CodecError, Frame, FrameKind};
use crate::routes::RouteTable;
use crate::runtime::buffer::{Fill, Flush, FrameBuffer, WriteQueue};
use crate::runtime::registry::SessionHandle;
use crate::runtime::token::{self, Side};
use mio::net::TcpStream;
use mio::{Interest, Registry};
use std::fmt;
use std::io::{self, Read};
use std::net::{Shutdown, SocketAddr};
use tracing::{debug, info, trace, warn};

const HANDSHAKE_LEN: usize = codec::frame_length(FrameKind::Handshake);
const DATA_LEN: usize = codec::frame_length(FrameKind::Data);

/// Scratch size for discarding unexpected backend bytes.
const DISCARD_CHUNK: usize = 512;

/// Session lifecycle phase. Ordered by progression.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Phase {
    AwaitingHandshake,
    Routing,
    Connecting,
    Forwarding,
    Closed,
}

/// Opens outbound connections to backends.
pub trait Connector {
    /// Start a non-blocking connect to `addr`.
    fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream>;
}

/// Connector that opens plain TCP connections.
#[derive(Debug, Default, Clone, Copy)]
pub struct TcpConnector;

impl Connector for TcpConnector {
    fn connect(&self, addr: SocketAddr) -> io::Result<TcpStream> {
        TcpStream::connect(addr)
    }
}

/// Shared, read-only state handed to session handlers.
pub struct SessionContext<'a> {
    pub registry: &'a Registry,
    pub routes: &'a dyn RouteTable,
    pub connector: &'a dyn Connector,
}

/// Reasons a session ends.
#[derive(Debug)]
pub enum SessionError {
    /// Client closed its write side.
    ClientClosed,
    /// Backend closed the connection.
    BackendClosed,
    /// I/O error on the client socket.
    Client(io::Error),
    /// I/O error on the backend socket.
    Backend(io::Error),
    /// First frame was not a handshake.
    UnexpectedFrame(u32),
    /// No route for the client.
    UnknownClient(u32),
    /// Backend connect failed.
    Connect { addr: SocketAddr, source: io::Error },
    /// Socket registration with the poller failed.
    Setup(io::Error),
    /// Frame could not be decoded.
    Codec(CodecError),
}

impl SessionError {
    /// Whether this is an orderly close rather than a failure.
    pub fn is_disconnect(&self) -> bool {
        matches!(self, SessionError::ClientClosed | SessionError::BackendClosed)
    }
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::ClientClosed => write!(f, "client closed the connection"),
            SessionError::BackendClosed => write!(f, "backend closed the connection"),
            SessionError::Client(e) => write!(f, "client I/O error: {}", e),
            SessionError::Backend(e) => write!(f, "backend I/O error: {}", e),
            SessionError::UnexpectedFrame(t) => {
                write!(f, "invalid handshake message, type is {}", t)
            }
            SessionError::UnknownClient(id) => write!(f, "no route for client {}", id),
            SessionError::Connect { addr, source } => {
                write!(f, "cannot connect to backend {}: {}", addr, source)
            }
            SessionError::Setup(e) => write!(f, "cannot register socket: {}", e),
            SessionError::Codec(e) => write!(f, "{}", e),
        }
    }
}

impl std::error::Error for SessionError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SessionError::Client(e) | SessionError::Backend(e) | SessionError::Setup(e) => Some(e),
            SessionError::Connect { source, .. } => Some(source),
            SessionError::Codec(e) => Some(e),
            _ => None,
        }
    }
}

/// One client connection and, once routed, its backend connection.
pub struct Session {
    handle: SessionHandle,
    peer: SocketAddr,
    phase: Phase,
    client: Option<TcpStream>,
    backend: Option<TcpStream>,
    backend_addr: Option<SocketAddr>,
    client_id: Option<u32>,
    inbound: FrameBuffer,
    outbound: WriteQueue,
    forwarded: u64,
}

impl Session {
    /// Create a session for an accepted client.
    ///
    /// `max_pending` bounds the bytes queued for the backend before client
    /// reads pause.
    pub fn new(
        handle: SessionHandle,
        client: TcpStream,
        peer: SocketAddr,
        max_pending: usize,
    ) -> Self {
        Self {
            handle,
            peer,
            phase: Phase::AwaitingHandshake,
            client: Some(client),
            backend: None,
            backend_addr: None,
            client_id: None,
            inbound: FrameBuffer::with_capacity(HANDSHAKE_LEN.max(DATA_LEN)),
            outbound: WriteQueue::new(max_pending),
            forwarded: 0,
        }
    }

    /// Register the client socket and wait for the handshake frame.
    pub fn start(&mut self, ctx: &SessionContext<'_>) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::ClientClosed)?;
        ctx.registry
            .register(client, token::encode(self.handle, Side::Client), Interest::READABLE)
            .map_err(SessionError::Setup)?;

        info!(session = self.handle.index(), peer = %self.peer, "Start new unknown session");
        Ok(())
    }

    /// Handle readiness on the client socket.
    pub fn on_client_ready(&mut self, ctx: &SessionContext<'_>) -> Result<(), SessionError> {
        match self.phase {
            Phase::AwaitingHandshake => self.read_handshake(ctx),
            Phase::Connecting => self.watch_client(),
            Phase::Forwarding => self.pump_client(),
            Phase::Routing | Phase::Closed => Ok(()),
        }
    }

    /// Handle readiness on the backend socket.
    pub fn on_backend_ready(&mut self, _ctx: &SessionContext<'_>) -> Result<(), SessionError> {
        match self.phase {
            Phase::Connecting => self.finish_connect(),
            Phase::Forwarding => {
                self.drain_backend()?;
                self.pump_client()
            }
            Phase::AwaitingHandshake | Phase::Routing | Phase::Closed => Ok(()),
        }
    }

    /// Release both sockets. Calling this more than once has no further effect.
    ///
    /// Frames still queued for the backend are dropped.
    pub fn stop(&mut self, registry: &Registry) {
        if self.phase == Phase::Closed {
            return;
        }
        self.phase = Phase::Closed;

        if let Some(mut client) = self.client.take() {
            let _ = registry.deregister(&mut client);
            let _ = client.shutdown(Shutdown::Read);
        }
        if let Some(mut backend) = self.backend.take() {
            let _ = registry.deregister(&mut backend);
            let _ = backend.shutdown(Shutdown::Write);
        }
        self.outbound.clear();

        debug!(
            session = self.handle.index(),
            client_id = ?self.client_id,
            forwarded = self.forwarded,
            "Session stopped"
        );
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn client_id(&self) -> Option<u32> {
        self.client_id
    }

    /// Address the backend connection was opened to.
    pub fn backend_addr(&self) -> Option<SocketAddr> {
        self.backend_addr
    }

    /// Number of data frames queued for the backend so far.
    pub fn forwarded(&self) -> u64 {
        self.forwarded
    }

    /// Whether both sockets have been released.
    pub fn is_released(&self) -> bool {
        self.client.is_none() && self.backend.is_none()
    }

    fn advance(&mut self, next: Phase) {
        debug_assert!(next > self.phase, "phase {:?} -> {:?}", self.phase, next);
        trace!(session = self.handle.index(), from = ?self.phase, to = ?next, "Phase change");
        self.phase = next;
    }

    fn read_handshake(&mut self, ctx: &SessionContext<'_>) -> Result<(), SessionError> {
        let client = self.client.as_mut().ok_or(SessionError::ClientClosed)?;
        match self
            .inbound
            .fill_to(client, HANDSHAKE_LEN)
            .map_err(SessionError::Client)?
        {
            Fill::Complete => {}
            Fill::WouldBlock => return Ok(()),
            Fill::Eof => return Err(SessionError::ClientClosed),
        }

        let bytes = self
            .inbound
            .take_frame(HANDSHAKE_LEN)
            .ok_or(SessionError::Codec(CodecError::Truncated {
                needed: HANDSHAKE_LEN,
                available: self.inbound.len(),
            }))?;

        match codec::decode(&bytes).map_err(SessionError::Codec)? {
            Frame::Handshake { client_id } => {
                info!(session = self.handle.index(), client_id, "Connected with client");
                self.client_id = Some(client_id);
                self.advance(Phase::Routing);
                self.route(ctx, client_id)
            }
            other => Err(SessionError::UnexpectedFrame(other.discriminant())),
        }
    }

    fn route(&mut self, ctx: &SessionContext<'_>, client_id: u32) -> Result<(), SessionError> {
        let addr = ctx
            .routes
            .lookup(client_id)
            .ok_or(SessionError::UnknownClient(client_id))?;
        self.connect(ctx, addr)
    }

    fn connect(&mut self, ctx: &SessionContext<'_>, addr: SocketAddr) -> Result<(), SessionError> {
        debug_assert!(self.backend.is_none(), "second backend connection");
        self.advance(Phase::Connecting);
        self.backend_addr = Some(addr);

        let stream = ctx
            .connector
            .connect(addr)
            .map_err(|source| SessionError::Connect { addr, source })?;
        let backend = self.backend.insert(stream);
        ctx.registry
            .register(
                backend,
                token::encode(self.handle, Side::Backend),
                Interest::READABLE | Interest::WRITABLE,
            )
            .map_err(SessionError::Setup)?;

        debug!(session = self.handle.index(), backend = %addr, "Connecting to backend");
        // The hangup may have arrived with the handshake, before any new edge
        self.watch_client()
    }

    /// Notice a client hangup while the backend connect is in flight.
    ///
    /// Client bytes stay in the kernel until the backend is up, so this only
    /// peeks. A pending frame followed by EOF is read once Forwarding begins.
    fn watch_client(&self) -> Result<(), SessionError> {
        let client = self.client.as_ref().ok_or(SessionError::ClientClosed)?;
        let mut peeked = [0u8; 1];
        loop {
            match client.peek(&mut peeked) {
                Ok(0) => return Err(SessionError::ClientClosed),
                Ok(_) => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SessionError::Client(e)),
            }
        }
    }

    fn finish_connect(&mut self) -> Result<(), SessionError> {
        let (backend, addr) = match (self.backend.as_mut(), self.backend_addr) {
            (Some(backend), Some(addr)) => (backend, addr),
            _ => return Ok(()),
        };

        if let Some(source) = backend.take_error().map_err(SessionError::Backend)? {
            return Err(SessionError::Connect { addr, source });
        }
        match backend.peer_addr() {
            Ok(_) => {}
            Err(ref e) if e.kind() == io::ErrorKind::NotConnected => return Ok(()),
            Err(source) => return Err(SessionError::Connect { addr, source }),
        }

        self.advance(Phase::Forwarding);
        info!(
            session = self.handle.index(),
            client_id = ?self.client_id,
            backend = %addr,
            "Start routing packets"
        );
        self.pump_client()
    }

    /// Move whole data frames from the client to the backend queue.
    ///
    /// Stops reading while the backend queue is full.
    fn pump_client(&mut self) -> Result<(), SessionError> {
        loop {
            while let Some(bytes) = self.inbound.take_frame(DATA_LEN) {
                self.forward(&bytes)?;
            }

            if self.outbound.is_full() {
                self.flush_backend()?;
                if self.outbound.is_full() {
                    trace!(
                        session = self.handle.index(),
                        queued = self.outbound.len(),
                        "Backend queue full, pausing client reads"
                    );
                    return Ok(());
                }
            }

            let client = self.client.as_mut().ok_or(SessionError::ClientClosed)?;
            match self
                .inbound
                .fill_to(client, DATA_LEN)
                .map_err(SessionError::Client)?
            {
                Fill::Complete => {}
                Fill::WouldBlock => break,
                Fill::Eof => {
                    // Best effort: hand over what is already queued
                    if let Ok(Flush::Blocked) = self.flush_backend() {
                        debug!(
                            session = self.handle.index(),
                            dropped = self.outbound.len(),
                            "Backend busy at client close, dropping queued bytes"
                        );
                    }
                    return Err(SessionError::ClientClosed);
                }
            }
        }

        self.flush_backend()?;
        Ok(())
    }

    fn forward(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        let frame = codec::decode(bytes).map_err(SessionError::Codec)?;
        match frame {
            Frame::Data { payload } => {
                debug!(session = self.handle.index(), payload, "Message received");
            }
            other => {
                warn!(
                    session = self.handle.index(),
                    discriminant = other.discriminant(),
                    "Forwarding non-data frame"
                );
            }
        }
        self.outbound.push(&frame);
        self.forwarded += 1;
        Ok(())
    }

    fn flush_backend(&mut self) -> Result<Flush, SessionError> {
        match self.backend.as_mut() {
            Some(backend) => self.outbound.flush(backend).map_err(SessionError::Backend),
            None => Ok(Flush::Drained),
        }
    }

    /// Backends are not expected to talk back; read and drop anything they send.
    fn drain_backend(&mut self) -> Result<(), SessionError> {
        let backend = match self.backend.as_mut() {
            Some(backend) => backend,
            None => return Ok(()),
        };

        let mut scratch = [0u8; DISCARD_CHUNK];
        loop {
            match backend.read(&mut scratch) {
                Ok(0) => return Err(SessionError::BackendClosed),
                Ok(n) => trace!(session = self.handle.index(), bytes = n, "Discarded backend data"),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(SessionError::Backend(e)),
            }
        }
    }
}
