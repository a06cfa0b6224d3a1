//! mio event loop: the listener and its session dispatch.
//!
//! Readiness-based model: poll tells us when sockets are ready, then the
//! owning session performs non-blocking reads and writes. One thread owns
//! the poller, the listening socket and every session, so sessions are never
//! touched concurrently and the registry needs no lock.

use crate::routes::RouteTable;
use crate::runtime::registry::{SessionHandle, SessionRegistry};
use crate::runtime::session::{Connector, Session, SessionContext, SessionError, TcpConnector};
use crate::runtime::token::{self, Side, LISTENER_TOKEN, MAX_INDEX};
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token};
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Tunables for the listener and its sessions.
#[derive(Debug, Clone, Copy)]
pub struct ListenerSettings {
    /// Sessions beyond this count are refused at accept time.
    pub max_sessions: usize,
    /// Bytes queued per backend before client reads pause.
    pub max_pending_bytes: usize,
    /// Readiness events handled per poll.
    pub event_capacity: usize,
}

impl Default for ListenerSettings {
    fn default() -> Self {
        Self {
            max_sessions: 10_000,
            max_pending_bytes: 64 * 1024,
            event_capacity: 1024,
        }
    }
}

/// Accepts clients and drives their sessions.
pub struct Listener {
    poll: Poll,
    events: Events,
    listener: TcpListener,
    local_addr: SocketAddr,
    sessions: SessionRegistry<Session>,
    routes: Box<dyn RouteTable>,
    connector: Box<dyn Connector>,
    settings: ListenerSettings,
    ready: Vec<Token>,
}

impl Listener {
    /// Bind to `port` on all interfaces.
    pub fn start(
        port: u16,
        settings: ListenerSettings,
        routes: impl RouteTable + 'static,
    ) -> io::Result<Self> {
        Self::bind(SocketAddr::from((Ipv4Addr::UNSPECIFIED, port)), settings, routes)
    }

    /// Bind to `addr`. Failing to create the poller or the socket is fatal.
    pub fn bind(
        addr: SocketAddr,
        settings: ListenerSettings,
        routes: impl RouteTable + 'static,
    ) -> io::Result<Self> {
        let poll = Poll::new()?;
        let mut listener = TcpListener::from_std(create_listener(addr)?);
        poll.registry()
            .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)?;
        let local_addr = listener.local_addr()?;

        let max_sessions = settings.max_sessions.min(MAX_INDEX);
        Ok(Self {
            poll,
            events: Events::with_capacity(settings.event_capacity),
            listener,
            local_addr,
            sessions: SessionRegistry::with_capacity(max_sessions.min(1024)),
            routes: Box::new(routes),
            connector: Box::new(TcpConnector),
            settings: ListenerSettings {
                max_sessions,
                ..settings
            },
            ready: Vec::with_capacity(settings.event_capacity),
        })
    }

    /// Replace the backend connector.
    pub fn with_connector(mut self, connector: impl Connector + 'static) -> Self {
        self.connector = Box::new(connector);
        self
    }

    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Number of live sessions.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }

    /// Dispatch events until a poll error.
    pub fn run(&mut self) -> io::Result<()> {
        info!(addr = %self.local_addr, "Start server");
        loop {
            self.turn(None)?;
        }
    }

    /// Poll once and dispatch every ready event.
    pub fn turn(&mut self, timeout: Option<Duration>) -> io::Result<()> {
        match self.poll.poll(&mut self.events, timeout) {
            Ok(()) => {}
            Err(ref e) if e.kind() == io::ErrorKind::Interrupted => return Ok(()),
            Err(e) => return Err(e),
        }

        let mut ready = std::mem::take(&mut self.ready);
        ready.clear();
        ready.extend(self.events.iter().map(|event| event.token()));

        for &token in &ready {
            match token::decode(token) {
                None => self.accept_connections(),
                Some((handle, side)) => self.dispatch(handle, side),
            }
        }

        self.ready = ready;
        Ok(())
    }

    fn accept_connections(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((stream, peer)) => self.open_session(stream, peer),
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e)
                    if matches!(
                        e.kind(),
                        io::ErrorKind::Interrupted | io::ErrorKind::ConnectionAborted
                    ) =>
                {
                    debug!(error = %e, "Accept interrupted");
                }
                Err(e) => {
                    error!(error = %e, "Accept error");
                    break;
                }
            }
        }
    }

    fn open_session(&mut self, stream: TcpStream, peer: SocketAddr) {
        if self.sessions.len() >= self.settings.max_sessions {
            warn!(peer = %peer, "Session limit reached, dropping connection");
            return;
        }

        info!(peer = %peer, "New client connection was accepted");
        let max_pending = self.settings.max_pending_bytes;
        let handle = self
            .sessions
            .insert_with(|handle| Session::new(handle, stream, peer, max_pending));

        let ctx = SessionContext {
            registry: self.poll.registry(),
            routes: self.routes.as_ref(),
            connector: self.connector.as_ref(),
        };
        let result = match self.sessions.get_mut(handle) {
            Some(session) => session.start(&ctx),
            None => return,
        };

        if let Err(e) = result {
            self.close_session(handle, &e);
        }
    }

    fn dispatch(&mut self, handle: SessionHandle, side: Side) {
        let ctx = SessionContext {
            registry: self.poll.registry(),
            routes: self.routes.as_ref(),
            connector: self.connector.as_ref(),
        };
        // Stale tokens belong to sessions that are already gone
        let result = match self.sessions.get_mut(handle) {
            Some(session) => match side {
                Side::Client => session.on_client_ready(&ctx),
                Side::Backend => session.on_backend_ready(&ctx),
            },
            None => return,
        };

        if let Err(e) = result {
            self.close_session(handle, &e);
        }
    }

    /// Single sink for every session failure: deregister, then release sockets.
    fn close_session(&mut self, handle: SessionHandle, reason: &SessionError) {
        let Some(mut session) = self.sessions.remove(handle) else {
            return;
        };
        session.stop(self.poll.registry());

        if reason.is_disconnect() {
            info!(
                session = handle.index(),
                client_id = ?session.client_id(),
                reason = %reason,
                "Close session"
            );
        } else {
            warn!(
                session = handle.index(),
                client_id = ?session.client_id(),
                error = %reason,
                "Close session"
            );
        }
    }
}

/// Create a non-blocking TCP listener with SO_REUSEADDR.
fn create_listener(addr: SocketAddr) -> io::Result<std::net::TcpListener> {
    let socket = socket2::Socket::new(
        match addr {
            SocketAddr::V4(_) => socket2::Domain::IPV4,
            SocketAddr::V6(_) => socket2::Domain::IPV6,
        },
        socket2::Type::STREAM,
        Some(socket2::Protocol::TCP),
    )?;

    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(1024)?;

    Ok(socket.into())
}
