//! Single-threaded reactor runtime for the balancer.
//!
//! Readiness-based I/O using mio (epoll on Linux, kqueue on macOS):
//! - `Listener`: accept loop and event dispatch
//! - `Session`: per-connection state machine
//! - `SessionRegistry`: slab arena of live sessions
//! - `token`: session handle + socket side packed into a mio `Token`

mod buffer;
mod event_loop;
mod registry;
mod session;
mod token;

pub use event_loop::{Listener, ListenerSettings};
pub use registry::{SessionHandle, SessionRegistry};
pub use session::{Connector, Phase, Session, SessionContext, SessionError, TcpConnector};

use crate::config::Config;
use tracing::info;

/// Run the balancer until the event loop fails.
pub fn run(config: Config) -> std::io::Result<()> {
    let mut listener = Listener::bind(config.listen, config.listener_settings(), config.routes)?;

    info!(
        addr = %listener.local_addr(),
        max_sessions = config.max_sessions,
        max_pending_bytes = config.max_pending_bytes,
        "Starting mio runtime"
    );

    listener.run()
}
