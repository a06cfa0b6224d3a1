//! tcp-balancer: a TCP session router.
//!
//! Clients open a connection, identify themselves with a fixed-size
//! handshake frame, and every data frame they send afterwards is forwarded
//! to the backend configured for their client id.
//!
//! - `codec`: fixed-width handshake and data frames
//! - `routes`: static client id → backend mapping
//! - `runtime`: mio reactor, session state machine, session registry
//! - `peer`: protocol peer used to generate test traffic

pub mod codec;
pub mod config;
pub mod peer;
pub mod routes;
pub mod runtime;
