//! Glue between tokio and the runtime traits hyper expects.
//!
//! Dialed sockets (plain TCP or TLS) are tokio I/O objects, and the HTTP/2
//! handshake needs an executor for its background tasks. These adapters are
//! all the crate needs from `hyper-util`, kept local so the connection layer
//! controls exactly which tasks get spawned.

/// Adapt tokio I/O objects to hyper's I/O traits.
pub mod io;

/// Spawn hyper's background tasks on tokio.
pub mod rt;
