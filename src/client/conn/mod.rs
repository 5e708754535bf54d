//! Client connection types.
//!
//! Getting a connection ready for a request happens in layers, each of which
//! is usable on its own:
//!
//! - [`dns`]: resolving a host name, either through a cache or afresh.
//! - [`dialer`]: the connect-phase policy (connect timeout, keep-alive,
//!   address family) applied when opening a TCP connection.
//! - [`stream`]: the dialed byte stream, optionally wrapped in TLS.
//! - [`transport`]: composes the layers above with the HTTP handshake and
//!   the connection pool into a [`Transport`].

pub mod dialer;
pub mod dns;
pub(crate) mod protocol;
pub mod stream;
#[cfg(feature = "tls")]
pub mod tls;
pub mod transport;

pub use self::dialer::{DialError, Dialer, Target};
pub use self::dns::{GaiResolver, Network, Resolve, ResolveError, ResolverStrategy, SocketAddrs};
pub use self::protocol::HttpConnection;
pub use self::stream::ClientStream;
pub use self::transport::{ConnectError, Transport, TransportBuilder, TransportConfig};
