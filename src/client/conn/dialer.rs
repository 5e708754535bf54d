//! Dialing TCP connections.
//!
//! The [`Dialer`] owns the connect-phase policy of a transport: how long a
//! connection may take to establish, the TCP keep-alive interval applied to
//! every socket, which address family may be used, and whether the address is
//! looked up freshly for every dial.

use std::fmt;
use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use http::Uri;
use socket2::{Domain, Protocol, Socket, TcpKeepalive, Type};
use thiserror::Error;
use tokio::net::{TcpSocket, TcpStream};
use tracing::{trace, warn, Instrument};

use super::dns::{Network, ResolveError, Resolve, ResolverStrategy, SocketAddrs};
use super::transport::TransportConfig;

/// The host and port a dial is aimed at.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Target {
    host: Box<str>,
    port: u16,
}

impl Target {
    /// Create a target from a host name (or IP literal) and port.
    pub fn new(host: impl Into<Box<str>>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// Extract the target from an `http` or `https` URI, defaulting the port
    /// from the scheme.
    pub fn from_uri(uri: &Uri) -> Result<Self, InvalidTarget> {
        let host = uri.host().ok_or(InvalidTarget::MissingHost)?;
        let host = host.trim_start_matches('[').trim_end_matches(']');
        let port = match uri.port_u16() {
            Some(port) => port,
            None => match uri.scheme_str() {
                Some("http") => 80,
                Some("https") => 443,
                _ => return Err(InvalidTarget::MissingPort),
            },
        };

        Ok(Self::new(host, port))
    }

    /// The host name or IP literal.
    pub fn host(&self) -> &str {
        &self.host
    }

    /// The port.
    pub fn port(&self) -> u16 {
        self.port
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.host.contains(':') {
            write!(f, "[{}]:{}", self.host, self.port)
        } else {
            write!(f, "{}:{}", self.host, self.port)
        }
    }
}

/// The URI does not name something that can be dialed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidTarget {
    /// There is no host in the URI.
    #[error("missing host")]
    MissingHost,

    /// There is no port, and the scheme has no default port.
    #[error("missing port for non-http(s) scheme")]
    MissingPort,
}

/// Error returned when a connection could not be established.
#[derive(Debug, Error)]
pub enum DialError {
    /// No usable address was found for the target.
    #[error("dial {target}: {source}")]
    Resolve {
        /// The dial target.
        target: Target,
        /// Why resolution failed.
        #[source]
        source: ResolveError,
    },

    /// The connect phase did not finish within the connect timeout.
    #[error("dial {target}: connect timed out after {timeout:?}")]
    Timeout {
        /// The dial target.
        target: Target,
        /// The connect timeout which elapsed.
        timeout: Duration,
    },

    /// Every candidate address refused or was unreachable. Carries the error
    /// from the last address attempted.
    #[error("dial {target}: connect to {address}: {source}")]
    Connect {
        /// The dial target.
        target: Target,
        /// The last address attempted.
        address: SocketAddr,
        /// The connect error.
        #[source]
        source: io::Error,
    },

    /// The socket could not be opened or configured.
    #[error("dial {target}: socket: {source}")]
    Socket {
        /// The dial target.
        target: Target,
        /// The socket error.
        #[source]
        source: io::Error,
    },
}

impl DialError {
    /// Whether the dial failed because the target could not be resolved.
    pub fn is_resolve(&self) -> bool {
        matches!(self, DialError::Resolve { .. })
    }

    /// Whether the connect timeout elapsed.
    pub fn is_timeout(&self) -> bool {
        matches!(self, DialError::Timeout { .. })
    }
}

/// Establishes TCP connections under a fixed connect policy.
///
/// The policy comes from the [`TransportConfig`] the dialer is built from:
///
/// - `force_ipv4` replaces the requested [`Network`] with [`Network::Tcp4`]
///   for every dial, whatever the caller asked for.
/// - `bypass_resolver_cache` looks the host up afresh on every dial and
///   connects to the first address of the allowed family. Otherwise the cached
///   resolver's answer is used and each allowed address is tried in order.
/// - `connect_timeout` bounds connection establishment. With the cached
///   resolver the lookup happens inside the dial and counts against it.
///   Zero leaves the connect phase unbounded.
/// - `keep_alive` is applied as the TCP keep-alive time of every socket.
#[derive(Debug, Clone)]
pub struct Dialer<R> {
    connect_timeout: Duration,
    keep_alive: Duration,
    force_ipv4: bool,
    nodelay: bool,
    resolver: ResolverStrategy<R>,
}

impl<R: Resolve> Dialer<R> {
    /// Build a dialer from the transport configuration and a resolver.
    pub fn new(config: &TransportConfig, resolver: R) -> Self {
        Self {
            connect_timeout: config.connect_timeout,
            keep_alive: config.keep_alive,
            force_ipv4: config.force_ipv4,
            nodelay: config.nodelay,
            resolver: ResolverStrategy::new(
                resolver,
                config.bypass_resolver_cache,
                config.resolver_cache_ttl,
            ),
        }
    }

    /// The resolver strategy used by this dialer.
    pub fn resolver(&self) -> &ResolverStrategy<R> {
        &self.resolver
    }

    /// The network a dial will actually use when `requested` is asked for.
    pub fn network(&self, requested: Network) -> Network {
        if self.force_ipv4 {
            Network::Tcp4
        } else {
            requested
        }
    }

    /// Connect to `target`, honoring the dial policy.
    pub async fn dial(&self, network: Network, target: &Target) -> Result<TcpStream, DialError> {
        let network = self.network(network);
        let span = tracing::trace_span!("dial", host = %target.host, port = target.port, %network);

        async move {
            let stream = if self.resolver.is_fresh() {
                let address = self.fresh_address(network, target).await?;
                self.with_timeout(target, self.connect_all(target, vec![address]))
                    .await?
            } else {
                self.with_timeout(target, async {
                    let addrs = self.addresses(network, target).await?;
                    self.connect_all(target, addrs.into_iter().collect()).await
                })
                .await?
            };

            if let Ok(peer) = stream.peer_addr() {
                trace!(peer.addr = %peer, "tcp connected");
            }

            Ok(stream)
        }
        .instrument(span)
        .await
    }

    async fn addresses(&self, network: Network, target: &Target) -> Result<SocketAddrs, DialError> {
        let mut addrs = self
            .resolver
            .resolve(&target.host)
            .await
            .map_err(|source| DialError::Resolve {
                target: target.clone(),
                source,
            })?;
        addrs.set_port(target.port);
        addrs.retain_network(network);

        if addrs.is_empty() {
            return Err(DialError::Resolve {
                target: target.clone(),
                source: ResolveError::NoUsableAddress {
                    host: target.host.clone(),
                    network,
                },
            });
        }

        Ok(addrs)
    }

    async fn fresh_address(&self, network: Network, target: &Target) -> Result<SocketAddr, DialError> {
        let addrs = self.addresses(network, target).await?;
        let address = addrs.first().ok_or_else(|| DialError::Resolve {
            target: target.clone(),
            source: ResolveError::NoUsableAddress {
                host: target.host.clone(),
                network,
            },
        })?;
        trace!(%address, candidates = addrs.len(), "dialing first fresh address");
        Ok(address)
    }

    async fn with_timeout<F>(&self, target: &Target, dial: F) -> Result<TcpStream, DialError>
    where
        F: Future<Output = Result<TcpStream, DialError>>,
    {
        if self.connect_timeout.is_zero() {
            return dial.await;
        }

        match tokio::time::timeout(self.connect_timeout, dial).await {
            Ok(result) => result,
            Err(_) => {
                trace!(timeout = ?self.connect_timeout, "connection timed out");
                Err(DialError::Timeout {
                    target: target.clone(),
                    timeout: self.connect_timeout,
                })
            }
        }
    }

    /// Try each address in order, giving every remaining address an equal
    /// share of what is left of the connect timeout.
    async fn connect_all(
        &self,
        target: &Target,
        addrs: Vec<SocketAddr>,
    ) -> Result<TcpStream, DialError> {
        let started = Instant::now();
        let total = addrs.len();
        let mut last_error = None;

        for (index, address) in addrs.into_iter().enumerate() {
            let remaining = self.connect_timeout.saturating_sub(started.elapsed());
            let share = remaining / (total - index) as u32;

            let attempt = self.connect(target, address)?;
            let result = if index + 1 < total && !self.connect_timeout.is_zero() {
                match tokio::time::timeout(share, attempt).await {
                    Ok(result) => result,
                    Err(_) => Err(io::Error::new(
                        io::ErrorKind::TimedOut,
                        "connect attempt timed out",
                    )),
                }
            } else {
                attempt.await
            };

            match result {
                Ok(stream) => return Ok(stream),
                Err(error) => {
                    trace!(%address, %error, "connect attempt failed");
                    last_error = Some((address, error));
                }
            }
        }

        match last_error {
            Some((address, source)) => Err(DialError::Connect {
                target: target.clone(),
                address,
                source,
            }),
            None => Err(DialError::Resolve {
                target: target.clone(),
                source: ResolveError::NoAddresses {
                    host: target.host.clone(),
                },
            }),
        }
    }

    /// Open and configure a socket for `address`, returning the pending connect.
    fn connect(
        &self,
        target: &Target,
        address: SocketAddr,
    ) -> Result<impl Future<Output = io::Result<TcpStream>>, DialError> {
        let socket_error = |source| DialError::Socket {
            target: target.clone(),
            source,
        };

        let socket = Socket::new(Domain::for_address(address), Type::STREAM, Some(Protocol::TCP))
            .map_err(socket_error)?;
        trace!("tcp socket opened");

        // Tokio expects the socket to already be non-blocking.
        socket.set_nonblocking(true).map_err(socket_error)?;

        // A zero interval leaves keep-alive probes off.
        if !self.keep_alive.is_zero() {
            let keepalive = TcpKeepalive::new().with_time(self.keep_alive);
            if let Err(e) = socket.set_tcp_keepalive(&keepalive) {
                warn!("tcp set_keepalive error: {}", e);
            }
        }

        if self.nodelay {
            if let Err(e) = socket.set_nodelay(true) {
                warn!("tcp set_nodelay error: {}", e);
            }
        }

        let socket = TcpSocket::from_std_stream(socket.into());
        let span = tracing::trace_span!("tcp", remote.addr = %address);
        Ok(socket.connect(address).instrument(span))
    }
}
