//! Transport assembly.
//!
//! A [`Transport`] composes the [`Dialer`], TLS, the HTTP handshake and the
//! connection pool into a single value which hands out ready connections for
//! a URI. Building a transport performs no I/O.

use std::fmt;
use std::io;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use http::{Uri, Version};
use thiserror::Error;
use tracing::trace;

use super::dialer::{DialError, Dialer, InvalidTarget, Target};
use super::dns::{GaiResolver, Network, Resolve};
use super::protocol::{HttpConnection, HttpConnectionBuilder, HttpProtocol};
use super::stream::ClientStream;
use crate::client::pool::{self, Pool, Pooled, UriKey, UriKeyError};
use crate::info::{ConnectionInfo, Protocol};

/// Connect-phase and connection-lifecycle settings of a transport.
///
/// Once handed to a [`Transport`] the configuration can only be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransportConfig {
    /// Bound on establishing a TCP connection. Zero means no bound.
    pub connect_timeout: Duration,

    /// TCP keep-alive interval of dialed sockets, and the longest a pooled
    /// connection may sit idle. Zero leaves keep-alive probes off.
    pub keep_alive: Duration,

    /// Dial IPv4 addresses only, whatever the target resolves to.
    pub force_ipv4: bool,

    /// Offer HTTP/2 via ALPN on TLS connections.
    pub allow_http2: bool,

    /// Pool connections for later requests to the same host.
    pub reuse_connections: bool,

    /// Look up the host afresh for every dial.
    pub bypass_resolver_cache: bool,

    /// How long the caching resolver keeps an answer.
    pub resolver_cache_ttl: Duration,

    /// The maximum number of idle connections kept per host.
    pub max_idle_per_host: usize,

    /// Set `TCP_NODELAY` on dialed sockets.
    pub nodelay: bool,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(30),
            keep_alive: Duration::from_secs(30),
            force_ipv4: false,
            allow_http2: true,
            reuse_connections: true,
            bypass_resolver_cache: false,
            resolver_cache_ttl: Duration::from_secs(30),
            max_idle_per_host: 32,
            nodelay: true,
        }
    }
}

/// Error returned when a transport could not produce a connection.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The URI can't be used as a pool key.
    #[error(transparent)]
    InvalidUri(#[from] UriKeyError),

    /// The URI does not name a dialable host and port.
    #[error("invalid target: {0}")]
    InvalidTarget(#[from] InvalidTarget),

    /// The scheme is not one this transport can speak.
    #[error("unsupported scheme {0:?}")]
    UnsupportedScheme(String),

    /// The TCP connection could not be established.
    #[error(transparent)]
    Dial(#[from] DialError),

    /// The TLS handshake failed.
    #[error("tls handshake with {target}: {source}")]
    Tls {
        /// The dial target.
        target: Target,
        /// The handshake error.
        #[source]
        source: io::Error,
    },

    /// The HTTP handshake failed.
    #[error("http handshake: {0}")]
    Handshake(#[source] hyper::Error),
}

struct Inner<R> {
    config: TransportConfig,
    dialer: Dialer<R>,
    protocol: HttpConnectionBuilder,
    pool: Option<Pool<HttpConnection>>,
    next_id: AtomicU64,

    #[cfg(feature = "tls")]
    tls: Arc<rustls::ClientConfig>,
}

/// Produces HTTP connections under a fixed [`TransportConfig`].
///
/// Cloning a transport is cheap, and clones share the connection pool and
/// the resolver cache.
pub struct Transport<R = GaiResolver> {
    inner: Arc<Inner<R>>,
}

impl<R> Clone for Transport<R> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<R> fmt::Debug for Transport<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transport")
            .field("config", &self.inner.config)
            .field("pooled", &self.inner.pool.is_some())
            .finish()
    }
}

impl Transport {
    /// Build a transport using the system resolver.
    pub fn build(config: TransportConfig) -> Self {
        TransportBuilder::new(config).build()
    }

    /// Start building a transport with a custom resolver or TLS settings.
    pub fn builder(config: TransportConfig) -> TransportBuilder {
        TransportBuilder::new(config)
    }
}

impl<R: Resolve> Transport<R> {
    /// The configuration this transport was built from.
    pub fn config(&self) -> &TransportConfig {
        &self.inner.config
    }

    /// The dialer used for new connections.
    pub fn dialer(&self) -> &Dialer<R> {
        &self.inner.dialer
    }

    /// Number of idle pooled connections for the host of `uri`.
    pub fn idle_connections(&self, uri: &Uri) -> usize {
        match (&self.inner.pool, UriKey::from_uri(uri)) {
            (Some(pool), Ok(key)) => pool.idle(&key),
            _ => 0,
        }
    }

    /// Get a connection ready to carry a request to `uri`.
    ///
    /// A pooled connection is used when one is idle and still usable;
    /// otherwise a new connection is dialed.
    pub(crate) async fn connect(&self, uri: &Uri) -> Result<Pooled<HttpConnection>, ConnectError> {
        let key = UriKey::from_uri(uri)?;
        let tls = match uri.scheme_str() {
            Some("http") => false,
            #[cfg(feature = "tls")]
            Some("https") => true,
            other => return Err(ConnectError::UnsupportedScheme(other.unwrap_or_default().into())),
        };

        if let Some(pool) = &self.inner.pool {
            while let Some(mut conn) = pool.checkout(&key) {
                match conn.ready().await {
                    Ok(()) => {
                        trace!(connection = conn.info().id, "reusing pooled connection");
                        return Ok(conn);
                    }
                    Err(error) => {
                        trace!(%error, "pooled connection is unusable, discarding");
                    }
                }
            }
        }

        let target = Target::from_uri(uri)?;
        let stream = self.inner.dialer.dial(Network::Tcp, &target).await?;
        let socket_error = |source| {
            ConnectError::Dial(DialError::Socket {
                target: target.clone(),
                source,
            })
        };
        let local_addr = stream.local_addr().map_err(socket_error)?;
        let remote_addr = stream.peer_addr().map_err(socket_error)?;

        let stream = if tls {
            self.tls_handshake(stream, &target).await?
        } else {
            ClientStream::from(stream)
        };

        let protocol = self.select_protocol(&stream);
        let info = ConnectionInfo {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            local_addr,
            remote_addr,
            protocol: Protocol::http(protocol.version()),
            tls: stream.is_tls(),
        };
        trace!(%info, "connection established");

        let conn = self
            .inner
            .protocol
            .handshake(stream, protocol, info)
            .await
            .map_err(ConnectError::Handshake)?;

        Ok(match &self.inner.pool {
            Some(pool) => pool.insert(key, conn),
            None => Pooled::unpooled(key, conn),
        })
    }

    /// HTTP/2 only when allowed and agreed via ALPN. Cleartext is always HTTP/1.1.
    fn select_protocol(&self, stream: &ClientStream) -> HttpProtocol {
        match stream.negotiated() {
            Some(Protocol::Http(Version::HTTP_2)) if self.inner.config.allow_http2 => {
                trace!("alpn negotiated h2");
                HttpProtocol::Http2
            }
            negotiated => {
                trace!(?negotiated, "using http/1.1");
                HttpProtocol::Http1
            }
        }
    }

    #[cfg(feature = "tls")]
    async fn tls_handshake(
        &self,
        stream: tokio::net::TcpStream,
        target: &Target,
    ) -> Result<ClientStream, ConnectError> {
        let stream = super::tls::handshake(stream, target.host(), self.inner.tls.clone())
            .await
            .map_err(|source| ConnectError::Tls {
                target: target.clone(),
                source,
            })?;
        Ok(ClientStream::Tls(Box::new(stream)))
    }

    #[cfg(not(feature = "tls"))]
    async fn tls_handshake(
        &self,
        _stream: tokio::net::TcpStream,
        _target: &Target,
    ) -> Result<ClientStream, ConnectError> {
        Err(ConnectError::UnsupportedScheme("https".into()))
    }
}

/// Builder for a [`Transport`] with a custom resolver or TLS configuration.
pub struct TransportBuilder<R = GaiResolver> {
    config: TransportConfig,
    resolver: R,

    #[cfg(feature = "tls")]
    tls: Option<rustls::ClientConfig>,
}

impl<R> fmt::Debug for TransportBuilder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TransportBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl TransportBuilder {
    /// A builder using the system resolver and default TLS roots.
    pub fn new(config: TransportConfig) -> Self {
        Self {
            config,
            resolver: GaiResolver::new(),
            #[cfg(feature = "tls")]
            tls: None,
        }
    }
}

impl<R> TransportBuilder<R> {
    /// Use `resolver` for host lookups.
    pub fn with_resolver<R2: Resolve>(self, resolver: R2) -> TransportBuilder<R2> {
        TransportBuilder {
            config: self.config,
            resolver,
            #[cfg(feature = "tls")]
            tls: self.tls,
        }
    }

    /// Use `tls` for `https` connections. Its ALPN list is replaced
    /// according to [`TransportConfig::allow_http2`].
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: rustls::ClientConfig) -> Self {
        self.tls = Some(tls);
        self
    }

    /// Assemble the transport.
    pub fn build(self) -> Transport<R>
    where
        R: Resolve,
    {
        let config = self.config;
        let dialer = Dialer::new(&config, self.resolver);
        let pool = config.reuse_connections.then(|| {
            Pool::new(pool::Config::new(
                (!config.keep_alive.is_zero()).then_some(config.keep_alive),
                config.max_idle_per_host,
            ))
        });

        #[cfg(feature = "tls")]
        let tls = super::tls::transport_config(self.tls, config.allow_http2);

        Transport {
            inner: Arc::new(Inner {
                config,
                dialer,
                protocol: HttpConnectionBuilder::default(),
                pool,
                next_id: AtomicU64::new(1),
                #[cfg(feature = "tls")]
                tls,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use bytes::Bytes;
    use http_body_util::{BodyExt as _, Empty, Full};
    use hyper::service::service_fn;
    use static_assertions::assert_impl_all;
    use tokio::net::TcpListener;

    use super::*;
    use crate::bridge::io::TokioIo;

    assert_impl_all!(Transport: Send, Sync, Clone);
    assert_impl_all!(TransportConfig: Send, Sync);

    async fn server() -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let Ok((stream, _)) = listener.accept().await else {
                    return;
                };
                tokio::spawn(async move {
                    let service = service_fn(|_req| async {
                        Ok::<_, Infallible>(http::Response::new(Full::new(Bytes::from_static(
                            b"ok",
                        ))))
                    });
                    let _ = hyper::server::conn::http1::Builder::new()
                        .serve_connection(TokioIo::new(stream), service)
                        .await;
                });
            }
        });
        addr
    }

    async fn get(conn: &mut HttpConnection, uri: &Uri) {
        let request = http::Request::builder()
            .uri(uri.path())
            .header(http::header::HOST, uri.authority().unwrap().as_str())
            .body(Empty::<Bytes>::new())
            .unwrap();
        let response = conn.send_request(request).await.unwrap();
        response.into_body().collect().await.unwrap();
    }

    #[test]
    fn default_config() {
        let config = TransportConfig::default();
        assert_eq!(config.connect_timeout, Duration::from_secs(30));
        assert_eq!(config.keep_alive, Duration::from_secs(30));
        assert!(config.allow_http2);
        assert!(config.reuse_connections);
        assert!(!config.force_ipv4);
        assert!(!config.bypass_resolver_cache);
    }

    #[tokio::test]
    async fn pooled_connection_is_reused() {
        let _ = tracing_subscriber::fmt::try_init();
        let addr = server().await;
        let uri: Uri = format!("http://{addr}/").parse().unwrap();

        let transport = Transport::build(TransportConfig::default());

        let mut conn = transport.connect(&uri).await.unwrap();
        assert!(!conn.is_reused());
        assert_eq!(conn.info().protocol, Protocol::http(Version::HTTP_11));
        let first = conn.info().local_addr;
        get(&mut conn, &uri).await;
        conn.release();
        assert_eq!(transport.idle_connections(&uri), 1);

        let conn = transport.connect(&uri).await.unwrap();
        assert!(conn.is_reused());
        assert_eq!(conn.info().local_addr, first);
    }

    #[tokio::test]
    async fn unpooled_transport_dials_each_time() {
        let addr = server().await;
        let uri: Uri = format!("http://{addr}/").parse().unwrap();

        let transport = Transport::build(TransportConfig {
            reuse_connections: false,
            ..Default::default()
        });

        let mut conn = transport.connect(&uri).await.unwrap();
        let first = conn.info().clone();
        get(&mut conn, &uri).await;
        conn.release();
        assert_eq!(transport.idle_connections(&uri), 0);

        let conn = transport.connect(&uri).await.unwrap();
        assert!(!conn.is_reused());
        assert_ne!(conn.info().id, first.id);
        assert_ne!(conn.info().local_addr, first.local_addr);
    }

    #[tokio::test]
    async fn dropped_connection_is_not_pooled() {
        let addr = server().await;
        let uri: Uri = format!("http://{addr}/").parse().unwrap();
        let transport = Transport::build(TransportConfig::default());

        let conn = transport.connect(&uri).await.unwrap();
        drop(conn);
        assert_eq!(transport.idle_connections(&uri), 0);
    }

    #[tokio::test]
    async fn unsupported_scheme() {
        let transport = Transport::build(TransportConfig::default());
        let uri: Uri = "ftp://example.com/".parse().unwrap();
        let err = transport.connect(&uri).await.unwrap_err();
        assert!(matches!(err, ConnectError::UnsupportedScheme(ref s) if s == "ftp"));
    }
}
