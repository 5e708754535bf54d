//! HTTP fetch client
//!
//! A [`Client`] pairs a [`Transport`](conn::Transport) with an overall
//! deadline. Each call to [`Client::fetch`] gets its own deadline, covering
//! connecting, sending the request, waiting for the response head and
//! reading the body, and always produces a [`RequestOutcome`]. Failures are
//! classified and recorded in the outcome rather than returned as errors.
//!
//! The connect timeout of the transport nests inside this deadline: with a
//! 30 second connect timeout and a 15 second overall timeout, a stalled
//! connect fails after 15 seconds. A zero timeout at either level is no
//! limit at that level.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::BytesMut;
use http::header::{CONNECTION, HOST, USER_AGENT};
use http::{HeaderValue, Method, Request, Uri, Version};
use http_body_util::{BodyExt as _, Empty};
use tracing::{debug, Instrument};

pub mod conn;
mod error;
mod outcome;
pub mod pool;
mod sequence;

use self::conn::dns::GaiResolver;
use self::conn::protocol::RequestBody;
use self::conn::{HttpConnection, Resolve, Transport, TransportBuilder, TransportConfig};
pub use self::error::{ErrorKind, FetchError, Phase};
pub use self::outcome::RequestOutcome;
pub use self::sequence::{Reporter, Sequence, SequenceSummary, TracingReporter};

/// The default `User-Agent` header value.
pub const DEFAULT_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"));

/// Configuration of a [`Client`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Deadline for each fetch, from start to the last body byte. Zero
    /// means no deadline.
    pub overall_timeout: Duration,

    /// Settings for the transport the client owns.
    pub transport: TransportConfig,

    /// Keep response bodies in the outcome instead of discarding them.
    pub capture_body: bool,

    /// Value of the `User-Agent` header, if any.
    pub user_agent: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(15),
            transport: TransportConfig::default(),
            capture_body: false,
            user_agent: Some(DEFAULT_USER_AGENT.to_owned()),
        }
    }
}

/// What a fetch has learned so far. Survives the fetch being cut off by
/// the deadline.
#[derive(Debug, Default)]
struct Progress {
    phase: Phase,
    status: Option<http::StatusCode>,
    version: Option<Version>,
    connection: Option<crate::info::ConnectionInfo>,
    reused: bool,
    bytes_read: u64,
    body: Option<BytesMut>,
}

/// An HTTP client with a fixed configuration.
///
/// Cloning a client is cheap; clones share the transport, and with it the
/// connection pool and resolver cache.
pub struct Client<R = GaiResolver> {
    config: Arc<ClientConfig>,
    transport: Transport<R>,
}

impl<R> Clone for Client<R> {
    fn clone(&self) -> Self {
        Self {
            config: self.config.clone(),
            transport: self.transport.clone(),
        }
    }
}

impl<R> fmt::Debug for Client<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Client")
            .field("config", &self.config)
            .finish()
    }
}

impl Client {
    /// Create a client using the system resolver.
    pub fn new(config: ClientConfig) -> Self {
        ClientBuilder::new(config).build()
    }

    /// Start building a client with a custom resolver or TLS configuration.
    pub fn builder(config: ClientConfig) -> ClientBuilder {
        ClientBuilder::new(config)
    }
}

impl<R: Resolve> Client<R> {
    /// The configuration of this client.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// The transport this client sends requests through.
    pub fn transport(&self) -> &Transport<R> {
        &self.transport
    }

    /// Fetch `url` with a `GET` request, reading the whole body.
    pub async fn fetch(&self, url: &str) -> RequestOutcome {
        let span = tracing::debug_span!("fetch", %url);
        self.fetch_inner(url).instrument(span).await
    }

    async fn fetch_inner(&self, url: &str) -> RequestOutcome {
        let started = Instant::now();
        let timeout = self.config.overall_timeout;
        let mut progress = Progress {
            body: self.config.capture_body.then(BytesMut::new),
            ..Default::default()
        };

        let result = match parse_url(url) {
            Ok(uri) if timeout.is_zero() => Ok(self.exchange(uri, &mut progress).await),
            Ok(uri) => tokio::time::timeout(timeout, self.exchange(uri, &mut progress)).await,
            Err(error) => Ok(Err(error)),
        };
        let error = match result {
            Ok(Ok(())) => None,
            Ok(Err(error)) => Some(error),
            Err(_) => Some(FetchError::Timeout {
                timeout,
                phase: progress.phase,
            }),
        };

        let outcome = RequestOutcome {
            url: url.to_owned(),
            status: progress.status,
            version: progress.version,
            bytes_read: progress.bytes_read,
            elapsed: started.elapsed(),
            connection: progress.connection,
            reused: progress.reused,
            body: progress.body.map(BytesMut::freeze),
            error,
        };

        match &outcome.error {
            None => debug!(
                status = %outcome.status_text(),
                bytes = outcome.bytes_read,
                elapsed = ?outcome.elapsed,
                "fetch complete"
            ),
            Some(error) => debug!(kind = %error.kind(), %error, "fetch failed"),
        }
        outcome
    }

    async fn exchange(&self, uri: Uri, progress: &mut Progress) -> Result<(), FetchError> {
        progress.phase = Phase::Connecting;
        let mut conn = self.transport.connect(&uri).await?;
        progress.connection = Some(conn.info().clone());
        progress.reused = conn.is_reused();
        progress.version = Some(conn.version());

        let request = self.request(&uri, &conn)?;

        progress.phase = Phase::AwaitingHeaders;
        let response = conn
            .send_request(request)
            .await
            .map_err(FetchError::Request)?;
        progress.status = Some(response.status());
        progress.version = Some(response.version());

        progress.phase = Phase::ReadingBody;
        let mut body = response.into_body();
        while let Some(frame) = body.frame().await {
            let frame = frame.map_err(FetchError::Body)?;
            if let Ok(data) = frame.into_data() {
                progress.bytes_read += data.len() as u64;
                if let Some(captured) = progress.body.as_mut() {
                    captured.extend_from_slice(&data);
                }
            }
        }

        // Only a fully read response hands its connection back.
        conn.release();
        Ok(())
    }

    fn request(&self, uri: &Uri, conn: &HttpConnection) -> Result<Request<RequestBody>, FetchError> {
        let invalid = |error: http::Error| FetchError::invalid_url(uri.to_string(), error);

        let mut builder = Request::builder().method(Method::GET);
        builder = match conn.version() {
            Version::HTTP_2 => builder.version(Version::HTTP_2).uri(uri.clone()),
            _ => {
                let path = uri.path_and_query().map_or("/", |pq| pq.as_str());
                builder.uri(path).header(HOST, host_header(uri)?)
            }
        };

        if !self.config.transport.reuse_connections && conn.version() == Version::HTTP_11 {
            builder = builder.header(CONNECTION, HeaderValue::from_static("close"));
        }

        if let Some(agent) = &self.config.user_agent {
            builder = builder.header(USER_AGENT, agent.as_str());
        }

        builder.body(Empty::new()).map_err(invalid)
    }
}

fn parse_url(url: &str) -> Result<Uri, FetchError> {
    let uri: Uri = url
        .parse()
        .map_err(|error: http::uri::InvalidUri| FetchError::invalid_url(url, error))?;

    match uri.scheme_str() {
        Some("http") | Some("https") => {}
        Some(scheme) => {
            return Err(FetchError::invalid_url(
                url,
                format!("unsupported scheme {scheme:?}"),
            ))
        }
        None => return Err(FetchError::invalid_url(url, "missing scheme")),
    }

    if uri.host().map_or(true, str::is_empty) {
        return Err(FetchError::invalid_url(url, "missing host"));
    }

    Ok(uri)
}

/// The `Host` header for `uri`: host and explicit port, without user info.
fn host_header(uri: &Uri) -> Result<HeaderValue, FetchError> {
    let host = uri.host().unwrap_or_default();
    let value = match uri.port_u16() {
        Some(port) => format!("{host}:{port}"),
        None => host.to_owned(),
    };
    HeaderValue::try_from(value).map_err(|error| FetchError::invalid_url(uri.to_string(), error))
}

/// Builder for a [`Client`] with a custom resolver or TLS configuration.
pub struct ClientBuilder<R = GaiResolver> {
    config: ClientConfig,
    transport: TransportBuilder<R>,
}

impl<R> fmt::Debug for ClientBuilder<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientBuilder")
            .field("config", &self.config)
            .finish()
    }
}

impl ClientBuilder {
    /// A builder using the system resolver.
    pub fn new(config: ClientConfig) -> Self {
        let transport = Transport::builder(config.transport.clone());
        Self { config, transport }
    }
}

impl<R> ClientBuilder<R> {
    /// Use `resolver` for host lookups.
    pub fn with_resolver<R2: Resolve>(self, resolver: R2) -> ClientBuilder<R2> {
        ClientBuilder {
            config: self.config,
            transport: self.transport.with_resolver(resolver),
        }
    }

    /// Use `tls` for `https` connections.
    #[cfg(feature = "tls")]
    pub fn with_tls(mut self, tls: rustls::ClientConfig) -> Self {
        self.transport = self.transport.with_tls(tls);
        self
    }

    /// Build the client.
    pub fn build(self) -> Client<R>
    where
        R: Resolve,
    {
        Client {
            config: Arc::new(self.config),
            transport: self.transport.build(),
        }
    }
}
