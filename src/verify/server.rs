use std::convert::Infallible;
use std::fmt;
use std::future::Future;
use std::io;
use std::net::{Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http::{Request, Response, StatusCode};
use http_body_util::Full;
use hyper::body::Incoming;
use hyper::service::service_fn;
use parking_lot::Mutex;
use tokio::net::TcpListener;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, info, Instrument};

use crate::bridge::io::TokioIo;
use crate::duration;

#[derive(Debug, Default)]
struct State {
    requests: AtomicUsize,
    peers: Mutex<Vec<SocketAddr>>,
}

impl State {
    fn record(&self, peer: SocketAddr) {
        self.requests.fetch_add(1, Ordering::SeqCst);
        self.peers.lock().push(peer);
    }
}

/// A plain-text HTTP/1.1 server on a local port.
///
/// Routes:
///
/// - `/slow?delay=<duration>` sleeps for the delay (such as `3s` or `250ms`)
///   before answering `Hello from slow server after <delay>!`. A missing or
///   malformed delay is answered with `400 Bad Request`.
/// - `/fast` answers `Hello from fast server!` immediately.
/// - Anything else is `404 Not Found`.
///
/// The server records the client address of every request, so tests can
/// tell whether requests shared a connection. It stops when dropped.
pub struct MockServer {
    addr: SocketAddr,
    state: Arc<State>,
    task: JoinHandle<()>,
}

impl fmt::Debug for MockServer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MockServer")
            .field("addr", &self.addr)
            .field("requests", &self.request_count())
            .finish()
    }
}

impl MockServer {
    /// Start a server on an ephemeral port of `127.0.0.1`.
    pub async fn start() -> io::Result<Self> {
        Self::bind(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0)).await
    }

    /// Start a server on `addr`.
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let listener = TcpListener::bind(addr).await?;
        let addr = listener.local_addr()?;
        let state = Arc::new(State::default());

        let span = tracing::debug_span!("mock-server", %addr);
        let task = tokio::spawn(serve(listener, state.clone()).instrument(span));
        debug!(%addr, "mock server listening");

        Ok(Self { addr, state, task })
    }

    /// The bound address.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// An `http` URL for `path_and_query` on this server.
    pub fn url(&self, path_and_query: &str) -> String {
        format!("http://{}{}", self.addr, path_and_query)
    }

    /// URL of the delayed route.
    pub fn slow_url(&self, delay: Duration) -> String {
        self.url(&format!("/slow?delay={}", duration::format(delay)))
    }

    /// URL of the immediate route.
    pub fn fast_url(&self) -> String {
        self.url("/fast")
    }

    /// Number of requests received.
    pub fn request_count(&self) -> usize {
        self.state.requests.load(Ordering::SeqCst)
    }

    /// Client address of every request received, in arrival order.
    pub fn peers(&self) -> Vec<SocketAddr> {
        self.state.peers.lock().clone()
    }

    /// Number of distinct client addresses seen, which is the number of
    /// connections that carried a request.
    pub fn distinct_peers(&self) -> usize {
        let mut peers = self.peers();
        peers.sort();
        peers.dedup();
        peers.len()
    }
}

impl Drop for MockServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Pause after a failed `accept` before trying again. Errors such as
/// `EMFILE` persist until a connection closes.
const ACCEPT_BACKOFF: Duration = Duration::from_millis(50);

async fn accept_with_backoff<F, Fut, T>(mut accept: F) -> T
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<T>>,
{
    loop {
        match accept().await {
            Ok(accepted) => return accepted,
            Err(error) => {
                debug!(%error, "accept error");
                tokio::time::sleep(ACCEPT_BACKOFF).await;
            }
        }
    }
}

async fn serve(listener: TcpListener, state: Arc<State>) {
    // Dropping the set when the accept loop is aborted closes every connection.
    let mut connections = JoinSet::new();

    loop {
        let (stream, peer) = accept_with_backoff(|| listener.accept()).await;

        let state = state.clone();
        connections.spawn(async move {
            let service = service_fn(move |req| route(req, peer, state.clone()));
            if let Err(error) = hyper::server::conn::http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!(%peer, %error, "connection error");
            }
        });

        // Reap finished connections so the set does not grow without bound.
        while connections.try_join_next().is_some() {}
    }
}

async fn route(
    req: Request<Incoming>,
    peer: SocketAddr,
    state: Arc<State>,
) -> Result<Response<Full<Bytes>>, Infallible> {
    state.record(peer);

    let response = match req.uri().path() {
        "/slow" => match delay_param(req.uri().query()) {
            Some(delay) => {
                info!(%peer, delay = %duration::Display(delay), "slow request, delaying");
                tokio::time::sleep(delay).await;
                info!(%peer, "slow request finished");
                text(
                    StatusCode::OK,
                    format!("Hello from slow server after {}!", duration::Display(delay)),
                )
            }
            None => text(StatusCode::BAD_REQUEST, "Invalid delay parameter\n"),
        },
        "/fast" => {
            info!(%peer, "fast request");
            text(StatusCode::OK, "Hello from fast server!")
        }
        _ => text(StatusCode::NOT_FOUND, "Not Found\n"),
    };
    Ok(response)
}

fn delay_param(query: Option<&str>) -> Option<Duration> {
    let value = query?
        .split('&')
        .find_map(|pair| pair.strip_prefix("delay="))?;
    duration::parse(value).ok()
}

fn text(status: StatusCode, body: impl Into<Bytes>) -> Response<Full<Bytes>> {
    let mut response = Response::new(Full::new(body.into()));
    *response.status_mut() = status;
    response.headers_mut().insert(
        http::header::CONTENT_TYPE,
        http::HeaderValue::from_static("text/plain; charset=utf-8"),
    );
    response
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn accept_errors_back_off() {
        let mut failures = 3;
        let started = tokio::time::Instant::now();

        let accepted = accept_with_backoff(|| {
            let result = if failures > 0 {
                failures -= 1;
                Err(io::Error::from_raw_os_error(24))
            } else {
                Ok(7)
            };
            std::future::ready(result)
        })
        .await;

        assert_eq!(accepted, 7);
        assert!(started.elapsed() >= ACCEPT_BACKOFF * 3);
        assert!(started.elapsed() < ACCEPT_BACKOFF * 4);
    }

    #[test]
    fn parse_delay_param() {
        assert_eq!(delay_param(Some("delay=3s")), Some(Duration::from_secs(3)));
        assert_eq!(
            delay_param(Some("x=1&delay=250ms")),
            Some(Duration::from_millis(250))
        );
        assert_eq!(delay_param(Some("delay=soon")), None);
        assert_eq!(delay_param(Some("other=1")), None);
        assert_eq!(delay_param(None), None);
    }

    #[tokio::test]
    async fn server_urls() {
        let server = MockServer::start().await.unwrap();
        let addr = server.addr();
        assert!(addr.ip().is_loopback());
        assert_eq!(
            server.slow_url(Duration::from_millis(1_500)),
            format!("http://{addr}/slow?delay=1.5s")
        );
        assert_eq!(server.fast_url(), format!("http://{addr}/fast"));
        assert_eq!(server.request_count(), 0);
    }
}
