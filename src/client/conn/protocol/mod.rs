//! HTTP protocol handshakes over dialed streams.
//!
//! The transport decides which protocol to speak, and this module runs the
//! matching hyper handshake and spawns the connection driver.

use bytes::Bytes;
use http::{Request, Response, Version};
use http_body_util::Empty;
use hyper::body::Incoming;
use hyper::client::conn::{http1, http2};
use tracing::trace;

use crate::bridge::io::TokioIo;
use crate::bridge::rt::TokioExecutor;
use crate::client::pool::PoolableConnection;
use crate::info::ConnectionInfo;

use super::stream::ClientStream;

/// The body type of requests sent by the client. Fetches never send a body.
pub(crate) type RequestBody = Empty<Bytes>;

/// The HTTP protocol to use for a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum HttpProtocol {
    /// HTTP/1.1
    Http1,

    /// HTTP/2
    Http2,
}

impl HttpProtocol {
    pub(crate) fn version(&self) -> Version {
        match self {
            HttpProtocol::Http1 => Version::HTTP_11,
            HttpProtocol::Http2 => Version::HTTP_2,
        }
    }
}

/// Builder for HTTP connections, holding the hyper settings for both
/// protocol versions.
#[derive(Debug, Clone)]
pub(crate) struct HttpConnectionBuilder {
    http1: http1::Builder,
    http2: http2::Builder<TokioExecutor>,
}

impl Default for HttpConnectionBuilder {
    fn default() -> Self {
        Self {
            http1: http1::Builder::new(),
            http2: http2::Builder::new(TokioExecutor::new()),
        }
    }
}

impl HttpConnectionBuilder {
    /// Run the handshake for `protocol` and spawn the connection driver.
    pub(crate) async fn handshake(
        &self,
        stream: ClientStream,
        protocol: HttpProtocol,
        info: ConnectionInfo,
    ) -> Result<HttpConnection, hyper::Error> {
        match protocol {
            HttpProtocol::Http1 => self.handshake_h1(stream, info).await,
            HttpProtocol::Http2 => self.handshake_h2(stream, info).await,
        }
    }

    async fn handshake_h1(
        &self,
        stream: ClientStream,
        info: ConnectionInfo,
    ) -> Result<HttpConnection, hyper::Error> {
        trace!("handshake h1");
        let (sender, conn) = self.http1.handshake(TokioIo::new(stream)).await?;
        let id = info.id;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                if err.is_user() {
                    tracing::error!(%err, connection = id, "h1 connection driver error");
                } else {
                    tracing::debug!(%err, connection = id, "h1 connection driver error");
                }
            }
        });
        trace!("handshake complete");
        Ok(HttpConnection {
            inner: InnerConnection::H1(sender),
            info,
        })
    }

    async fn handshake_h2(
        &self,
        stream: ClientStream,
        info: ConnectionInfo,
    ) -> Result<HttpConnection, hyper::Error> {
        trace!("handshake h2");
        let (sender, conn) = self.http2.handshake(TokioIo::new(stream)).await?;
        let id = info.id;
        tokio::spawn(async move {
            if let Err(err) = conn.await {
                if err.is_user() {
                    tracing::error!(%err, connection = id, "h2 connection driver error");
                } else {
                    tracing::debug!(%err, connection = id, "h2 connection driver error");
                }
            }
        });
        trace!("handshake complete");
        Ok(HttpConnection {
            inner: InnerConnection::H2(sender),
            info,
        })
    }
}

#[derive(Debug)]
enum InnerConnection {
    H1(http1::SendRequest<RequestBody>),
    H2(http2::SendRequest<RequestBody>),
}

/// An established HTTP/1.1 or HTTP/2 connection.
#[derive(Debug)]
pub struct HttpConnection {
    inner: InnerConnection,
    info: ConnectionInfo,
}

impl HttpConnection {
    /// The HTTP version spoken on this connection.
    pub fn version(&self) -> Version {
        match self.inner {
            InnerConnection::H1(_) => Version::HTTP_11,
            InnerConnection::H2(_) => Version::HTTP_2,
        }
    }

    /// Addresses and protocol of this connection.
    pub fn info(&self) -> &ConnectionInfo {
        &self.info
    }

    /// Wait until the connection can accept a request.
    pub(crate) async fn ready(&mut self) -> Result<(), hyper::Error> {
        match &mut self.inner {
            InnerConnection::H1(sender) => sender.ready().await,
            InnerConnection::H2(sender) => sender.ready().await,
        }
    }

    /// Send a request, resolving once the response head has arrived.
    pub(crate) async fn send_request(
        &mut self,
        request: Request<RequestBody>,
    ) -> Result<Response<Incoming>, hyper::Error> {
        match &mut self.inner {
            InnerConnection::H1(sender) => sender.send_request(request).await,
            InnerConnection::H2(sender) => sender.send_request(request).await,
        }
    }
}

impl PoolableConnection for HttpConnection {
    fn is_open(&self) -> bool {
        match &self.inner {
            InnerConnection::H1(sender) => !sender.is_closed(),
            InnerConnection::H2(sender) => !sender.is_closed(),
        }
    }

    fn can_share(&self) -> bool {
        matches!(self.inner, InnerConnection::H2(_))
    }

    fn reuse(&mut self) -> Option<Self> {
        match &self.inner {
            InnerConnection::H1(_) => None,
            InnerConnection::H2(sender) => Some(Self {
                inner: InnerConnection::H2(sender.clone()),
                info: self.info.clone(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::convert::Infallible;
    use std::net::SocketAddr;

    use http_body_util::{BodyExt as _, Full};
    use hyper::service::service_fn;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;
    use crate::info::Protocol;

    async fn serve_one(listener: TcpListener) {
        let (stream, _) = listener.accept().await.unwrap();
        let service = service_fn(|_req| async {
            Ok::<_, Infallible>(Response::new(Full::new(Bytes::from_static(b"hello"))))
        });
        let _ = hyper::server::conn::http1::Builder::new()
            .serve_connection(TokioIo::new(stream), service)
            .await;
    }

    fn info(local: SocketAddr, remote: SocketAddr) -> ConnectionInfo {
        ConnectionInfo {
            id: 1,
            local_addr: local,
            remote_addr: remote,
            protocol: Protocol::http(Version::HTTP_11),
            tls: false,
        }
    }

    #[tokio::test]
    async fn http1_handshake_and_request() {
        let _ = tracing_subscriber::fmt::try_init();

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(serve_one(listener));

        let stream = TcpStream::connect(addr).await.unwrap();
        let local = stream.local_addr().unwrap();
        let mut conn = HttpConnectionBuilder::default()
            .handshake(stream.into(), HttpProtocol::Http1, info(local, addr))
            .await
            .unwrap();

        assert_eq!(conn.version(), Version::HTTP_11);
        assert!(conn.is_open());
        assert!(!conn.can_share());
        assert!(conn.reuse().is_none());
        assert_eq!(conn.info().local_addr, local);

        conn.ready().await.unwrap();
        let request = Request::builder()
            .uri("/")
            .header(http::header::HOST, addr.to_string())
            .body(Empty::new())
            .unwrap();
        let response = conn.send_request(request).await.unwrap();
        assert_eq!(response.status(), http::StatusCode::OK);

        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"hello");
    }
}
