//! The byte stream underneath a client connection.
//!
//! A dialed [`TcpStream`], optionally wrapped in a TLS session once the
//! handshake has finished.

use std::io;
use std::pin::Pin;
use std::str::FromStr as _;
use std::task::{Context, Poll};

use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};
use tokio::net::TcpStream;

use crate::info::Protocol;

/// A client stream, either plain TCP or TLS over TCP.
#[derive(Debug)]
pub enum ClientStream {
    /// A plain TCP stream.
    Tcp(TcpStream),

    /// A TLS session over TCP.
    #[cfg(feature = "tls")]
    Tls(Box<tokio_rustls::client::TlsStream<TcpStream>>),
}

impl ClientStream {
    /// The underlying TCP stream.
    pub fn tcp(&self) -> &TcpStream {
        match self {
            ClientStream::Tcp(stream) => stream,
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => stream.get_ref().0,
        }
    }

    /// Whether this stream is wrapped in TLS.
    pub fn is_tls(&self) -> bool {
        match self {
            ClientStream::Tcp(_) => false,
            #[cfg(feature = "tls")]
            ClientStream::Tls(_) => true,
        }
    }

    /// The protocol agreed via ALPN during the TLS handshake, if any.
    pub fn negotiated(&self) -> Option<Protocol> {
        match self {
            ClientStream::Tcp(_) => None,
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => stream
                .get_ref()
                .1
                .alpn_protocol()
                .and_then(|alpn| std::str::from_utf8(alpn).ok())
                .map(|alpn| match Protocol::from_str(alpn) {
                    Ok(protocol) => protocol,
                    Err(never) => match never {},
                }),
        }
    }
}

impl From<TcpStream> for ClientStream {
    fn from(stream: TcpStream) -> Self {
        ClientStream::Tcp(stream)
    }
}

impl AsyncRead for ClientStream {
    fn poll_read(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Tcp(stream) => Pin::new(stream).poll_read(cx, buf),
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_read(cx, buf),
        }
    }
}

impl AsyncWrite for ClientStream {
    fn poll_write(
        self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        match self.get_mut() {
            ClientStream::Tcp(stream) => Pin::new(stream).poll_write(cx, buf),
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_write(cx, buf),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Tcp(stream) => Pin::new(stream).poll_flush(cx),
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_flush(cx),
        }
    }

    fn poll_shutdown(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        match self.get_mut() {
            ClientStream::Tcp(stream) => Pin::new(stream).poll_shutdown(cx),
            #[cfg(feature = "tls")]
            ClientStream::Tls(stream) => Pin::new(stream.as_mut()).poll_shutdown(cx),
        }
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt as _, AsyncWriteExt as _};
    use tokio::net::TcpListener;

    use super::*;

    #[tokio::test]
    async fn plain_stream_round_trip() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
        let mut client = ClientStream::from(client.unwrap());
        let (mut server, _) = server.unwrap();

        assert!(!client.is_tls());
        assert_eq!(client.negotiated(), None);
        assert_eq!(client.tcp().peer_addr().unwrap(), addr);

        client.write_all(b"ping").await.unwrap();
        let mut buf = [0u8; 4];
        server.read_exact(&mut buf).await.unwrap();
        assert_eq!(&buf, b"ping");
    }
}
