//! Connection Information
//!
//! What the client learned about the connection a request travelled over:
//! the socket addresses on both ends, the negotiated protocol and whether TLS
//! was in use. This is what makes family forcing and connection reuse
//! observable from the outside.

use std::convert::Infallible;
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// The application protocol negotiated for a connection.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum Protocol {
    /// HTTP transports
    Http(http::Version),

    /// Other protocol, usually an unrecognized ALPN identifier
    Other(String),
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            // http::Version uses the debug format to write out the version
            Self::Http(version) => write!(f, "{version:?}"),
            Self::Other(s) => write!(f, "{s}"),
        }
    }
}

impl Protocol {
    /// Create a new protocol with the given http version.
    pub fn http(version: http::Version) -> Self {
        Self::Http(version)
    }

    /// The ALPN identifier for this protocol.
    pub fn alpn(&self) -> Option<&'static [u8]> {
        match self {
            Self::Http(http::Version::HTTP_11) => Some(b"http/1.1"),
            Self::Http(http::Version::HTTP_2) => Some(b"h2"),
            _ => None,
        }
    }
}

impl From<http::Version> for Protocol {
    fn from(version: http::Version) -> Self {
        Self::Http(version)
    }
}

impl FromStr for Protocol {
    type Err = Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "http/1.0" => Ok(Self::Http(http::Version::HTTP_10)),
            "http/1.1" => Ok(Self::Http(http::Version::HTTP_11)),
            "h2" => Ok(Self::Http(http::Version::HTTP_2)),
            "h3" => Ok(Self::Http(http::Version::HTTP_3)),
            _ => Ok(Self::Other(s.to_string())),
        }
    }
}

/// Information about a dialed connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionInfo {
    /// Identifies the connection within the transport that dialed it.
    pub id: u64,

    /// The local socket address.
    pub local_addr: SocketAddr,

    /// The peer socket address.
    pub remote_addr: SocketAddr,

    /// The protocol spoken on this connection, once the handshake is done.
    pub protocol: Protocol,

    /// Whether the connection is wrapped in TLS.
    pub tls: bool,
}

impl ConnectionInfo {
    /// The local socket address.
    pub fn local_addr(&self) -> &SocketAddr {
        &self.local_addr
    }

    /// The peer socket address.
    pub fn remote_addr(&self) -> &SocketAddr {
        &self.remote_addr
    }

    /// Whether the peer was reached over IPv4.
    pub fn is_ipv4(&self) -> bool {
        self.remote_addr.is_ipv4()
    }
}

impl fmt::Display for ConnectionInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} -> {} ({}{})",
            self.id,
            self.local_addr,
            self.remote_addr,
            self.protocol,
            if self.tls { ", tls" } else { "" }
        )
    }
}

#[cfg(test)]
mod tests {
    use std::net::{IpAddr, Ipv4Addr};

    use http::Version;
    use tokio::net::{TcpListener, TcpStream};

    use super::*;

    #[test]
    fn protocol_display() {
        assert_eq!(Protocol::http(Version::HTTP_11).to_string(), "HTTP/1.1");
        assert_eq!(Protocol::http(Version::HTTP_2).to_string(), "HTTP/2.0");
        assert_eq!(Protocol::Other("spdy/3".into()).to_string(), "spdy/3");
    }

    #[test]
    fn parse_protocol() {
        assert_eq!(
            Protocol::from_str("http/1.1").unwrap(),
            Protocol::http(Version::HTTP_11)
        );
        assert_eq!(
            Protocol::from_str("h2").unwrap(),
            Protocol::http(Version::HTTP_2)
        );
        assert_eq!(
            Protocol::from_str("foo").unwrap(),
            Protocol::Other("foo".into())
        )
    }

    #[test]
    fn protocol_alpn() {
        assert_eq!(
            Protocol::http(Version::HTTP_2).alpn(),
            Some(b"h2".as_slice())
        );
        assert_eq!(
            Protocol::http(Version::HTTP_11).alpn(),
            Some(b"http/1.1".as_slice())
        );
        assert_eq!(Protocol::http(Version::HTTP_10).alpn(), None);
    }

    #[tokio::test]
    async fn tcp_connection_addrs() {
        let listener = TcpListener::bind(SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 0))
            .await
            .unwrap();
        let addr = listener.local_addr().unwrap();

        let conn = TcpStream::connect(addr).await.unwrap();

        let peer = conn.peer_addr().unwrap();
        assert_eq!(peer.ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));
        assert_eq!(peer.port(), addr.port());

        let info = ConnectionInfo {
            id: 7,
            local_addr: conn.local_addr().unwrap(),
            remote_addr: peer,
            protocol: Protocol::http(Version::HTTP_11),
            tls: false,
        };
        assert!(info.is_ipv4());
        assert!(info.to_string().starts_with("#7 127.0.0.1:"));
    }
}
