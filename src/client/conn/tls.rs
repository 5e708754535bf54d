//! TLS for `https` targets.
//!
//! The transport only configures rustls: which roots to trust and which
//! protocols to offer via ALPN. ALPN always follows the transport's HTTP/2
//! setting, whatever the supplied configuration says.

use std::io;
use std::sync::Arc;

use http::Version;
use rustls::pki_types::ServerName;
use rustls::ClientConfig;
use tokio::net::TcpStream;
use tokio_rustls::client::TlsStream;
use tokio_rustls::TlsConnector;

use crate::info::Protocol;

/// A TLS client configuration trusting the bundled web PKI roots.
///
/// ALPN is left empty; the transport fills it in.
pub fn default_tls_config() -> ClientConfig {
    let roots = rustls::RootCertStore {
        roots: webpki_roots::TLS_SERVER_ROOTS.to_vec(),
    };

    ClientConfig::builder()
        .with_root_certificates(roots)
        .with_no_client_auth()
}

/// The ALPN identifiers offered for the given HTTP/2 setting.
pub(crate) fn alpn_protocols(allow_http2: bool) -> Vec<Vec<u8>> {
    let versions: &[Version] = if allow_http2 {
        &[Version::HTTP_2, Version::HTTP_11]
    } else {
        &[Version::HTTP_11]
    };

    versions
        .iter()
        .filter_map(|version| Protocol::http(*version).alpn())
        .map(<[u8]>::to_vec)
        .collect()
}

/// Finalize a TLS configuration for use by a transport.
pub(crate) fn transport_config(config: Option<ClientConfig>, allow_http2: bool) -> Arc<ClientConfig> {
    let mut config = config.unwrap_or_else(default_tls_config);
    config.alpn_protocols = alpn_protocols(allow_http2);
    Arc::new(config)
}

/// Run the TLS handshake over a dialed stream.
#[tracing::instrument(name = "tls", skip(stream, config), level = "debug")]
pub(crate) async fn handshake(
    stream: TcpStream,
    domain: &str,
    config: Arc<ClientConfig>,
) -> io::Result<TlsStream<TcpStream>> {
    let server_name = ServerName::try_from(domain.to_owned())
        .map_err(|error| io::Error::new(io::ErrorKind::InvalidInput, error))?;

    let stream = TlsConnector::from(config)
        .connect(server_name, stream)
        .await?;
    tracing::trace!(
        alpn = ?stream.get_ref().1.alpn_protocol().map(String::from_utf8_lossy),
        "tls handshake complete"
    );
    Ok(stream)
}
