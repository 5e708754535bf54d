use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::client::conn::{ConnectError, DialError};
use crate::BoxError;

/// Classification of a failed fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[non_exhaustive]
pub enum ErrorKind {
    /// The URL could not be parsed, or does not name an `http(s)` host.
    InvalidUrl,

    /// The host name could not be resolved to a usable address.
    Resolution,

    /// The TCP or TLS connection could not be established.
    Dial,

    /// The request could not be sent, or the connection failed before the
    /// response head arrived.
    Request,

    /// The overall deadline elapsed.
    OverallTimeout,

    /// The response body could not be read to the end.
    BodyRead,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            ErrorKind::InvalidUrl => "invalid url",
            ErrorKind::Resolution => "resolution",
            ErrorKind::Dial => "dial",
            ErrorKind::Request => "request",
            ErrorKind::OverallTimeout => "overall timeout",
            ErrorKind::BodyRead => "body read",
        })
    }
}

/// The part of the exchange a fetch had reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Phase {
    /// Resolving, dialing and handshaking.
    #[default]
    Connecting,

    /// The request was sent, the response head has not arrived.
    AwaitingHeaders,

    /// Reading the response body.
    ReadingBody,
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Phase::Connecting => "connecting",
            Phase::AwaitingHeaders => "awaiting headers",
            Phase::ReadingBody => "reading body",
        })
    }
}

/// Error recorded in a [`RequestOutcome`](super::RequestOutcome) when a fetch fails.
#[derive(Debug, Error)]
pub enum FetchError {
    /// The URL could not be used.
    #[error("invalid url {url:?}: {source}")]
    InvalidUrl {
        /// The URL as given.
        url: String,
        /// Why it was rejected.
        #[source]
        source: BoxError,
    },

    /// No connection could be made.
    #[error(transparent)]
    Connect(#[from] ConnectError),

    /// The request failed before a response arrived.
    #[error("request: {0}")]
    Request(#[source] hyper::Error),

    /// The overall deadline elapsed.
    #[error("overall timeout of {timeout:?} exceeded while {phase}")]
    Timeout {
        /// The overall timeout.
        timeout: Duration,
        /// How far the exchange got.
        phase: Phase,
    },

    /// The body could not be read.
    #[error("reading body: {0}")]
    Body(#[source] hyper::Error),
}

impl FetchError {
    pub(crate) fn invalid_url(url: impl Into<String>, source: impl Into<BoxError>) -> Self {
        FetchError::InvalidUrl {
            url: url.into(),
            source: source.into(),
        }
    }

    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            FetchError::InvalidUrl { .. } => ErrorKind::InvalidUrl,
            FetchError::Connect(error) => match error {
                ConnectError::InvalidUri(_)
                | ConnectError::InvalidTarget(_)
                | ConnectError::UnsupportedScheme(_) => ErrorKind::InvalidUrl,
                ConnectError::Dial(DialError::Resolve { .. }) => ErrorKind::Resolution,
                ConnectError::Dial(_) | ConnectError::Tls { .. } => ErrorKind::Dial,
                ConnectError::Handshake(_) => ErrorKind::Request,
            },
            FetchError::Request(_) => ErrorKind::Request,
            FetchError::Timeout { .. } => ErrorKind::OverallTimeout,
            FetchError::Body(_) => ErrorKind::BodyRead,
        }
    }

    /// Whether the overall deadline elapsed.
    pub fn is_timeout(&self) -> bool {
        self.kind() == ErrorKind::OverallTimeout
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use static_assertions::assert_impl_all;

    use super::*;
    use crate::client::conn::dns::ResolveError;
    use crate::client::conn::Target;

    assert_impl_all!(FetchError: std::error::Error, Send, Sync, Into<BoxError>);

    #[test]
    fn classify_connect_errors() {
        let target = Target::new("example.test", 80);

        let err = FetchError::from(ConnectError::Dial(DialError::Resolve {
            target: target.clone(),
            source: ResolveError::NoAddresses {
                host: "example.test".into(),
            },
        }));
        assert_eq!(err.kind(), ErrorKind::Resolution);

        let err = FetchError::from(ConnectError::Dial(DialError::Timeout {
            target: target.clone(),
            timeout: Duration::from_secs(1),
        }));
        assert_eq!(err.kind(), ErrorKind::Dial);

        let err = FetchError::from(ConnectError::Tls {
            target,
            source: io::Error::new(io::ErrorKind::InvalidData, "bad certificate"),
        });
        assert_eq!(err.kind(), ErrorKind::Dial);

        let err = FetchError::from(ConnectError::UnsupportedScheme("ftp".into()));
        assert_eq!(err.kind(), ErrorKind::InvalidUrl);
    }

    #[test]
    fn timeout_message() {
        let err = FetchError::Timeout {
            timeout: Duration::from_secs(2),
            phase: Phase::AwaitingHeaders,
        };
        assert!(err.is_timeout());
        assert_eq!(
            err.to_string(),
            "overall timeout of 2s exceeded while awaiting headers"
        );
    }
}
