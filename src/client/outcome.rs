use std::fmt;
use std::time::Duration;

use bytes::Bytes;
use http::{StatusCode, Version};

use super::error::{ErrorKind, FetchError};
use crate::info::ConnectionInfo;

/// What happened during a single fetch.
///
/// A failed fetch still reports whatever it learned before failing: a
/// timeout while reading the body keeps the status and the bytes read so
/// far.
#[derive(Debug)]
pub struct RequestOutcome {
    /// The URL as given to the client.
    pub url: String,

    /// The response status, if response headers arrived.
    pub status: Option<StatusCode>,

    /// The HTTP version of the response, or of the connection if no
    /// response arrived.
    pub version: Option<Version>,

    /// Number of body bytes read.
    pub bytes_read: u64,

    /// Time from the start of the fetch until it finished or failed.
    pub elapsed: Duration,

    /// The connection the request travelled over, once one was established.
    pub connection: Option<ConnectionInfo>,

    /// Whether the connection came out of the pool.
    pub reused: bool,

    /// The response body, when body capture is enabled.
    pub body: Option<Bytes>,

    /// Why the fetch failed, if it did.
    pub error: Option<FetchError>,
}

impl RequestOutcome {
    /// Whether the exchange completed, whatever the status code.
    pub fn is_success(&self) -> bool {
        self.error.is_none()
    }

    /// The numeric status code, if response headers arrived.
    pub fn status_code(&self) -> Option<u16> {
        self.status.map(|status| status.as_u16())
    }

    /// The status line text, such as `200 OK`, or an empty string if no
    /// response arrived.
    pub fn status_text(&self) -> String {
        match self.status {
            Some(status) => match status.canonical_reason() {
                Some(reason) => format!("{} {}", status.as_str(), reason),
                None => status.as_str().to_owned(),
            },
            None => String::new(),
        }
    }

    /// The classification of the failure, if the fetch failed.
    pub fn error_kind(&self) -> Option<ErrorKind> {
        self.error.as_ref().map(FetchError::kind)
    }
}

impl fmt::Display for RequestOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.error {
            None => write!(
                f,
                "{} {} ({} bytes in {:?})",
                self.url,
                self.status_text(),
                self.bytes_read,
                self.elapsed
            ),
            Some(error) => write!(f, "{} failed [{}]: {}", self.url, error.kind(), error),
        }
    }
}
