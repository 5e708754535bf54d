use std::{fmt, str::FromStr};

use http::uri::{Authority, Scheme};
use thiserror::Error;

/// Pool key which is used to identify a connection - using scheme
/// and authority.
#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct UriKey(Scheme, Authority);

/// The URI can't be used as a pool key.
#[derive(Debug, Error)]
pub enum UriKeyError {
    /// The connection string could not be parsed.
    #[error("invalid uri: {0}")]
    InvalidUri(#[from] http::uri::InvalidUri),

    /// The URI has no scheme or no authority.
    #[error("uri {0} is not absolute")]
    NotAbsolute(http::Uri),
}

impl UriKey {
    /// The key for an absolute URI.
    pub fn from_uri(uri: &http::Uri) -> Result<Self, UriKeyError> {
        match (uri.scheme(), uri.authority()) {
            (Some(scheme), Some(authority)) => Ok(Self(scheme.clone(), authority.clone())),
            _ => Err(UriKeyError::NotAbsolute(uri.clone())),
        }
    }

    /// The scheme part of the key.
    pub fn scheme(&self) -> &Scheme {
        &self.0
    }

    /// The authority part of the key.
    pub fn authority(&self) -> &Authority {
        &self.1
    }
}

impl fmt::Display for UriKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://{}", self.0, self.1)
    }
}

impl FromStr for UriKey {
    type Err = UriKeyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let uri = http::Uri::from_str(s)?;
        Self::from_uri(&uri)
    }
}
