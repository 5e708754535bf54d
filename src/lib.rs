//! Hyperpath
//!
//! An HTTP fetch client for when the network path of a request matters: which
//! address family is dialed, whether DNS answers are cached, whether connections
//! are pooled, which protocol is negotiated, and how the connect-phase timeout
//! nests inside the whole-exchange deadline.
//!
//! The usual entry point is [`Client`], configured by a [`ClientConfig`]:
//!
//! ```no_run
//! # use std::time::Duration;
//! # use hyperpath::client::{Client, ClientConfig};
//! # async fn run() {
//! let mut config = ClientConfig::default();
//! config.overall_timeout = Duration::from_secs(2);
//! config.transport.force_ipv4 = true;
//!
//! let client = Client::new(config);
//! let outcome = client.fetch("http://example.com/").await;
//! println!("{}", outcome.status_text());
//! # }
//! ```

#![cfg_attr(docsrs, feature(doc_auto_cfg))]

pub mod bridge;
pub mod client;
pub use client::{Client, ClientConfig, RequestOutcome};
pub mod duration;
pub mod info;
pub mod verify;

/// Boxed error type used where a source error is type-erased.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;
