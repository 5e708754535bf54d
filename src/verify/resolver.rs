use std::future::Ready;
use std::io;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};

use futures_util::future::BoxFuture;

use crate::client::conn::{Resolve, SocketAddrs};

/// Resolves every host to the same fixed list of addresses.
#[derive(Debug, Clone)]
pub struct StaticResolver {
    addrs: Arc<[SocketAddr]>,
}

impl StaticResolver {
    /// A resolver answering with `addrs`, in order.
    pub fn new(addrs: impl IntoIterator<Item = SocketAddr>) -> Self {
        Self {
            addrs: addrs.into_iter().collect(),
        }
    }
}

impl tower::Service<Box<str>> for StaticResolver {
    type Response = SocketAddrs;
    type Error = io::Error;
    type Future = Ready<Result<SocketAddrs, io::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, host: Box<str>) -> Self::Future {
        tracing::trace!(%host, "static lookup");
        std::future::ready(Ok(self.addrs.iter().copied().collect()))
    }
}

/// Counts how often the wrapped resolver is asked for an address.
#[derive(Debug, Clone)]
pub struct CountingResolver<R> {
    inner: R,
    calls: Arc<AtomicUsize>,
}

impl<R> CountingResolver<R> {
    /// Wrap `inner`.
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Number of lookups so far, across all clones.
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl<R: Resolve> tower::Service<Box<str>> for CountingResolver<R> {
    type Response = SocketAddrs;
    type Error = io::Error;
    type Future = BoxFuture<'static, Result<SocketAddrs, io::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, host: Box<str>) -> Self::Future {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.resolve(host)
    }
}
