//! DNS resolution strategies.
//!
//! Resolvers are [`tower::Service`]s from a host name to an ordered list of
//! socket addresses. The [`ResolverStrategy`] decides, per dial, whether a
//! lookup may be answered from the [`CachingResolver`] or must go to the
//! underlying resolver afresh.

use std::collections::HashMap;
use std::fmt;
use std::io;
use std::net::{IpAddr, SocketAddr, ToSocketAddrs};
use std::pin::Pin;
use std::sync::Arc;
use std::task::{ready, Context, Poll};
use std::time::{Duration, Instant};

use futures_util::future::BoxFuture;
use futures_util::Future;
use parking_lot::Mutex;
use pin_project::{pin_project, pinned_drop};
use thiserror::Error;
use tokio::task::JoinHandle;
use tower::ServiceExt as _;

/// The address family a dial is restricted to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Network {
    /// Any address family.
    Tcp,

    /// IPv4 addresses only.
    Tcp4,

    /// IPv6 addresses only.
    Tcp6,
}

impl Network {
    /// Whether an address belongs to this network.
    pub fn allows(&self, addr: &SocketAddr) -> bool {
        match self {
            Network::Tcp => true,
            Network::Tcp4 => addr.is_ipv4(),
            Network::Tcp6 => addr.is_ipv6(),
        }
    }
}

impl fmt::Display for Network {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Network::Tcp => f.write_str("tcp"),
            Network::Tcp4 => f.write_str("tcp4"),
            Network::Tcp6 => f.write_str("tcp6"),
        }
    }
}

/// An ordered list of resolved socket addresses.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SocketAddrs(Vec<SocketAddr>);

impl SocketAddrs {
    /// Set the port on every address.
    pub fn set_port(&mut self, port: u16) {
        for addr in &mut self.0 {
            addr.set_port(port);
        }
    }

    /// Keep only the addresses which belong to `network`, preserving order.
    pub fn retain_network(&mut self, network: Network) {
        self.0.retain(|addr| network.allows(addr));
    }

    /// The first address, if any.
    pub fn first(&self) -> Option<SocketAddr> {
        self.0.first().copied()
    }

    /// Number of addresses.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Whether there are no addresses.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Iterate over the addresses in order.
    pub fn iter(&self) -> std::slice::Iter<'_, SocketAddr> {
        self.0.iter()
    }
}

impl FromIterator<SocketAddr> for SocketAddrs {
    fn from_iter<T: IntoIterator<Item = SocketAddr>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for SocketAddrs {
    type Item = SocketAddr;
    type IntoIter = std::vec::IntoIter<SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a SocketAddrs {
    type Item = &'a SocketAddr;
    type IntoIter = std::slice::Iter<'a, SocketAddr>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}

/// Error returned when a host name can't be turned into a usable address.
#[derive(Debug, Error)]
pub enum ResolveError {
    /// The lookup itself failed.
    #[error("lookup {host}: {source}")]
    Lookup {
        /// The host being resolved.
        host: Box<str>,
        /// The underlying resolver error.
        #[source]
        source: io::Error,
    },

    /// The lookup succeeded but produced no address.
    #[error("lookup {host}: no addresses found")]
    NoAddresses {
        /// The host being resolved.
        host: Box<str>,
    },

    /// The lookup produced addresses, but none of the requested family.
    #[error("lookup {host}: no {network} address found")]
    NoUsableAddress {
        /// The host being resolved.
        host: Box<str>,
        /// The network the dial was restricted to.
        network: Network,
    },
}

/// Anything which can resolve a host name to socket addresses.
///
/// Implemented for every cloneable [`tower::Service`] from `Box<str>` to
/// [`SocketAddrs`], so custom resolvers only need to be services.
pub trait Resolve: Clone + Send + Sync + 'static {
    /// Resolve `host`. Ports in the answer are ignored by the dialer.
    fn resolve(&self, host: Box<str>) -> BoxFuture<'static, Result<SocketAddrs, io::Error>>;
}

impl<S> Resolve for S
where
    S: tower::Service<Box<str>, Response = SocketAddrs, Error = io::Error>
        + Clone
        + Send
        + Sync
        + 'static,
    S::Future: Send + 'static,
{
    fn resolve(&self, host: Box<str>) -> BoxFuture<'static, Result<SocketAddrs, io::Error>> {
        Box::pin(self.clone().oneshot(host))
    }
}

/// GetAddrInfo based resolver.
///
/// This resolver uses the `getaddrinfo` system call to resolve
/// hostnames to IP addresses via the operating system.
#[derive(Debug, Default, Clone)]
pub struct GaiResolver {
    _priv: (),
}

impl GaiResolver {
    /// Create a new `GaiResolver`.
    pub fn new() -> Self {
        Self { _priv: () }
    }
}

impl tower::Service<Box<str>> for GaiResolver {
    type Response = SocketAddrs;
    type Error = io::Error;
    type Future = GaiFuture;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, host: Box<str>) -> Self::Future {
        let span = tracing::Span::current();
        GaiFuture {
            handle: tokio::task::spawn_blocking(move || {
                tracing::trace_span!(parent: &span, "getaddrinfo").in_scope(|| {
                    tracing::trace!(%host, "dns resolution starting");
                    (host.as_ref(), 0)
                        .to_socket_addrs()
                        .map(SocketAddrs::from_iter)
                })
            }),
        }
    }
}

/// Future returned by [`GaiResolver`] while `getaddrinfo` runs on a
/// blocking worker. Dropping it aborts the lookup.
#[pin_project(PinnedDrop)]
pub struct GaiFuture {
    #[pin]
    handle: JoinHandle<Result<SocketAddrs, io::Error>>,
}

impl fmt::Debug for GaiFuture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GaiFuture").finish()
    }
}

impl Future for GaiFuture {
    type Output = Result<SocketAddrs, io::Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match ready!(self.project().handle.poll(cx)) {
            Ok(Ok(addrs)) => Poll::Ready(Ok(addrs)),
            Ok(Err(error)) => Poll::Ready(Err(error)),
            Err(join_err) => {
                if join_err.is_cancelled() {
                    Poll::Ready(Err(io::Error::new(io::ErrorKind::Interrupted, join_err)))
                } else {
                    Poll::Ready(Err(io::Error::other(join_err)))
                }
            }
        }
    }
}

#[pinned_drop]
impl PinnedDrop for GaiFuture {
    fn drop(self: Pin<&mut Self>) {
        self.handle.abort()
    }
}

#[derive(Debug)]
struct CacheEntry {
    at: Instant,
    addrs: SocketAddrs,
}

/// A resolver which remembers answers for a fixed time to live.
///
/// Clones share the same cache. Failed lookups are not cached.
#[derive(Debug, Clone)]
pub struct CachingResolver<R> {
    inner: R,
    ttl: Duration,
    cache: Arc<Mutex<HashMap<Box<str>, CacheEntry>>>,
}

impl<R> CachingResolver<R> {
    /// Wrap `inner`, keeping answers for `ttl`.
    pub fn new(inner: R, ttl: Duration) -> Self {
        Self {
            inner,
            ttl,
            cache: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Drop every cached answer.
    pub fn clear(&self) {
        self.cache.lock().clear();
    }

    fn cached(&self, host: &str) -> Option<SocketAddrs> {
        let mut cache = self.cache.lock();
        let fresh = cache
            .get(host)
            .map(|entry| entry.at.elapsed() < self.ttl)?;
        if fresh {
            cache.get(host).map(|entry| entry.addrs.clone())
        } else {
            tracing::trace!(%host, "cached dns answer expired");
            cache.remove(host);
            None
        }
    }
}

impl<R: Resolve> CachingResolver<R> {
    /// Resolve `host`, answering from the cache when possible.
    pub async fn lookup(&self, host: &str) -> Result<SocketAddrs, io::Error> {
        if let Some(addrs) = self.cached(host) {
            tracing::trace!(%host, "dns answer served from cache");
            return Ok(addrs);
        }

        let addrs = self.inner.resolve(host.into()).await?;
        if !addrs.is_empty() && !self.ttl.is_zero() {
            self.cache.lock().insert(
                host.into(),
                CacheEntry {
                    at: Instant::now(),
                    addrs: addrs.clone(),
                },
            );
        }
        Ok(addrs)
    }
}

/// Decides how each dial turns a host name into addresses.
#[derive(Debug, Clone)]
pub enum ResolverStrategy<R> {
    /// Answers may be reused across dials.
    Cached(CachingResolver<R>),

    /// Every dial performs its own lookup.
    Fresh(R),
}

impl<R: Resolve> ResolverStrategy<R> {
    /// Build the strategy for a resolver.
    ///
    /// `bypass_cache` selects [`ResolverStrategy::Fresh`], otherwise answers are
    /// cached for `ttl`.
    pub fn new(resolver: R, bypass_cache: bool, ttl: Duration) -> Self {
        if bypass_cache {
            ResolverStrategy::Fresh(resolver)
        } else {
            ResolverStrategy::Cached(CachingResolver::new(resolver, ttl))
        }
    }

    /// Whether every dial performs its own lookup.
    pub fn is_fresh(&self) -> bool {
        matches!(self, ResolverStrategy::Fresh(_))
    }

    /// Resolve `host` to a non-empty, ordered address list.
    ///
    /// IP literals are returned as-is without consulting any resolver.
    pub async fn resolve(&self, host: &str) -> Result<SocketAddrs, ResolveError> {
        if let Ok(ip) = host.parse::<IpAddr>() {
            return Ok(SocketAddrs::from_iter([SocketAddr::new(ip, 0)]));
        }

        let result = match self {
            ResolverStrategy::Cached(resolver) => resolver.lookup(host).await,
            ResolverStrategy::Fresh(resolver) => {
                tracing::trace!(%host, "fresh dns lookup");
                resolver.resolve(host.into()).await
            }
        };

        let addrs = result.map_err(|source| ResolveError::Lookup {
            host: host.into(),
            source,
        })?;

        if addrs.is_empty() {
            return Err(ResolveError::NoAddresses { host: host.into() });
        }

        Ok(addrs)
    }
}

#[cfg(test)]
mod tests {
    use std::future::Ready;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[derive(Debug, Clone)]
    struct Counting {
        addrs: Vec<SocketAddr>,
        calls: Arc<AtomicUsize>,
    }

    impl Counting {
        fn new(addrs: Vec<SocketAddr>) -> Self {
            Self {
                addrs,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl tower::Service<Box<str>> for Counting {
        type Response = SocketAddrs;
        type Error = io::Error;
        type Future = Ready<Result<SocketAddrs, io::Error>>;

        fn poll_ready(&mut self, _: &mut Context<'_>) -> Poll<Result<(), io::Error>> {
            Poll::Ready(Ok(()))
        }

        fn call(&mut self, _host: Box<str>) -> Self::Future {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::ready(Ok(self.addrs.iter().copied().collect()))
        }
    }

    fn dual_stack() -> Vec<SocketAddr> {
        vec![
            SocketAddr::new(Ipv6Addr::LOCALHOST.into(), 0),
            SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 0),
        ]
    }

    #[test]
    fn socket_addrs_filtering() {
        let mut addrs = SocketAddrs::from_iter(dual_stack());
        addrs.set_port(8080);
        assert!(addrs.iter().all(|addr| addr.port() == 8080));

        addrs.retain_network(Network::Tcp4);
        assert_eq!(addrs.len(), 1);
        assert_eq!(
            addrs.first(),
            Some(SocketAddr::new(Ipv4Addr::LOCALHOST.into(), 8080))
        );

        addrs.retain_network(Network::Tcp6);
        assert!(addrs.is_empty());
    }

    #[tokio::test]
    async fn fresh_strategy_resolves_every_time() {
        let resolver = Counting::new(dual_stack());
        let strategy = ResolverStrategy::new(resolver.clone(), true, Duration::from_secs(30));
        assert!(strategy.is_fresh());

        for _ in 0..3 {
            let addrs = strategy.resolve("example.test").await.unwrap();
            assert_eq!(addrs.len(), 2);
        }
        assert_eq!(resolver.calls(), 3);
    }

    #[tokio::test]
    async fn cached_strategy_reuses_answers() {
        let resolver = Counting::new(dual_stack());
        let strategy = ResolverStrategy::new(resolver.clone(), false, Duration::from_secs(30));
        assert!(!strategy.is_fresh());

        for _ in 0..3 {
            strategy.resolve("example.test").await.unwrap();
        }
        assert_eq!(resolver.calls(), 1);

        strategy.resolve("other.test").await.unwrap();
        assert_eq!(resolver.calls(), 2);
    }

    #[tokio::test]
    async fn cached_answers_expire() {
        let resolver = Counting::new(dual_stack());
        let caching = CachingResolver::new(resolver.clone(), Duration::from_millis(5));

        caching.lookup("example.test").await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        caching.lookup("example.test").await.unwrap();
        assert_eq!(resolver.calls(), 2);

        caching.clear();
        caching.lookup("example.test").await.unwrap();
        assert_eq!(resolver.calls(), 3);
    }

    #[tokio::test]
    async fn empty_answer_is_an_error() {
        let strategy = ResolverStrategy::new(Counting::new(vec![]), true, Duration::ZERO);
        let err = strategy.resolve("nowhere.test").await.unwrap_err();
        assert!(matches!(err, ResolveError::NoAddresses { .. }));
        assert_eq!(err.to_string(), "lookup nowhere.test: no addresses found");
    }

    #[tokio::test]
    async fn ip_literals_skip_the_resolver() {
        let resolver = Counting::new(dual_stack());
        let strategy = ResolverStrategy::new(resolver.clone(), true, Duration::ZERO);

        let addrs = strategy.resolve("127.0.0.1").await.unwrap();
        assert_eq!(addrs.first().unwrap().ip(), IpAddr::V4(Ipv4Addr::LOCALHOST));

        let addrs = strategy.resolve("::1").await.unwrap();
        assert!(addrs.first().unwrap().is_ipv6());
        assert_eq!(resolver.calls(), 0);
    }

    #[tokio::test]
    async fn gai_resolves_localhost() {
        let resolver = GaiResolver::new();
        let addrs = resolver.resolve("localhost".into()).await.unwrap();
        assert!(addrs.iter().any(|addr| addr.ip().is_loopback()));
    }
}
