//! Connection Pooling for Clients
//!
//! When a transport reuses connections, finished connections are parked here,
//! keyed by scheme and authority, until they are checked out again or sit idle
//! for longer than the idle timeout (the transport's keep-alive interval).
//!
//! A checked-out connection is wrapped in [`Pooled`]. Dropping a `Pooled`
//! closes the connection unless it was explicitly [released](Pooled::release),
//! which is only done once a response body has been fully consumed. Error and
//! timeout paths therefore never hand a half-used connection to the next
//! request.

use std::collections::HashMap;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::Mutex;
use tracing::trace;

mod idle;
mod key;

use self::idle::IdleConnections;
pub use self::key::{UriKey, UriKeyError};

/// Configuration for a connection pool.
#[derive(Debug, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub struct Config {
    /// The maximum idle duration of a connection.
    pub idle_timeout: Option<Duration>,

    /// The maximum number of idle connections per host.
    pub max_idle_per_host: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            idle_timeout: Some(Duration::from_secs(90)),
            max_idle_per_host: 32,
        }
    }
}

impl Config {
    /// A pool configuration with the given idle timeout and per-host bound.
    pub fn new(idle_timeout: Option<Duration>, max_idle_per_host: usize) -> Self {
        Self {
            idle_timeout,
            max_idle_per_host,
        }
    }
}

/// A connection which can be kept in a pool.
///
/// These connections must report to the pool whether they remain open,
/// and whether they can be shared / multiplexed.
pub trait PoolableConnection: Send + Sized + 'static {
    /// Returns `true` if the connection is open.
    fn is_open(&self) -> bool;

    /// Returns `true` if the connection can carry concurrent requests.
    fn can_share(&self) -> bool;

    /// Returns another handle to this connection when it can be shared.
    fn reuse(&mut self) -> Option<Self>;
}

/// A pool of idle connections to remote hosts.
#[derive(Debug)]
pub(crate) struct Pool<C: PoolableConnection> {
    inner: Arc<Mutex<PoolInner<C>>>,
}

impl<C: PoolableConnection> Clone for Pool<C> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<C: PoolableConnection> Pool<C> {
    pub(crate) fn new(config: Config) -> Self {
        Self {
            inner: Arc::new(Mutex::new(PoolInner {
                config,
                idle: HashMap::new(),
            })),
        }
    }

    /// Take an idle connection for `key`, if one is still open.
    #[cfg_attr(not(tarpaulin), tracing::instrument(skip_all, fields(%key), level = "trace"))]
    pub(crate) fn checkout(&self, key: &UriKey) -> Option<Pooled<C>> {
        let mut inner = self.inner.lock();
        let mut connection = inner.pop(key)?;

        // A multiplexed connection stays in the pool for other requests, so
        // this handle must not be returned again.
        let returnable = match connection.reuse() {
            Some(shared) => {
                inner.push(key.clone(), shared);
                false
            }
            None => true,
        };

        trace!(returnable, "connection found in pool");
        Some(Pooled {
            connection: Some(connection),
            key: key.clone(),
            pool: Some(Arc::downgrade(&self.inner)),
            is_reused: true,
            returnable,
            released: false,
        })
    }

    /// Wrap a freshly established connection so it can be returned to this
    /// pool once released.
    pub(crate) fn insert(&self, key: UriKey, mut connection: C) -> Pooled<C> {
        let returnable = match connection.reuse() {
            Some(shared) => {
                trace!(%key, "sharing new multiplexed connection");
                self.inner.lock().push(key.clone(), shared);
                false
            }
            None => true,
        };

        Pooled {
            connection: Some(connection),
            key,
            pool: Some(Arc::downgrade(&self.inner)),
            is_reused: false,
            returnable,
            released: false,
        }
    }

    /// Number of idle connections held for `key`.
    pub(crate) fn idle(&self, key: &UriKey) -> usize {
        self.inner.lock().idle.get(key).map_or(0, |idle| idle.len())
    }
}

struct PoolInner<C> {
    config: Config,
    idle: HashMap<UriKey, IdleConnections<C>>,
}

impl<C> fmt::Debug for PoolInner<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolInner")
            .field("config", &self.config)
            .field("hosts", &self.idle.len())
            .finish()
    }
}

impl<C: PoolableConnection> PoolInner<C> {
    fn push(&mut self, key: UriKey, connection: C) {
        let idle = self.idle.entry(key).or_default();
        if idle.len() >= self.config.max_idle_per_host {
            trace!("idle connection limit reached, closing connection");
            return;
        }
        idle.push(connection);
    }

    fn pop(&mut self, key: &UriKey) -> Option<C> {
        let idle = self.idle.get_mut(key)?;
        let connection = idle.pop(self.config.idle_timeout);
        if idle.is_empty() {
            trace!(%key, "removing empty idle list");
            self.idle.remove(key);
        }
        connection
    }
}

/// Wrapper type for a connection which is managed by a pool.
///
/// The underlying connection is available via `Deref` and `DerefMut`.
/// Dropping the wrapper closes the connection unless [`Pooled::release`]
/// was called.
pub struct Pooled<C: PoolableConnection> {
    connection: Option<C>,
    key: UriKey,
    pool: Option<Weak<Mutex<PoolInner<C>>>>,
    is_reused: bool,
    returnable: bool,
    released: bool,
}

impl<C: PoolableConnection> Pooled<C> {
    /// A connection which is closed when dropped, whatever happens.
    pub(crate) fn unpooled(key: UriKey, connection: C) -> Self {
        Self {
            connection: Some(connection),
            key,
            pool: None,
            is_reused: false,
            returnable: false,
            released: false,
        }
    }

    /// Whether this connection was taken from the pool rather than dialed.
    pub fn is_reused(&self) -> bool {
        self.is_reused
    }

    /// The pool key this connection belongs to.
    pub fn key(&self) -> &UriKey {
        &self.key
    }

    /// Mark the connection as finished with, allowing it to go back to the
    /// pool if it is still open.
    pub fn release(mut self) {
        self.released = true;
    }
}

impl<C: PoolableConnection> fmt::Debug for Pooled<C>
where
    C: fmt::Debug,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pooled")
            .field("connection", &self.connection)
            .field("key", &self.key)
            .field("is_reused", &self.is_reused)
            .finish()
    }
}

impl<C: PoolableConnection> Deref for Pooled<C> {
    type Target = C;

    fn deref(&self) -> &Self::Target {
        self.connection
            .as_ref()
            .expect("connection only taken on Drop")
    }
}

impl<C: PoolableConnection> DerefMut for Pooled<C> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection
            .as_mut()
            .expect("connection only taken on Drop")
    }
}

impl<C: PoolableConnection> Drop for Pooled<C> {
    fn drop(&mut self) {
        let Some(connection) = self.connection.take() else {
            return;
        };

        if !self.released {
            trace!(key = %self.key, "connection dropped before release, closing");
            return;
        }

        if !self.returnable || !connection.is_open() {
            return;
        }

        if let Some(pool) = self.pool.as_ref().and_then(Weak::upgrade) {
            trace!(key = %self.key, "returning connection to pool");
            pool.lock().push(self.key.clone(), connection);
        }
    }
}

#[cfg(test)]
pub(crate) mod mock {
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    use super::PoolableConnection;

    /// A stand-in connection whose open state can be flipped from a test.
    #[derive(Debug, Clone)]
    pub(crate) struct MockConnection {
        open: Arc<AtomicBool>,
        shared: bool,
    }

    impl MockConnection {
        pub(crate) fn single() -> Self {
            Self {
                open: Arc::new(AtomicBool::new(true)),
                shared: false,
            }
        }

        pub(crate) fn shared() -> Self {
            Self {
                open: Arc::new(AtomicBool::new(true)),
                shared: true,
            }
        }

        pub(crate) fn close(&self) {
            self.open.store(false, Ordering::SeqCst);
        }
    }

    impl PoolableConnection for MockConnection {
        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }

        fn can_share(&self) -> bool {
            self.shared
        }

        fn reuse(&mut self) -> Option<Self> {
            self.shared.then(|| self.clone())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MockConnection;
    use super::*;

    fn key() -> UriKey {
        "http://localhost:8080".parse().unwrap()
    }

    #[test]
    fn released_connection_returns_to_pool() {
        let pool = Pool::new(Config::default());

        let conn = pool.insert(key(), MockConnection::single());
        assert!(!conn.is_reused());
        assert_eq!(pool.idle(&key()), 0);

        conn.release();
        assert_eq!(pool.idle(&key()), 1);

        let conn = pool.checkout(&key()).expect("pooled connection");
        assert!(conn.is_reused());
        assert_eq!(pool.idle(&key()), 0);
    }

    #[test]
    fn dropped_connection_is_not_returned() {
        let pool = Pool::new(Config::default());

        let conn = pool.insert(key(), MockConnection::single());
        drop(conn);
        assert_eq!(pool.idle(&key()), 0);
        assert!(pool.checkout(&key()).is_none());
    }

    #[test]
    fn closed_connection_is_not_returned() {
        let pool = Pool::new(Config::default());

        let conn = pool.insert(key(), MockConnection::single());
        conn.close();
        conn.release();
        assert_eq!(pool.idle(&key()), 0);
    }

    #[test]
    fn unpooled_connection_never_returns() {
        let pool: Pool<MockConnection> = Pool::new(Config::default());
        let conn = Pooled::unpooled(key(), MockConnection::single());
        conn.release();
        assert_eq!(pool.idle(&key()), 0);
    }

    #[test]
    fn shared_connection_stays_available() {
        let pool = Pool::new(Config::default());

        let first = pool.insert(key(), MockConnection::shared());
        assert_eq!(pool.idle(&key()), 1);

        let second = pool.checkout(&key()).expect("shared connection");
        assert!(second.is_reused());
        assert_eq!(pool.idle(&key()), 1);

        first.release();
        second.release();
        assert_eq!(pool.idle(&key()), 1);
    }

    #[test]
    fn idle_limit_per_host() {
        let pool = Pool::new(Config::new(None, 1));

        let a = pool.insert(key(), MockConnection::single());
        let b = pool.insert(key(), MockConnection::single());
        a.release();
        b.release();
        assert_eq!(pool.idle(&key()), 1);
    }

    #[test]
    fn pool_keys_are_separate() {
        let pool = Pool::new(Config::default());
        pool.insert(key(), MockConnection::single()).release();

        let other: UriKey = "http://localhost:9090".parse().unwrap();
        assert!(pool.checkout(&other).is_none());
        assert!(pool.checkout(&key()).is_some());
    }
}
