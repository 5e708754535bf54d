use std::time::{Duration, Instant};

use tracing::trace;

use super::PoolableConnection;

#[derive(Debug)]
struct Idle<T> {
    at: Instant,
    inner: T,
}

impl<T> Idle<T> {
    fn new(inner: T) -> Self {
        Self {
            at: Instant::now(),
            inner,
        }
    }
}

/// Idle connections for a single pool key, most recently used last.
#[derive(Debug)]
pub(super) struct IdleConnections<T> {
    inner: Vec<Idle<T>>,
}

impl<T> Default for IdleConnections<T> {
    fn default() -> Self {
        Self { inner: Vec::new() }
    }
}

impl<T> IdleConnections<T> {
    pub(super) fn push(&mut self, inner: T) {
        self.inner.push(Idle::new(inner));
    }

    pub(super) fn len(&self) -> usize {
        self.inner.len()
    }

    pub(super) fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<T: PoolableConnection> IdleConnections<T> {
    /// Pop the most recently parked connection which is still open and has
    /// not outlived `idle_timeout`. Expired and closed entries are discarded.
    pub(super) fn pop(&mut self, idle_timeout: Option<Duration>) -> Option<T> {
        let expired = idle_timeout
            .filter(|timeout| !timeout.is_zero())
            .and_then(|timeout| Instant::now().checked_sub(timeout));

        let before = self.inner.len();
        self.inner.retain(|entry| {
            let fresh = expired.map_or(true, |expired| entry.at >= expired);
            fresh && entry.inner.is_open()
        });
        if self.inner.len() != before {
            trace!(discarded = before - self.inner.len(), "dropped stale idle connections");
        }

        self.inner.pop().map(|entry| entry.inner)
    }
}
