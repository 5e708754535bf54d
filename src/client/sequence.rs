//! Running a series of fetches against one URL.

use std::time::Duration;

use tracing::{debug, info, warn};

use super::{Client, RequestOutcome};
use crate::client::conn::Resolve;

/// Receives the outcome of each fetch in a [`Sequence`].
pub trait Reporter {
    /// Called before fetch number `index` (counting from zero) starts.
    fn starting(&mut self, index: usize, url: &str) {
        let _ = (index, url);
    }

    /// Called with the outcome of fetch number `index`.
    fn report(&mut self, index: usize, outcome: RequestOutcome);
}

impl<R: Reporter + ?Sized> Reporter for &mut R {
    fn starting(&mut self, index: usize, url: &str) {
        (**self).starting(index, url)
    }

    fn report(&mut self, index: usize, outcome: RequestOutcome) {
        (**self).report(index, outcome)
    }
}

/// Collects every outcome.
impl Reporter for Vec<RequestOutcome> {
    fn report(&mut self, _index: usize, outcome: RequestOutcome) {
        self.push(outcome);
    }
}

/// Logs each outcome as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingReporter;

impl Reporter for TracingReporter {
    fn starting(&mut self, index: usize, url: &str) {
        debug!(attempt = index + 1, %url, "fetching");
    }

    fn report(&mut self, index: usize, outcome: RequestOutcome) {
        match &outcome.error {
            None => info!(
                attempt = index + 1,
                status = %outcome.status_text(),
                bytes = outcome.bytes_read,
                elapsed = ?outcome.elapsed,
                reused = outcome.reused,
                "fetch complete"
            ),
            Some(error) => warn!(
                attempt = index + 1,
                kind = %error.kind(),
                %error,
                elapsed = ?outcome.elapsed,
                "fetch failed"
            ),
        }
    }
}

/// Totals for a finished [`Sequence`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SequenceSummary {
    /// Number of fetches made.
    pub attempts: usize,

    /// Fetches which completed.
    pub succeeded: usize,

    /// Fetches which failed.
    pub failed: usize,
}

impl SequenceSummary {
    /// Whether at least one fetch was made and none of them completed.
    pub fn all_failed(&self) -> bool {
        self.attempts > 0 && self.succeeded == 0
    }
}

/// Issues `count` sequential fetches with `pause` between them.
///
/// Every fetch gets the client's full overall timeout, and a failed fetch
/// never stops the sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Sequence {
    /// Number of fetches to make.
    pub count: usize,

    /// Pause between one fetch finishing and the next starting.
    pub pause: Duration,
}

impl Default for Sequence {
    fn default() -> Self {
        Self {
            count: 1,
            pause: Duration::from_secs(1),
        }
    }
}

impl Sequence {
    /// A sequence of `count` fetches separated by `pause`.
    pub fn new(count: usize, pause: Duration) -> Self {
        Self { count, pause }
    }

    /// Run the sequence, handing each outcome to `reporter`.
    pub async fn run<R, P>(&self, client: &Client<R>, url: &str, mut reporter: P) -> SequenceSummary
    where
        R: Resolve,
        P: Reporter,
    {
        let mut summary = SequenceSummary::default();

        for index in 0..self.count {
            if index > 0 && !self.pause.is_zero() {
                tokio::time::sleep(self.pause).await;
            }

            reporter.starting(index, url);
            let outcome = client.fetch(url).await;

            summary.attempts += 1;
            if outcome.is_success() {
                summary.succeeded += 1;
            } else {
                summary.failed += 1;
            }
            reporter.report(index, outcome);
        }

        debug!(
            attempts = summary.attempts,
            succeeded = summary.succeeded,
            failed = summary.failed,
            "sequence finished"
        );
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::client::ClientConfig;

    #[test]
    fn summary_all_failed() {
        let summary = SequenceSummary {
            attempts: 2,
            succeeded: 0,
            failed: 2,
        };
        assert!(summary.all_failed());

        let summary = SequenceSummary {
            attempts: 2,
            succeeded: 1,
            failed: 1,
        };
        assert!(!summary.all_failed());
        assert!(!SequenceSummary::default().all_failed());
    }

    #[tokio::test]
    async fn every_attempt_is_made_when_all_fail() {
        let client = Client::new(ClientConfig::default());
        let mut outcomes = Vec::new();

        let summary = Sequence::new(3, Duration::ZERO)
            .run(&client, "not a url", &mut outcomes)
            .await;

        assert_eq!(summary.attempts, 3);
        assert_eq!(summary.failed, 3);
        assert_eq!(outcomes.len(), 3);
    }
}
