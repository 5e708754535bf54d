use std::fmt;
use std::io;
use std::time::Duration;

use tracing::info;

use super::MockServer;
use crate::client::{Client, ClientConfig, ErrorKind, RequestOutcome};
use crate::duration;

/// What a scenario expects of its fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expectation {
    /// The fetch completes with `200 OK`.
    Success,

    /// The fetch fails because the overall deadline elapsed.
    OverallTimeout,
}

impl fmt::Display for Expectation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expectation::Success => f.write_str("success"),
            Expectation::OverallTimeout => f.write_str("overall timeout"),
        }
    }
}

/// A single scenario's fetch and whether it met its expectation.
#[derive(Debug)]
pub struct ScenarioResult {
    /// Short description of the scenario.
    pub name: String,

    /// The expected result.
    pub expected: Expectation,

    /// What actually happened.
    pub outcome: RequestOutcome,
}

impl ScenarioResult {
    /// Whether the outcome met the expectation.
    pub fn passed(&self) -> bool {
        match self.expected {
            Expectation::Success => {
                self.outcome.is_success() && self.outcome.status == Some(http::StatusCode::OK)
            }
            Expectation::OverallTimeout => {
                self.outcome.error_kind() == Some(ErrorKind::OverallTimeout)
            }
        }
    }
}

impl fmt::Display for ScenarioResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = if self.passed() { "PASS" } else { "FAIL" };
        write!(
            f,
            "[{verdict}] {} (expected {}): {}",
            self.name, self.expected, self.outcome
        )
    }
}

/// The three canonical timeout-composition checks.
///
/// With one client whose overall timeout is `overall_timeout`:
///
/// 1. a slow request delayed by `slow_delay` (longer than the timeout) fails
///    with an overall timeout,
/// 2. a fast request right after it succeeds, so the late first call did not
///    eat into the second call's budget,
/// 3. a slow request delayed by `short_delay` (shorter than the timeout)
///    succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scenarios {
    /// The client's overall timeout.
    pub overall_timeout: Duration,

    /// Delay of the request expected to time out.
    pub slow_delay: Duration,

    /// Delay of the request expected to finish in time.
    pub short_delay: Duration,

    /// Pause after the timed-out request before the next one.
    pub settle: Duration,
}

impl Default for Scenarios {
    fn default() -> Self {
        Self {
            overall_timeout: Duration::from_secs(2),
            slow_delay: Duration::from_secs(3),
            short_delay: Duration::from_secs(1),
            settle: Duration::from_millis(100),
        }
    }
}

impl Scenarios {
    /// Start a [`MockServer`] and run the scenarios against it.
    pub async fn run_local(&self) -> io::Result<Vec<ScenarioResult>> {
        let server = MockServer::start().await?;
        Ok(self.run(&server).await)
    }

    /// Run the scenarios against `server`, in order, with a single client.
    pub async fn run(&self, server: &MockServer) -> Vec<ScenarioResult> {
        let client = Client::new(ClientConfig {
            overall_timeout: self.overall_timeout,
            ..Default::default()
        });
        info!(
            timeout = %duration::Display(self.overall_timeout),
            "running timeout scenarios"
        );

        let mut results = Vec::with_capacity(3);

        let outcome = client.fetch(&server.slow_url(self.slow_delay)).await;
        results.push(ScenarioResult {
            name: format!(
                "slow request ({}) exceeding the timeout",
                duration::Display(self.slow_delay)
            ),
            expected: Expectation::OverallTimeout,
            outcome,
        });

        if !self.settle.is_zero() {
            tokio::time::sleep(self.settle).await;
        }

        let outcome = client.fetch(&server.fast_url()).await;
        results.push(ScenarioResult {
            name: "fast request after a timed-out one".into(),
            expected: Expectation::Success,
            outcome,
        });

        let outcome = client.fetch(&server.slow_url(self.short_delay)).await;
        results.push(ScenarioResult {
            name: format!(
                "slow request ({}) within the timeout",
                duration::Display(self.short_delay)
            ),
            expected: Expectation::Success,
            outcome,
        });

        for result in &results {
            info!(passed = result.passed(), "{}", result.name);
        }
        results
    }
}
