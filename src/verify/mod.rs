//! Timeout-composition verifier.
//!
//! A local [`MockServer`] with a delayed route and an immediate route, and
//! [`Scenarios`] which use it to check that the overall deadline applies to
//! each fetch independently. [`StaticResolver`] and [`CountingResolver`] make
//! address family and resolver behavior observable in tests.

mod resolver;
mod scenario;
mod server;

pub use self::resolver::{CountingResolver, StaticResolver};
pub use self::scenario::{Expectation, ScenarioResult, Scenarios};
pub use self::server::MockServer;
