//! Capability test orchestration
//!
//! A [`TestRegistry`] pairs the declared definitions with the test
//! implementations compiled into the binary, the registry's selection
//! methods pick the tests that apply to one compositor, and the
//! [`TestExecutor`] runs each of them against freshly resolved fixtures.

mod config;
mod registry;
mod report;
mod runner;

use async_trait::async_trait;

use crate::common::Result;
use crate::fixtures::FixtureScope;

pub use config::{DefinitionsFile, TestDefinitionConfig};
pub use registry::{Selection, TestDefinition, TestRegistry};
pub use report::{format_table, OutcomeStatus, Report, TestOutcome};
pub use runner::TestExecutor;

/// Static description of a test implementation
#[derive(Debug, Clone)]
pub struct TestInfo {
    /// Identifier the definitions file refers to, e.g. `"wlroots.mouse_click"`
    pub id: &'static str,
    /// Fixture names injected into the body
    pub fixtures: &'static [&'static str],
}

/// A test implementation
#[async_trait]
pub trait CapabilityTest: Send + Sync {
    /// Get test metadata
    fn info(&self) -> &TestInfo;

    /// Run the test body against its fixtures
    ///
    /// Return `Error::TestAssertion` (or panic) when the capability does
    /// not behave, and `Error::Skipped` when the environment cannot run
    /// the test at all.
    async fn run(&self, fixtures: &mut FixtureScope) -> Result<()>;
}
