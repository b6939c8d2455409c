//! Test executor
//!
//! Runs the selected definitions one after another against a shared
//! compositor session. Every test gets freshly resolved fixtures, and the
//! fixtures are torn down before the next test starts, whatever the body
//! did.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures_util::FutureExt;

use crate::common::{Error, ErrorClass};
use crate::fixtures::{CompositorSession, FixtureRegistry};

use super::registry::TestDefinition;
use super::report::{OutcomeStatus, Report, TestOutcome};

/// Drives tests sequentially against one compositor session
pub struct TestExecutor {
    fixtures: Arc<FixtureRegistry>,
    session: Arc<CompositorSession>,
    timeout: Option<Duration>,
}

impl TestExecutor {
    pub fn new(fixtures: Arc<FixtureRegistry>, session: Arc<CompositorSession>) -> Self {
        Self {
            fixtures,
            session,
            timeout: None,
        }
    }

    /// Abort a test body that runs longer than `timeout`
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn session(&self) -> &Arc<CompositorSession> {
        &self.session
    }

    /// Run `tests` in order and collect their outcomes
    pub async fn run(&self, tests: &[&TestDefinition]) -> Report {
        self.run_with_progress(tests, |_| {}).await
    }

    /// Like [`run`](Self::run), calling `progress` after each test
    pub async fn run_with_progress<F>(&self, tests: &[&TestDefinition], mut progress: F) -> Report
    where
        F: FnMut(&TestOutcome),
    {
        let mut report = Report::default();
        for definition in tests {
            let outcome = self.run_one(definition).await;
            progress(&outcome);
            report.push(outcome);
        }
        report
    }

    /// Resolve fixtures, run the body, tear down and classify
    pub async fn run_one(&self, definition: &TestDefinition) -> TestOutcome {
        let started = Instant::now();
        let info = definition.test.info();
        tracing::info!("Running {} (fixtures: {:?})", definition.id, info.fixtures);

        let mut scope = match self
            .fixtures
            .resolve(info.fixtures, Arc::clone(&self.session))
            .await
        {
            Ok(scope) => scope,
            Err(e) => {
                tracing::info!("{}: fixtures unavailable: {}", definition.id, e);
                return TestOutcome::new(
                    &definition.id,
                    OutcomeStatus::InfrastructureError,
                    Some(format!("fixture setup failed: {}", e)),
                )
                .with_elapsed(started.elapsed());
            }
        };

        let body = AssertUnwindSafe(definition.test.run(&mut scope)).catch_unwind();
        let finished = match self.timeout {
            Some(limit) => tokio::time::timeout(limit, body).await.ok(),
            None => Some(body.await),
        };

        scope.teardown().await;

        let (status, detail) = match finished {
            None => (OutcomeStatus::InfrastructureError, Some("timeout".to_string())),
            Some(Err(payload)) => (
                OutcomeStatus::Failed,
                Some(format!("panicked: {}", panic_message(payload.as_ref()))),
            ),
            Some(Ok(Ok(()))) => (OutcomeStatus::Passed, None),
            Some(Ok(Err(e))) => classify(e),
        };

        let outcome = TestOutcome::new(&definition.id, status, detail).with_elapsed(started.elapsed());
        match &outcome.detail {
            Some(detail) => tracing::info!("{}: {} ({})", outcome.id, status.label(), detail),
            None => tracing::info!("{}: {}", outcome.id, status.label()),
        }
        outcome
    }
}

fn classify(error: Error) -> (OutcomeStatus, Option<String>) {
    match (error.class(), error) {
        (_, Error::Skipped(reason)) => (OutcomeStatus::Skipped, Some(reason)),
        (ErrorClass::Assertion, e) => (OutcomeStatus::Failed, Some(e.to_string())),
        (_, e) => (OutcomeStatus::InfrastructureError, Some(e.to_string())),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::config::Config;
    use crate::common::Result;
    use crate::fixtures::{Fixture, FixtureFactory, FixtureScope, FixtureSpec};
    use crate::testing::{CapabilityTest, TestInfo};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    type Journal = Arc<Mutex<Vec<String>>>;

    struct Counter {
        name: &'static str,
        journal: Journal,
    }

    #[async_trait]
    impl FixtureFactory for Counter {
        async fn create(&self, _scope: &mut FixtureScope) -> Result<Fixture> {
            self.journal.lock().unwrap().push(format!("create {}", self.name));
            Ok(Fixture::Value(Box::new(0usize)))
        }

        async fn teardown(&self, _fixture: Fixture, _scope: &mut FixtureScope) -> Result<()> {
            self.journal.lock().unwrap().push(format!("teardown {}", self.name));
            Ok(())
        }
    }

    enum Behaviour {
        Pass,
        Assert,
        Panic,
        Skip,
        Protocol,
        Hang,
    }

    struct Scripted {
        info: TestInfo,
        behaviour: Behaviour,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl CapabilityTest for Scripted {
        fn info(&self) -> &TestInfo {
            &self.info
        }

        async fn run(&self, fixtures: &mut FixtureScope) -> Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            assert_eq!(*fixtures.value::<usize>("client")?, 0);
            match self.behaviour {
                Behaviour::Pass => Ok(()),
                Behaviour::Assert => Err(Error::TestAssertion("expected 3 motion events".into())),
                Behaviour::Panic => panic!("left != right"),
                Behaviour::Skip => Err(Error::Skipped("no seat".into())),
                Behaviour::Protocol => Err(Error::UnknownObject(42)),
                Behaviour::Hang => {
                    tokio::time::sleep(Duration::from_secs(30)).await;
                    Ok(())
                }
            }
        }
    }

    fn definition(id: &'static str, fixtures: &'static [&'static str], behaviour: Behaviour) -> (TestDefinition, Arc<Scripted>) {
        let test = Arc::new(Scripted {
            info: TestInfo { id, fixtures },
            behaviour,
            calls: AtomicUsize::new(0),
        });
        let definition = TestDefinition {
            id: id.to_string(),
            compositors: vec!["sway".into()],
            description: None,
            feature: None,
            failing_compositors: Vec::new(),
            test: test.clone(),
        };
        (definition, test)
    }

    fn executor(journal: &Journal) -> TestExecutor {
        let mut registry = FixtureRegistry::new();
        registry
            .register(FixtureSpec::new(
                "client",
                Arc::new(Counter {
                    name: "client",
                    journal: Arc::clone(journal),
                }),
            ))
            .unwrap();
        registry
            .register(
                FixtureSpec::new(
                    "window",
                    Arc::new(Counter {
                        name: "window",
                        journal: Arc::clone(journal),
                    }),
                )
                .depends_on("client"),
            )
            .unwrap();
        let session = Arc::new(CompositorSession::from_config(&Config::default(), None));
        TestExecutor::new(Arc::new(registry), session)
    }

    #[tokio::test]
    async fn test_outcome_classification() {
        let journal = Journal::default();
        let executor = executor(&journal);

        let cases = [
            (Behaviour::Pass, OutcomeStatus::Passed, None),
            (Behaviour::Assert, OutcomeStatus::Failed, Some("expected 3 motion events")),
            (Behaviour::Panic, OutcomeStatus::Failed, Some("panicked: left != right")),
            (Behaviour::Skip, OutcomeStatus::Skipped, Some("no seat")),
            (Behaviour::Protocol, OutcomeStatus::InfrastructureError, Some("unknown object 42")),
        ];
        for (behaviour, status, detail) in cases {
            let (def, _) = definition("t", &["client"], behaviour);
            let outcome = executor.run_one(&def).await;
            assert_eq!(outcome.status, status);
            if let Some(detail) = detail {
                assert!(
                    outcome.detail.as_deref().unwrap_or("").contains(detail),
                    "{:?}",
                    outcome.detail
                );
            }
        }
    }

    #[tokio::test]
    async fn test_teardown_runs_after_failure() {
        let journal = Journal::default();
        let executor = executor(&journal);
        let (def, _) = definition("t", &["window"], Behaviour::Panic);

        let outcome = executor.run_one(&def).await;
        assert_eq!(outcome.status, OutcomeStatus::Failed);
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["create client", "create window", "teardown window", "teardown client"]
        );
    }

    #[tokio::test]
    async fn test_unknown_fixture_skips_body() {
        let journal = Journal::default();
        let executor = executor(&journal);
        let (def, test) = definition("t", &["client", "clipboard"], Behaviour::Pass);

        let outcome = executor.run_one(&def).await;
        assert_eq!(outcome.status, OutcomeStatus::InfrastructureError);
        assert_eq!(test.calls.load(Ordering::SeqCst), 0);
        assert!(journal.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_timeout_still_tears_down() {
        let journal = Journal::default();
        let executor = executor(&journal).with_timeout(Some(Duration::from_millis(100)));
        let (def, _) = definition("t", &["client"], Behaviour::Hang);

        let outcome = executor.run_one(&def).await;
        assert_eq!(outcome.status, OutcomeStatus::InfrastructureError);
        assert_eq!(outcome.detail.as_deref(), Some("timeout"));
        assert_eq!(
            *journal.lock().unwrap(),
            vec!["create client", "teardown client"]
        );
    }

    #[tokio::test]
    async fn test_run_continues_after_failures() {
        let journal = Journal::default();
        let executor = executor(&journal);
        let (a, _) = definition("a", &["client"], Behaviour::Assert);
        let (b, _) = definition("b", &["nope"], Behaviour::Pass);
        let (c, _) = definition("c", &["client"], Behaviour::Pass);

        let mut seen = Vec::new();
        let report = executor
            .run_with_progress(&[&a, &b, &c], |o| seen.push(o.id.clone()))
            .await;
        assert_eq!(seen, vec!["a", "b", "c"]);
        assert_eq!((report.passed(), report.failed(), report.errored()), (1, 1, 1));
        assert!(!report.is_success());
    }
}
