use anyhow::anyhow;
use tokio::sync::mpsc;

use crate::collector::OutcomeCollector;
use crate::config::RunConfig;
use crate::error::HarnessError;
use crate::models::TestResult;

use super::Suite;

/// Runs a suite against an [`OutcomeCollector`] under a global deadline.
///
/// The suite executes sequentially on a single blocking worker while events
/// stream back to the collector. If the deadline passes first, the worker is
/// interrupted (when the suite knows how) and then detached; its partial
/// results are discarded.
pub struct ExecutionDriver {
    config: RunConfig,
}

impl ExecutionDriver {
    pub fn new(config: RunConfig) -> Self {
        Self { config }
    }

    pub async fn run(&self, suite: Suite) -> Result<Vec<TestResult>, HarnessError> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let interrupt = suite.interrupt_handle();
        let failfast = self.config.failfast;

        tracing::info!(
            tests = suite.len(),
            timeout_secs = self.config.timeout.as_secs(),
            failfast,
            "starting suite"
        );

        let worker = tokio::task::spawn_blocking(move || suite.run(&tx, failfast));

        let mut collector = OutcomeCollector::new(self.config.trace);
        let collect = async {
            while let Some(event) = rx.recv().await {
                collector.handle(event);
            }
        };

        if tokio::time::timeout(self.config.timeout, collect).await.is_err() {
            tracing::warn!(
                timeout_secs = self.config.timeout.as_secs(),
                "deadline reached, abandoning suite"
            );
            if let Some(interrupt) = interrupt {
                interrupt.interrupt();
            }
            // Dropping the handle detaches the worker; it is never joined.
            drop(worker);
            return Err(HarnessError::TimeLimitExceeded);
        }

        worker
            .await
            .map_err(|e| HarnessError::Internal(anyhow!("suite worker failed: {e}")))?;

        let results = collector.into_results();
        tracing::info!(
            completed = results.len(),
            failed = results.iter().filter(|r| !r.passed).count(),
            "suite finished"
        );
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TraceMode;
    use crate::runner::{Fault, Interrupt, Outcome, TestCase, TestId};
    use crate::models::ExceptionInfo;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    struct Sleepy {
        id: TestId,
        sleep: Duration,
        outcome: Outcome,
    }

    impl TestCase for Sleepy {
        fn id(&self) -> &TestId {
            &self.id
        }

        fn run(&self) -> Outcome {
            std::thread::sleep(self.sleep);
            self.outcome.clone()
        }
    }

    fn case(name: &str, millis: u64, outcome: Outcome) -> Box<dyn TestCase> {
        Box::new(Sleepy {
            id: TestId::new("test_mod", name),
            sleep: Duration::from_millis(millis),
            outcome,
        })
    }

    fn config(timeout: Duration, failfast: bool) -> RunConfig {
        RunConfig {
            timeout,
            failfast,
            trace: TraceMode::Full,
        }
    }

    #[derive(Default)]
    struct Flag(AtomicBool);

    impl Interrupt for Flag {
        fn interrupt(&self) {
            self.0.store(true, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn all_passing_suite_reports_every_test() {
        let suite = Suite::new(vec![case("test_a", 0, Ok(())), case("test_b", 0, Ok(()))]);
        let driver = ExecutionDriver::new(config(Duration::from_secs(5), false));

        let results = driver.run(suite).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(results.iter().all(|r| r.passed && r.message.is_empty()));
    }

    #[tokio::test]
    async fn failures_do_not_stop_the_run() {
        let fail = Err(Fault::failure(ExceptionInfo::new("AssertionError", "nope")));
        let suite = Suite::new(vec![
            case("test_a", 0, fail),
            case("test_b", 0, Ok(())),
        ]);
        let driver = ExecutionDriver::new(config(Duration::from_secs(5), false));

        let results = driver.run(suite).await.unwrap();
        assert_eq!(results.len(), 2);
        assert!(!results[0].passed);
        assert!(results[1].passed);
    }

    #[tokio::test]
    async fn failfast_truncates_results() {
        let err = Err(Fault::error(ExceptionInfo::new("Panic", "boom")));
        let suite = Suite::new(vec![
            case("test_a", 0, err),
            case("test_b", 0, Ok(())),
        ]);
        let driver = ExecutionDriver::new(config(Duration::from_secs(5), true));

        let results = driver.run(suite).await.unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].name, "test_a");
    }

    #[tokio::test]
    async fn timeout_aborts_and_fires_interrupt() {
        let flag = Arc::new(Flag::default());
        let suite = Suite::new(vec![
            case("test_fast", 0, Ok(())),
            case("test_slow", 2_000, Ok(())),
        ])
        .with_interrupt(flag.clone());
        let driver = ExecutionDriver::new(config(Duration::from_millis(200), false));

        let err = driver.run(suite).await.unwrap_err();
        assert!(matches!(err, HarnessError::TimeLimitExceeded));
        assert_eq!(err.to_string(), "time limit exceeded");
        assert!(flag.0.load(Ordering::SeqCst));
    }
}
