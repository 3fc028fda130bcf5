pub mod events;

pub use events::TestEvent;

use crate::config::TraceMode;
use crate::models::{ExceptionInfo, TestResult};

/// Folds a stream of [`TestEvent`]s into one [`TestResult`] per started test.
#[derive(Debug)]
pub struct OutcomeCollector {
    trace: TraceMode,
    current: Option<TestResult>,
    results: Vec<TestResult>,
}

impl OutcomeCollector {
    pub fn new(trace: TraceMode) -> Self {
        Self {
            trace,
            current: None,
            results: Vec::new(),
        }
    }

    pub fn handle(&mut self, event: TestEvent) {
        match event {
            TestEvent::Started { id } => {
                tracing::debug!(test = %id, "test started");
                self.current = Some(TestResult::started(id.method));
            }

            TestEvent::Errored { id, exception } | TestEvent::Failed { id, exception } => {
                tracing::debug!(test = %id, error = %exception.summary(), "test did not pass");
                self.record_fault(&exception);
            }

            TestEvent::Finished { id } => match self.current.take() {
                Some(result) => {
                    tracing::info!(test = %id, passed = result.passed, "test finished");
                    self.results.push(result);
                }
                None => tracing::warn!(test = %id, "finish without a matching start"),
            },
        }
    }

    /// Downgrade the current record. Repeated faults overwrite earlier diagnostics.
    fn record_fault(&mut self, exception: &ExceptionInfo) {
        let Some(current) = self.current.as_mut() else {
            tracing::warn!("fault reported outside of a running test");
            return;
        };
        current.passed = false;
        current.message = exception.summary();
        current.stack_trace = match self.trace {
            TraceMode::Full => exception.format_trace(),
            TraceMode::Short => String::new(),
        };
    }

    /// Completed records in completion order. A test still in progress is dropped.
    pub fn into_results(self) -> Vec<TestResult> {
        if let Some(pending) = self.current {
            tracing::debug!(test = %pending.name, "discarding in-progress record");
        }
        self.results
    }
}
