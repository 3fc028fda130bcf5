use crate::models::ExceptionInfo;
use crate::runner::TestId;

/// Lifecycle events streamed from the suite worker into the collector.
#[derive(Debug)]
pub enum TestEvent {
    Started { id: TestId },
    /// The test raised something other than an assertion.
    Errored { id: TestId, exception: ExceptionInfo },
    /// The test tripped an assertion.
    Failed { id: TestId, exception: ExceptionInfo },
    Finished { id: TestId },
}
