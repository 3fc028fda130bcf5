pub mod driver;
pub mod registry;
pub mod shell;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::collector::TestEvent;
use crate::models::{ExceptionInfo, FaultKind};

pub use driver::ExecutionDriver;

/// Identity of one test case: the module it was loaded from and its method name.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct TestId {
    pub module: String,
    pub method: String,
}

impl TestId {
    pub fn new(module: impl Into<String>, method: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            method: method.into(),
        }
    }
}

impl fmt::Display for TestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.module, self.method)
    }
}

/// Why a test did not pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Fault {
    pub kind: FaultKind,
    pub exception: ExceptionInfo,
}

impl Fault {
    pub fn failure(exception: ExceptionInfo) -> Self {
        Self {
            kind: FaultKind::Failure,
            exception,
        }
    }

    pub fn error(exception: ExceptionInfo) -> Self {
        Self {
            kind: FaultKind::Error,
            exception,
        }
    }
}

pub type Outcome = std::result::Result<(), Fault>;

/// A single runnable unit of test code.
pub trait TestCase: Send {
    fn id(&self) -> &TestId;

    /// Run the test to completion. Must not panic; faults are returned instead.
    fn run(&self) -> Outcome;
}

/// Stops whatever a suite is currently running from outside the worker.
pub trait Interrupt: Send + Sync {
    fn interrupt(&self);
}

/// An ordered, ready-to-run collection of test cases.
#[derive(Default)]
pub struct Suite {
    cases: Vec<Box<dyn TestCase>>,
    interrupt: Option<Arc<dyn Interrupt>>,
}

impl Suite {
    pub fn new(cases: Vec<Box<dyn TestCase>>) -> Self {
        Self {
            cases,
            interrupt: None,
        }
    }

    pub fn with_interrupt(mut self, interrupt: Arc<dyn Interrupt>) -> Self {
        self.interrupt = Some(interrupt);
        self
    }

    pub fn interrupt_handle(&self) -> Option<Arc<dyn Interrupt>> {
        self.interrupt.clone()
    }

    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Run every case in order, streaming lifecycle events over the channel.
    ///
    /// Returns early once the receiver is gone (the run was abandoned) or, with
    /// `failfast`, after the first case that does not pass.
    pub fn run(self, tx: &mpsc::UnboundedSender<TestEvent>, failfast: bool) {
        for case in self.cases {
            let id = case.id().clone();
            if tx.send(TestEvent::Started { id: id.clone() }).is_err() {
                return;
            }

            let outcome = case.run();
            let passed = outcome.is_ok();
            if let Err(fault) = outcome {
                let event = match fault.kind {
                    FaultKind::Failure => TestEvent::Failed {
                        id: id.clone(),
                        exception: fault.exception,
                    },
                    FaultKind::Error => TestEvent::Errored {
                        id: id.clone(),
                        exception: fault.exception,
                    },
                };
                if tx.send(event).is_err() {
                    return;
                }
            }

            if tx.send(TestEvent::Finished { id }).is_err() {
                return;
            }

            if failfast && !passed {
                tracing::info!("failfast: stopping after first failing test");
                return;
            }
        }
    }
}

/// Resolves named test modules in a directory into a runnable [`Suite`].
#[async_trait]
pub trait SuiteLoader: Send + Sync {
    /// Load `names` (module names without extension) from `dir`, preserving order.
    async fn load(&self, dir: &Path, names: &[String]) -> Result<Suite>;

    /// Display name for this loader (e.g., "bash").
    fn name(&self) -> &str;
}
