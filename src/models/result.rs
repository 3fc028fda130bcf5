use serde::{Deserialize, Serialize};

/// Outcome of a single test case as it appears in the report.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TestResult {
    pub passed: bool,
    pub name: String,
    pub message: String,
    pub stack_trace: String,
}

impl TestResult {
    /// A fresh in-progress record. Tests pass until something says otherwise.
    pub fn started(name: impl Into<String>) -> Self {
        Self {
            passed: true,
            name: name.into(),
            message: String::new(),
            stack_trace: String::new(),
        }
    }
}

/// The whole report written to stdout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Run {
    pub message: String,
    pub success: bool,
    pub output: Vec<TestResult>,
}

impl Run {
    pub fn completed(output: Vec<TestResult>) -> Self {
        Self {
            message: String::new(),
            success: true,
            output,
        }
    }

    /// A harness-level abort. Never carries partial results.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            success: false,
            output: Vec::new(),
        }
    }
}
