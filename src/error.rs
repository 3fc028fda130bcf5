use thiserror::Error;

/// Failures that abort the whole run. The display text becomes `Run.message`.
#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("{0}")]
    Config(String),

    #[error("failed to read source codes")]
    Payload(#[source] anyhow::Error),

    #[error("failed to load test suite: {0}")]
    Load(String),

    #[error("time limit exceeded")]
    TimeLimitExceeded,

    #[error("internal harness error")]
    Internal(#[source] anyhow::Error),
}
