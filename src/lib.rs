//! Run a fixed suite of tests under a global time limit and report every
//! outcome as a single JSON document.
//!
//! A [`runner::SuiteLoader`] resolves named test modules into a [`runner::Suite`],
//! the [`runner::ExecutionDriver`] runs it while an [`collector::OutcomeCollector`]
//! folds lifecycle events into [`models::TestResult`]s, and [`report::emit`]
//! writes the final [`models::Run`].

pub mod collector;
pub mod config;
pub mod error;
pub mod models;
pub mod report;
pub mod runner;
pub mod workspace;
