pub mod exception;
pub mod result;

pub use exception::{ExceptionInfo, FaultKind, Frame};
pub use result::{Run, TestResult};
