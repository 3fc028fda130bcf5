use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::models::Run;

const FALLBACK: &str = r#"{"message":"internal harness error","success":false,"output":[]}"#;

static EMITTED: AtomicBool = AtomicBool::new(false);

/// Serialize a run to a single JSON line.
pub fn render(run: &Run) -> String {
    serde_json::to_string(run).unwrap_or_else(|_| FALLBACK.to_string())
}

/// Write the report to stdout and exit with status 0.
///
/// Only the first call writes anything, so a late panic cannot produce a
/// second document.
pub fn emit(run: &Run) -> ! {
    if !EMITTED.swap(true, Ordering::SeqCst) {
        let mut stdout = std::io::stdout().lock();
        let _ = writeln!(stdout, "{}", render(run));
        let _ = stdout.flush();
    }
    std::process::exit(0)
}

/// Turn any unanticipated panic into an aborted run instead of a crash.
pub fn install_panic_hook() {
    std::panic::set_hook(Box::new(|info| {
        tracing::error!(panic = %info, "unexpected panic");
        emit(&Run::aborted("internal harness error"));
    }));
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TestResult;
    use pretty_assertions::assert_eq;

    #[test]
    fn renders_one_line() {
        let run = Run::completed(vec![
            TestResult::started("test_add_ok"),
            TestResult {
                passed: false,
                name: "test_div_zero".into(),
                message: "ShellError: division by 0".into(),
                stack_trace: "File \"t.sh\", line 2, in test_div_zero\n    echo $((1 / 0))\nShellError: division by 0".into(),
            },
        ]);

        let line = render(&run);
        assert!(!line.contains('\n'));
        let back: Run = serde_json::from_str(&line).unwrap();
        assert_eq!(back, run);
    }

    #[test]
    fn fallback_matches_the_report_shape() {
        let run: Run = serde_json::from_str(FALLBACK).unwrap();
        assert_eq!(run, Run::aborted("internal harness error"));
    }
}
