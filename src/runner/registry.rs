use std::any::Any;
use std::cell::RefCell;
use std::collections::HashMap;
use std::panic::{self, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Once};

use anyhow::{Result, bail};
use async_trait::async_trait;

use crate::models::exception::source_line;
use crate::models::{ExceptionInfo, Frame};

use super::{Fault, Outcome, Suite, SuiteLoader, TestCase, TestId};

type TestFn = Arc<dyn Fn() -> Result<()> + Send + Sync>;

/// Panic details recorded by the capture hook while a case runs.
struct CapturedPanic {
    file: PathBuf,
    line: u32,
    message: String,
}

thread_local! {
    static CAPTURE: RefCell<Option<Option<CapturedPanic>>> = const { RefCell::new(None) };
}

static HOOK: Once = Once::new();

/// Install (once) a panic hook that records panics on threads currently running a
/// registry case and defers to the previous hook everywhere else.
fn install_capture_hook() {
    HOOK.call_once(|| {
        let previous = panic::take_hook();
        panic::set_hook(Box::new(move |info| {
            let captured = CAPTURE.with(|slot| {
                let mut slot = slot.borrow_mut();
                let Some(record) = slot.as_mut() else {
                    return false;
                };
                *record = Some(CapturedPanic {
                    file: info
                        .location()
                        .map(|l| PathBuf::from(l.file()))
                        .unwrap_or_default(),
                    line: info.location().map(|l| l.line()).unwrap_or(0),
                    message: payload_message(info.payload()),
                });
                true
            });
            if !captured {
                previous(info);
            }
        }));
    });
}

fn payload_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "Box<dyn Any>".to_string()
    }
}

/// An in-process test case backed by a closure.
pub struct FnTestCase {
    id: TestId,
    source_root: PathBuf,
    body: TestFn,
}

impl FnTestCase {
    fn fault_from_panic(&self, captured: Option<CapturedPanic>, payload: &(dyn Any + Send)) -> Fault {
        let (message, frame) = match captured {
            Some(p) => {
                let path = self.source_root.join(&p.file);
                let frame = Frame {
                    source_line: source_line(&path, p.line),
                    filename: p.file,
                    line: p.line,
                    function: self.id.method.clone(),
                };
                (p.message, Some(frame))
            }
            None => (payload_message(payload), None),
        };

        // assert!, assert_eq! and assert_ne! all start with "assertion".
        let mut exception = if message.starts_with("assertion") {
            ExceptionInfo::new("AssertionError", message)
        } else {
            ExceptionInfo::new("Panic", message)
        };
        if let Some(frame) = frame {
            exception = exception.with_frame(frame);
        }

        if exception.type_name == "AssertionError" {
            Fault::failure(exception)
        } else {
            Fault::error(exception)
        }
    }
}

impl TestCase for FnTestCase {
    fn id(&self) -> &TestId {
        &self.id
    }

    fn run(&self) -> Outcome {
        install_capture_hook();
        CAPTURE.with(|slot| *slot.borrow_mut() = Some(None));
        let result = panic::catch_unwind(AssertUnwindSafe(|| (self.body)()));
        let captured = CAPTURE.with(|slot| slot.borrow_mut().take().flatten());

        match result {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => Err(Fault::error(ExceptionInfo::new("Error", format!("{e:#}")))),
            Err(payload) => Err(self.fault_from_panic(captured, payload.as_ref())),
        }
    }
}

/// In-process loader: test modules are registered by name ahead of time.
#[derive(Default, Clone)]
pub struct Registry {
    modules: HashMap<String, Vec<(String, TestFn)>>,
    source_root: PathBuf,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Directory that panic locations are resolved against when reading source lines.
    pub fn with_source_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.source_root = root.into();
        self
    }

    /// Register a test method under a module. Methods keep registration order.
    pub fn register<F>(&mut self, module: &str, method: &str, body: F) -> &mut Self
    where
        F: Fn() -> Result<()> + Send + Sync + 'static,
    {
        self.modules
            .entry(module.to_string())
            .or_default()
            .push((method.to_string(), Arc::new(body)));
        self
    }
}

#[async_trait]
impl SuiteLoader for Registry {
    async fn load(&self, _dir: &Path, names: &[String]) -> Result<Suite> {
        let mut cases: Vec<Box<dyn TestCase>> = Vec::new();
        for name in names {
            let Some(methods) = self.modules.get(name) else {
                bail!("no test module named '{}'", name);
            };
            for (method, body) in methods {
                cases.push(Box::new(FnTestCase {
                    id: TestId::new(name.as_str(), method.as_str()),
                    source_root: self.source_root.clone(),
                    body: Arc::clone(body),
                }));
            }
        }
        Ok(Suite::new(cases))
    }

    fn name(&self) -> &str {
        "registry"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::FaultKind;
    use pretty_assertions::assert_eq;

    fn registry() -> Registry {
        let mut r = Registry::new().with_source_root(env!("CARGO_MANIFEST_DIR"));
        r.register("test_math", "test_add_ok", || {
            assert_eq!(1 + 1, 2);
            Ok(())
        })
        .register("test_math", "test_add_wrong", || {
            assert_eq!(1 + 1, 3, "math is broken");
            Ok(())
        })
        .register("test_math", "test_div_zero", || {
            let v: Vec<u32> = Vec::new();
            let _first = v[0];
            Ok(())
        })
        .register("test_io", "test_returns_err", || {
            anyhow::bail!("disk on fire")
        });
        r
    }

    async fn load(names: &[&str]) -> Vec<Box<dyn TestCase>> {
        let names: Vec<String> = names.iter().map(|n| n.to_string()).collect();
        let suite = registry().load(Path::new("."), &names).await.unwrap();
        suite.cases
    }

    #[tokio::test]
    async fn loads_modules_in_requested_order() {
        let cases = load(&["test_io", "test_math"]).await;
        let ids: Vec<String> = cases.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(
            ids,
            vec![
                "test_io.test_returns_err",
                "test_math.test_add_ok",
                "test_math.test_add_wrong",
                "test_math.test_div_zero",
            ]
        );
    }

    #[tokio::test]
    async fn unknown_module_fails_to_load() {
        let err = registry()
            .load(Path::new("."), &["test_nope".to_string()])
            .await
            .err()
            .unwrap();
        assert!(err.to_string().contains("test_nope"));
    }

    #[tokio::test]
    async fn assertion_panic_is_a_failure_with_frame() {
        let cases = load(&["test_math"]).await;
        assert_eq!(cases[0].run(), Ok(()));

        let fault = cases[1].run().unwrap_err();
        assert_eq!(fault.kind, FaultKind::Failure);
        assert_eq!(fault.exception.type_name, "AssertionError");
        assert!(fault.exception.value.contains("math is broken"));

        let frame = fault.exception.deepest_frame().unwrap();
        assert_eq!(frame.basename(), "registry.rs");
        assert_eq!(frame.function, "test_add_wrong");
        assert!(frame.source_line.contains("math is broken"));
    }

    #[tokio::test]
    async fn other_panics_are_errors() {
        let cases = load(&["test_math"]).await;
        let fault = cases[2].run().unwrap_err();
        assert_eq!(fault.kind, FaultKind::Error);
        assert_eq!(fault.exception.type_name, "Panic");
        assert!(fault.exception.value.contains("index out of bounds"));
    }

    #[tokio::test]
    async fn returned_error_has_no_frame() {
        let cases = load(&["test_io"]).await;
        let fault = cases[0].run().unwrap_err();
        assert_eq!(fault.kind, FaultKind::Error);
        assert_eq!(fault.exception.summary(), "Error: disk on fire");
        assert!(fault.exception.frames.is_empty());
    }
}
