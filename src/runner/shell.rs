use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use async_trait::async_trait;

use crate::models::exception::source_line;
use crate::models::{ExceptionInfo, Frame};

use super::{Fault, Interrupt, Outcome, Suite, SuiteLoader, TestCase, TestId};

pub const SCRIPT_EXTENSION: &str = "sh";

const FRAME_MARKER: &str = "__TALLY_FRAME__";

/// Commands whose failure counts as a failed assertion rather than an error.
const ASSERTION_COMMANDS: [&str; 3] = ["[", "[[", "test"];

#[derive(Debug, Default)]
struct GroupState {
    active: Option<u32>,
    interrupted: bool,
}

/// Tracks the process group of the test currently running so it can be killed
/// from outside the worker.
#[derive(Debug, Default)]
pub struct ProcessGroup {
    state: Mutex<GroupState>,
}

impl ProcessGroup {
    /// Record a freshly spawned group. Returns false once the run has been
    /// interrupted, in which case the caller must kill the group itself.
    fn enter(&self, pgid: u32) -> bool {
        let Ok(mut state) = self.state.lock() else {
            return true;
        };
        if state.interrupted {
            return false;
        }
        state.active = Some(pgid);
        true
    }

    fn leave(&self) {
        if let Ok(mut state) = self.state.lock() {
            state.active = None;
        }
    }
}

impl Interrupt for ProcessGroup {
    fn interrupt(&self) {
        let active = match self.state.lock() {
            Ok(mut state) => {
                state.interrupted = true;
                state.active
            }
            Err(_) => None,
        };
        if let Some(pgid) = active {
            tracing::debug!(pgid, "killing active test process group");
            kill_group(pgid);
        }
    }
}

/// SIGKILL a whole process group so anything the test forked goes down with it.
#[cfg_attr(not(unix), allow(unused_variables))]
fn kill_group(pgid: u32) {
    #[cfg(unix)]
    unsafe {
        libc::kill(-(pgid as libc::pid_t), libc::SIGKILL);
    }
}

/// One `test_*` function in a bash script.
pub struct ShellTestCase {
    id: TestId,
    script: PathBuf,
    workdir: PathBuf,
    group: Arc<ProcessGroup>,
}

impl ShellTestCase {
    fn command_line(&self) -> String {
        let trap = format!(
            r#"trap 'printf "{FRAME_MARKER}\t%s\t%s\t%s\t%s\n" "${{BASH_SOURCE[0]}}" "$LINENO" "${{FUNCNAME[0]:-main}}" "${{BASH_COMMAND//[[:space:]]/ }}" >&2' ERR"#
        );
        format!(
            "set -eE\n{}\nsource {}\n{}\n",
            trap,
            shell_words::quote(&self.script.to_string_lossy()),
            shell_words::quote(&self.id.method),
        )
    }

    /// Run the test and return its exit status and captured stderr.
    fn execute(&self) -> Result<(ExitStatus, String)> {
        // Stderr goes to a file rather than a pipe: background jobs left behind by
        // the test would otherwise hold the pipe open long after bash exits.
        let mut capture = tempfile::tempfile().context("failed to create stderr capture")?;
        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(self.command_line())
            .current_dir(&self.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(capture.try_clone().context("failed to share stderr capture")?);

        // Own process group, so a timeout can take out the test and its children.
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }

        let mut child = cmd.spawn().context("failed to spawn bash")?;
        let pgid = child.id();
        if !self.group.enter(pgid) {
            kill_group(pgid);
        }
        let status = child.wait();
        self.group.leave();
        // Nothing the test started may outlive it.
        kill_group(pgid);
        let status = status.context("failed to wait for bash")?;

        let mut stderr = Vec::new();
        capture
            .seek(SeekFrom::Start(0))
            .and_then(|_| capture.read_to_end(&mut stderr))
            .context("failed to read stderr capture")?;
        Ok((status, String::from_utf8_lossy(&stderr).to_string()))
    }
}

impl TestCase for ShellTestCase {
    fn id(&self) -> &TestId {
        &self.id
    }

    fn run(&self) -> Outcome {
        let (status, stderr) = match self.execute() {
            Ok(result) => result,
            Err(e) => {
                return Err(Fault::error(ExceptionInfo::new(
                    "HarnessError",
                    format!("{e:#}"),
                )));
            }
        };

        if status.success() {
            return Ok(());
        }

        let stderr = strip_ansi(&stderr);
        let status = match status.code() {
            Some(code) => format!("exited with status {code}"),
            None => "was terminated by a signal".to_string(),
        };
        Err(classify(&stderr, &status, &self.id.method))
    }
}

/// A frame reported by the ERR trap.
#[derive(Debug, PartialEq, Eq)]
struct TrapFrame {
    file: PathBuf,
    line: u32,
    function: String,
    command: String,
}

fn parse_trap_line(line: &str) -> Option<TrapFrame> {
    let rest = line.strip_prefix(FRAME_MARKER)?.strip_prefix('\t')?;
    let mut fields = rest.splitn(4, '\t');
    Some(TrapFrame {
        file: PathBuf::from(fields.next()?),
        line: fields.next()?.trim().parse().ok()?,
        function: fields.next()?.to_string(),
        command: fields.next().unwrap_or_default().trim().to_string(),
    })
}

/// Parse bash's own diagnostics, e.g. `/ws/t.sh: line 7: 1/0: division by 0`.
fn parse_bash_diagnostic(line: &str) -> Option<(PathBuf, u32, String)> {
    let (file, rest) = line.split_once(": line ")?;
    let (num, message) = rest.split_once(": ")?;
    Some((PathBuf::from(file), num.trim().parse().ok()?, message.trim().to_string()))
}

/// Turn the stderr of a failed test run into a fault.
fn classify(stderr: &str, status: &str, method: &str) -> Fault {
    // The innermost frame is reported first; later markers come from callers.
    let trap = stderr.lines().find_map(parse_trap_line);
    let last_line = stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|l| !l.is_empty() && !l.starts_with(FRAME_MARKER));

    if let Some(trap) = trap {
        let frame = Frame {
            source_line: source_line(&trap.file, trap.line),
            filename: trap.file,
            line: trap.line,
            function: trap.function,
        };

        let first_word = trap.command.split_whitespace().next().unwrap_or_default();
        if ASSERTION_COMMANDS.contains(&first_word) {
            return Fault::failure(ExceptionInfo::new("AssertionError", trap.command).with_frame(frame));
        }

        let mut value = format!("`{}` {}", trap.command, status);
        if let Some(line) = last_line {
            value.push_str(": ");
            value.push_str(line);
        }
        return Fault::error(ExceptionInfo::new("CommandError", value).with_frame(frame));
    }

    if let Some((file, line, message)) = last_line.and_then(parse_bash_diagnostic) {
        let frame = Frame {
            source_line: source_line(&file, line),
            filename: file,
            line,
            function: method.to_string(),
        };
        return Fault::error(ExceptionInfo::new("ShellError", message).with_frame(frame));
    }

    let value = match last_line {
        Some(line) => format!("test {status}: {line}"),
        None => format!("test {status}"),
    };
    Fault::error(ExceptionInfo::new("CommandError", value))
}

/// Names of `test_*` functions defined at the start of a line, in order.
pub fn test_functions(source: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    for name in source.lines().filter_map(parse_function_header) {
        if !names.contains(&name) {
            names.push(name);
        }
    }
    names
}

fn parse_function_header(line: &str) -> Option<String> {
    let (keyword, rest) = match line.strip_prefix("function ") {
        Some(rest) => (true, rest.trim_start()),
        None => (false, line),
    };

    let end = rest
        .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_'))
        .unwrap_or(rest.len());
    let (name, tail) = rest.split_at(end);
    if !name.starts_with("test_") {
        return None;
    }

    let tail = tail.trim_start();
    let is_definition = tail.starts_with("()")
        || tail.starts_with("( )")
        || (keyword && (tail.is_empty() || tail.starts_with('{')));
    is_definition.then(|| name.to_string())
}

/// Loads `<name>.sh` scripts and turns their `test_*` functions into cases.
#[derive(Debug, Default)]
pub struct ShellLoader {
    group: Arc<ProcessGroup>,
}

impl ShellLoader {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SuiteLoader for ShellLoader {
    async fn load(&self, dir: &Path, names: &[String]) -> Result<Suite> {
        // Bash runs with the workspace as cwd, so every path handed to it must be absolute.
        let dir = tokio::fs::canonicalize(dir)
            .await
            .with_context(|| format!("workspace '{}' not found", dir.display()))?;
        let mut cases: Vec<Box<dyn TestCase>> = Vec::new();
        for name in names {
            let script = dir.join(format!("{name}.{SCRIPT_EXTENSION}"));
            let source = match tokio::fs::read_to_string(&script).await {
                Ok(source) => source,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                    bail!("test module '{}' not found", name)
                }
                Err(e) => {
                    return Err(e)
                        .with_context(|| format!("failed to read {}", script.display()));
                }
            };

            let functions = test_functions(&source);
            tracing::debug!(module = %name, tests = functions.len(), "loaded test script");
            for method in functions {
                cases.push(Box::new(ShellTestCase {
                    id: TestId::new(name.as_str(), method),
                    script: script.clone(),
                    workdir: dir.clone(),
                    group: Arc::clone(&self.group),
                }));
            }
        }
        Ok(Suite::new(cases).with_interrupt(self.group.clone()))
    }

    fn name(&self) -> &str {
        "bash"
    }
}

/// Strip ANSI escape sequences from a string.
fn strip_ansi(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut chars = s.chars();
    while let Some(c) = chars.next() {
        if c == '\x1b' {
            for c2 in chars.by_ref() {
                if c2.is_ascii_alphabetic() {
                    break;
                }
            }
        } else {
            out.push(c);
        }
    }
    out
}
