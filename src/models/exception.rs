use std::fmt::Write;
use std::path::{Path, PathBuf};

/// Whether a test tripped an assertion or blew up some other way.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    Failure,
    Error,
}

/// One stack frame of a failing test, outermost first in [`ExceptionInfo::frames`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub filename: PathBuf,
    pub line: u32,
    pub function: String,
    pub source_line: String,
}

impl Frame {
    pub fn basename(&self) -> String {
        self.filename
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| self.filename.to_string_lossy().to_string())
    }
}

/// Exception details captured from a failing test, independent of how the test ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExceptionInfo {
    pub type_name: String,
    pub value: String,
    pub frames: Vec<Frame>,
}

impl ExceptionInfo {
    pub fn new(type_name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            value: value.into(),
            frames: Vec::new(),
        }
    }

    pub fn with_frame(mut self, frame: Frame) -> Self {
        self.frames.push(frame);
        self
    }

    pub fn deepest_frame(&self) -> Option<&Frame> {
        self.frames.last()
    }

    /// `Type: value`, without any location.
    pub fn summary(&self) -> String {
        if self.value.is_empty() {
            self.type_name.clone()
        } else {
            format!("{}: {}", self.type_name, self.value)
        }
    }

    /// Deepest frame followed by the summary line:
    ///
    /// ```text
    /// File "<basename>", line <N>, in <function>
    ///     <source line>
    /// <Type>: <value>
    /// ```
    ///
    /// Falls back to the summary alone when no frame was captured.
    pub fn format_trace(&self) -> String {
        let mut out = String::new();
        if let Some(frame) = self.deepest_frame() {
            let _ = writeln!(
                out,
                "File \"{}\", line {}, in {}",
                frame.basename(),
                frame.line,
                frame.function
            );
            let _ = writeln!(out, "    {}", frame.source_line.trim());
        }
        out.push_str(&self.summary());
        out
    }
}

/// Read a single 1-based line from a source file, trimmed. Empty if unavailable.
pub fn source_line(path: &Path, line: u32) -> String {
    let Some(index) = (line as usize).checked_sub(1) else {
        return String::new();
    };
    std::fs::read_to_string(path)
        .ok()
        .and_then(|content| content.lines().nth(index).map(|l| l.trim().to_string()))
        .unwrap_or_default()
}
