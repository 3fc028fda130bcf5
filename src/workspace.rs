use std::path::{Component, Path};

use anyhow::{Context, Result, bail};
use serde::Deserialize;

use crate::runner::shell::SCRIPT_EXTENSION;

#[derive(Debug, Clone, Deserialize)]
pub struct SourceFile {
    pub filename: String,
    pub src: String,
}

/// The JSON payload read from stdin: test scripts plus the files they use.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SourceCode {
    #[serde(default)]
    pub src_test: Vec<SourceFile>,
    #[serde(default)]
    pub src: Vec<SourceFile>,
}

impl SourceCode {
    pub fn parse(json: &str) -> Result<Self> {
        let code: Self = serde_json::from_str(json).context("invalid source payload")?;
        for file in code.src_test.iter().chain(&code.src) {
            validate_filename(&file.filename)?;
        }
        Ok(code)
    }

    /// Module names of the test files, in payload order.
    pub fn test_modules(&self) -> Vec<String> {
        self.src_test
            .iter()
            .filter_map(|f| Path::new(&f.filename).file_stem())
            .map(|s| s.to_string_lossy().to_string())
            .collect()
    }

    /// Write every file into a fresh temporary directory.
    pub fn stage(&self) -> Result<tempfile::TempDir> {
        let dir = tempfile::Builder::new()
            .prefix("tally-workspace-")
            .tempdir()
            .context("failed to create workspace directory")?;

        for file in self.src.iter().chain(&self.src_test) {
            let path = dir.path().join(&file.filename);
            std::fs::write(&path, &file.src)
                .with_context(|| format!("failed to write {}", path.display()))?;
        }

        tracing::debug!(
            dir = %dir.path().display(),
            tests = self.src_test.len(),
            support = self.src.len(),
            "staged workspace"
        );
        Ok(dir)
    }
}

/// Filenames must be a single plain path component.
fn validate_filename(name: &str) -> Result<()> {
    let mut components = Path::new(name).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(_)), None) => Ok(()),
        _ => bail!("invalid filename '{}'", name),
    }
}

/// Module names of every test script directly inside `dir`, sorted.
pub fn discover_modules(dir: &Path) -> Result<Vec<String>> {
    if !dir.is_dir() {
        bail!("workspace '{}' is not a directory", dir.display());
    }

    let pattern = dir
        .join(format!("*.{SCRIPT_EXTENSION}"))
        .to_string_lossy()
        .to_string();
    let mut modules: Vec<String> = glob::glob(&pattern)?
        .flatten()
        .filter_map(|p| p.file_stem().map(|s| s.to_string_lossy().to_string()))
        .collect();
    modules.sort();
    Ok(modules)
}
