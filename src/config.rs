use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

use crate::error::HarnessError;

pub const CONFIG_FILE: &str = "tally.toml";

#[derive(Debug, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub run: RunSection,
}

/// The `[run]` table of `tally.toml`.
#[derive(Debug, Default, Deserialize)]
pub struct RunSection {
    /// Wall-clock budget for the whole suite, in seconds. `TIMEOUT` overrides it.
    pub timeout: Option<u64>,
    /// Stop at the first test that does not pass.
    #[serde(default)]
    pub failfast: bool,
    #[serde(default)]
    pub trace: TraceMode,
}

/// How much diagnostic detail a non-passing record carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceMode {
    /// `message` plus the formatted frame in `stack_trace`.
    #[default]
    Full,
    /// `message` only; `stack_trace` stays empty.
    Short,
}

/// Fully resolved settings handed to the execution driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RunConfig {
    pub timeout: Duration,
    pub failfast: bool,
    pub trace: TraceMode,
}

impl Config {
    /// Load a config file. A missing file means defaults; one that exists but
    /// cannot be read or parsed is a configuration failure.
    pub fn load(path: &Path) -> Result<Self, HarnessError> {
        let content = match std::fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                tracing::error!(path = %path.display(), error = %e, "unreadable config file");
                return Err(invalid_file(path));
            }
        };
        toml::from_str(&content).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "invalid config file");
            invalid_file(path)
        })
    }

    /// Combine the file settings with the raw `TIMEOUT` value, which wins when set.
    pub fn resolve(&self, timeout_var: Option<&str>) -> Result<RunConfig, HarnessError> {
        let secs = match timeout_var.map(str::trim).filter(|v| !v.is_empty()) {
            Some(raw) => raw
                .parse::<u64>()
                .map_err(|_| HarnessError::Config("failed to parse env timeout".into()))?,
            None => self
                .run
                .timeout
                .ok_or_else(|| HarnessError::Config("env timeout not defined".into()))?,
        };

        if secs == 0 {
            return Err(HarnessError::Config(
                "timeout must be greater than zero".into(),
            ));
        }

        Ok(RunConfig {
            timeout: Duration::from_secs(secs),
            failfast: self.run.failfast,
            trace: self.run.trace,
        })
    }
}

fn invalid_file(path: &Path) -> HarnessError {
    HarnessError::Config(format!("invalid config file {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn message(err: HarnessError) -> String {
        err.to_string()
    }

    #[test]
    fn env_timeout_is_required_without_file_value() {
        let err = Config::default().resolve(None).unwrap_err();
        assert_eq!(message(err), "env timeout not defined");

        let err = Config::default().resolve(Some("  ")).unwrap_err();
        assert_eq!(message(err), "env timeout not defined");
    }

    #[test]
    fn non_integer_timeout_is_rejected() {
        for raw in ["abc", "1.5", "-3"] {
            let err = Config::default().resolve(Some(raw)).unwrap_err();
            assert_eq!(message(err), "failed to parse env timeout");
        }
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = Config::default().resolve(Some("0")).unwrap_err();
        assert_eq!(message(err), "timeout must be greater than zero");
    }

    #[test]
    fn env_overrides_file() {
        let config: Config = toml::from_str(
            r#"
            [run]
            timeout = 30
            failfast = true
            trace = "short"
            "#,
        )
        .unwrap();

        assert_eq!(
            config.resolve(Some("5")).unwrap(),
            RunConfig {
                timeout: Duration::from_secs(5),
                failfast: true,
                trace: TraceMode::Short,
            }
        );
        assert_eq!(
            config.resolve(None).unwrap().timeout,
            Duration::from_secs(30)
        );
    }

    #[test]
    fn missing_file_falls_back_to_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(&dir.path().join(CONFIG_FILE)).unwrap();
        assert!(!config.run.failfast);
        assert_eq!(config.run.trace, TraceMode::Full);
        assert_eq!(config.run.timeout, None);
    }

    #[test]
    fn unparsable_file_is_a_config_failure() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        for content in ["[run\ntimeout = ", "[run]\ntimeout = -5\nfailfast = true\n"] {
            std::fs::write(&path, content).unwrap();
            let err = Config::load(&path).unwrap_err();
            assert_eq!(message(err), format!("invalid config file {}", path.display()));
        }
    }

    #[test]
    fn loads_file_settings() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        std::fs::write(&path, "[run]\ntimeout = 7\nfailfast = true\n").unwrap();

        let config = Config::load(&path).unwrap();
        assert_eq!(config.run.timeout, Some(7));
        assert!(config.run.failfast);
    }
}
