//! Engine configuration.
//!
//! One immutable `EngineConfig` is built at startup from defaults,
//! `FSBATCH_*` environment variables, and CLI flags (in that order of
//! precedence, CLI last and strongest), then passed by reference into each
//! component. Nothing here mutates after startup.

use std::ffi::OsString;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use thiserror::Error;

use crate::dispatch::CommandSpec;

/// Grace window before a batch is finalized.
pub const DEFAULT_SETTLE: Duration = Duration::from_secs(3);

/// Pause between retries of a failed command.
pub const DEFAULT_RETRY_INTERVAL: Duration = Duration::from_secs(10);

/// Record delimiter on the watcher stream (NUL).
pub const DEFAULT_DELIMITER: u8 = 0;

/// Watcher executable looked up on PATH.
pub const DEFAULT_WATCHER: &str = "fswatch";

/// Fatal startup problems. Reported once with a usage hint; never retried.
#[derive(Debug, Error)]
pub enum SetupError {
    #[error("watch directory `{}` does not exist", .0.display())]
    MissingWatchDir(PathBuf),
    #[error("watch target `{}` is not a directory", .0.display())]
    NotADirectory(PathBuf),
    #[error("event filters exclude every event type")]
    EmptyEventFilter,
}

/// Immutable engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub watch_dir: PathBuf,
    pub command: CommandSpec,
    pub allow_events: Vec<String>,
    pub exclude_events: Vec<String>,
    pub delimiter: u8,
    pub settle: Duration,
    pub retry_interval: Duration,
    pub watcher_program: OsString,
}

impl EngineConfig {
    /// Config with policy defaults for the given watch target and command.
    pub fn new(watch_dir: PathBuf, command: CommandSpec) -> Self {
        Self {
            watch_dir,
            command,
            allow_events: Vec::new(),
            exclude_events: Vec::new(),
            delimiter: DEFAULT_DELIMITER,
            settle: DEFAULT_SETTLE,
            retry_interval: DEFAULT_RETRY_INTERVAL,
            watcher_program: OsString::from(DEFAULT_WATCHER),
        }
    }

    /// Defaults overlaid with `FSBATCH_*` environment variables.
    pub fn from_env(watch_dir: PathBuf, command: CommandSpec) -> Result<Self> {
        let mut config = Self::new(watch_dir, command);

        if let Some(value) = non_empty_env("FSBATCH_SETTLE_SECS") {
            config.settle = parse_secs(&value).context("FSBATCH_SETTLE_SECS")?;
        }
        if let Some(value) = non_empty_env("FSBATCH_RETRY_SECS") {
            config.retry_interval = parse_secs(&value).context("FSBATCH_RETRY_SECS")?;
        }
        if let Some(value) = non_empty_env("FSBATCH_DELIMITER") {
            config.delimiter = parse_delimiter(&value).context("FSBATCH_DELIMITER")?;
        }
        if let Some(value) = non_empty_env("FSBATCH_WATCHER") {
            config.watcher_program = OsString::from(value);
        }

        Ok(config)
    }

    /// Override fields from CLI args (CLI wins over environment).
    pub fn with_overrides(
        mut self,
        settle_secs: Option<u64>,
        retry_secs: Option<u64>,
        watcher: Option<OsString>,
        allow_events: Vec<String>,
        exclude_events: Vec<String>,
    ) -> Self {
        if let Some(secs) = settle_secs {
            self.settle = Duration::from_secs(secs);
        }
        if let Some(secs) = retry_secs {
            self.retry_interval = Duration::from_secs(secs);
        }
        if let Some(program) = watcher {
            self.watcher_program = program;
        }
        self.allow_events = allow_events;
        self.exclude_events = exclude_events;
        self
    }

    /// Check the watch target before spawning anything.
    pub fn validate(&self) -> Result<(), SetupError> {
        if !self.watch_dir.exists() {
            return Err(SetupError::MissingWatchDir(self.watch_dir.clone()));
        }
        if !self.watch_dir.is_dir() {
            return Err(SetupError::NotADirectory(self.watch_dir.clone()));
        }
        Ok(())
    }
}

fn non_empty_env(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_secs(value: &str) -> Result<Duration> {
    let secs: u64 = value
        .trim()
        .parse()
        .with_context(|| format!("invalid seconds value `{}`", value))?;
    Ok(Duration::from_secs(secs))
}

/// Accepts `nul`, `newline`, or any single ASCII character.
fn parse_delimiter(value: &str) -> Result<u8> {
    match value {
        "nul" | "NUL" => return Ok(0),
        "newline" | "NEWLINE" => return Ok(b'\n'),
        _ => {}
    }
    let bytes = value.as_bytes();
    if bytes.len() == 1 {
        Ok(bytes[0])
    } else {
        anyhow::bail!("invalid delimiter `{}` (use `nul`, `newline`, or one character)", value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn command() -> CommandSpec {
        CommandSpec::from_argv(vec![OsString::from("true")]).unwrap()
    }

    #[test]
    fn test_defaults() {
        let config = EngineConfig::new(PathBuf::from("/tmp"), command());
        assert_eq!(config.settle, DEFAULT_SETTLE);
        assert_eq!(config.retry_interval, DEFAULT_RETRY_INTERVAL);
        assert_eq!(config.delimiter, 0);
        assert_eq!(config.watcher_program, OsString::from("fswatch"));
        assert!(config.allow_events.is_empty());
    }

    #[test]
    fn test_cli_overrides_win() {
        let config = EngineConfig::new(PathBuf::from("/tmp"), command()).with_overrides(
            Some(1),
            Some(5),
            Some(OsString::from("inotify-shim")),
            vec!["Created".to_string()],
            vec!["Updated".to_string()],
        );
        assert_eq!(config.settle, Duration::from_secs(1));
        assert_eq!(config.retry_interval, Duration::from_secs(5));
        assert_eq!(config.watcher_program, OsString::from("inotify-shim"));
        assert_eq!(config.allow_events, vec!["Created".to_string()]);
        assert_eq!(config.exclude_events, vec!["Updated".to_string()]);
    }

    #[test]
    fn test_overrides_keep_defaults_when_absent() {
        let config = EngineConfig::new(PathBuf::from("/tmp"), command()).with_overrides(
            None,
            None,
            None,
            Vec::new(),
            Vec::new(),
        );
        assert_eq!(config.settle, DEFAULT_SETTLE);
        assert_eq!(config.retry_interval, DEFAULT_RETRY_INTERVAL);
    }

    #[test]
    fn test_parse_secs() {
        assert_eq!(parse_secs("15").unwrap(), Duration::from_secs(15));
        assert_eq!(parse_secs(" 0 ").unwrap(), Duration::from_secs(0));
        assert!(parse_secs("abc").is_err());
        assert!(parse_secs("-1").is_err());
    }

    #[test]
    fn test_parse_delimiter() {
        assert_eq!(parse_delimiter("nul").unwrap(), 0);
        assert_eq!(parse_delimiter("newline").unwrap(), b'\n');
        assert_eq!(parse_delimiter(";").unwrap(), b';');
        assert!(parse_delimiter("").is_err());
        assert!(parse_delimiter("ab").is_err());
    }

    #[test]
    fn test_validate_accepts_directory() {
        let dir = tempfile::tempdir().unwrap();
        let config = EngineConfig::new(dir.path().to_path_buf(), command());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_missing_dir() {
        let config = EngineConfig::new(PathBuf::from("/nonexistent/fsbatch-dir"), command());
        assert!(matches!(
            config.validate(),
            Err(SetupError::MissingWatchDir(_))
        ));
    }

    #[test]
    fn test_validate_rejects_file_target() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let config = EngineConfig::new(file.path().to_path_buf(), command());
        assert!(matches!(config.validate(), Err(SetupError::NotADirectory(_))));
    }
}
