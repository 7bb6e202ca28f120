//! The watcher subprocess: argv construction, spawn, and teardown.
//!
//! The engine does not watch the filesystem itself — it owns an external
//! watcher process (`fswatch` unless overridden) that monitors the target
//! directory recursively and writes one timestamped, flag-annotated record
//! per change to stdout, delimiter-separated. The engine only ever touches
//! that byte stream, so a slow downstream command backs the watcher up
//! against the pipe buffer instead of dropping events.

use std::ffi::OsString;
use std::os::unix::process::CommandExt;
use std::process::{Child, ChildStdout, Command, Stdio};

use anyhow::{Context, Result};

use crate::config::{EngineConfig, SetupError};
use crate::lifecycle::{ProcessGuard, ProcessRegistry};

/// Event types the default watcher reports when no filter is given.
/// Allow/exclude filters are resolved against this universe.
pub const DEFAULT_EVENT_TYPES: &[&str] = &[
    "Created",
    "Updated",
    "Removed",
    "Renamed",
    "AttributeModified",
    "OwnerModified",
    "MovedFrom",
    "MovedTo",
];

/// Resolve allow/exclude filters into the event types passed to the
/// watcher: the allowed set (default: the full universe) minus the
/// excluded set.
pub fn effective_event_types(allow: &[String], exclude: &[String]) -> Vec<String> {
    let base: Vec<String> = if allow.is_empty() {
        DEFAULT_EVENT_TYPES.iter().map(|e| e.to_string()).collect()
    } else {
        allow.to_vec()
    };
    base.into_iter()
        .filter(|event| !exclude.contains(event))
        .collect()
}

/// Build the watcher argv for the configured watch directory and filters.
///
/// `-r` recursive, `-x` event flags, `-t` timestamps; `-0` when records are
/// NUL-delimited (the default). No `--event` flags are passed when the
/// effective set is the unfiltered universe.
pub fn watcher_argv(config: &EngineConfig) -> Result<Vec<OsString>, SetupError> {
    let effective = effective_event_types(&config.allow_events, &config.exclude_events);
    if effective.is_empty() {
        return Err(SetupError::EmptyEventFilter);
    }

    let mut argv: Vec<OsString> = vec!["-r".into(), "-x".into(), "-t".into()];
    if config.delimiter == 0 {
        argv.push("-0".into());
    }
    if !config.allow_events.is_empty() || !config.exclude_events.is_empty() {
        for event in &effective {
            argv.push("--event".into());
            argv.push(event.into());
        }
    }
    argv.push(config.watch_dir.clone().into_os_string());
    Ok(argv)
}

/// A running watcher. Dropping the handle kills its process group (if
/// still alive) and reaps it.
pub struct WatcherHandle {
    child: Child,
    _guard: ProcessGuard,
}

impl WatcherHandle {
    pub fn take_stdout(&mut self) -> Option<ChildStdout> {
        self.child.stdout.take()
    }
}

impl Drop for WatcherHandle {
    fn drop(&mut self) {
        match self.child.try_wait() {
            Ok(Some(status)) => tracing::debug!("Watcher exited with {}", status),
            _ => {
                unsafe {
                    libc::killpg(self.child.id() as i32, libc::SIGTERM);
                }
                let _ = self.child.wait();
            }
        }
    }
}

/// Spawn the watcher in its own process group with piped stdout and
/// register it with the lifecycle registry.
pub fn spawn(config: &EngineConfig, registry: &ProcessRegistry) -> Result<WatcherHandle> {
    let argv = watcher_argv(config)?;

    let child = Command::new(&config.watcher_program)
        .args(&argv)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .process_group(0)
        .spawn()
        .with_context(|| {
            format!(
                "spawning watcher `{}` — is it installed?",
                config.watcher_program.to_string_lossy()
            )
        })?;

    let guard = registry.register(child.id());
    tracing::info!(
        "Watching {} (watcher `{}`, pid {})",
        config.watch_dir.display(),
        config.watcher_program.to_string_lossy(),
        child.id()
    );

    Ok(WatcherHandle {
        child,
        _guard: guard,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::CommandSpec;
    use pretty_assertions::assert_eq;
    use std::io::Read;

    fn config(dir: &std::path::Path) -> EngineConfig {
        let command = CommandSpec::from_argv(vec![
            OsString::from("/bin/sh"),
            OsString::from("-c"),
            OsString::from("true"),
        ])
        .unwrap();
        EngineConfig::new(dir.to_path_buf(), command)
    }

    #[test]
    fn test_effective_events_default_universe() {
        let effective = effective_event_types(&[], &[]);
        assert_eq!(effective.len(), DEFAULT_EVENT_TYPES.len());
    }

    #[test]
    fn test_effective_events_allow_only() {
        let allow = vec!["Created".to_string(), "Removed".to_string()];
        assert_eq!(effective_event_types(&allow, &[]), allow);
    }

    #[test]
    fn test_effective_events_exclude_subtracts_from_universe() {
        let exclude = vec!["AttributeModified".to_string(), "OwnerModified".to_string()];
        let effective = effective_event_types(&[], &exclude);
        assert_eq!(effective.len(), DEFAULT_EVENT_TYPES.len() - 2);
        assert!(!effective.contains(&"AttributeModified".to_string()));
    }

    #[test]
    fn test_effective_events_exclude_beats_allow() {
        let allow = vec!["Created".to_string(), "Updated".to_string()];
        let exclude = vec!["Updated".to_string()];
        assert_eq!(
            effective_event_types(&allow, &exclude),
            vec!["Created".to_string()]
        );
    }

    #[test]
    fn test_argv_defaults_have_no_event_flags() {
        let dir = tempfile::tempdir().unwrap();
        let argv = watcher_argv(&config(dir.path())).unwrap();
        let rendered: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(rendered[..4], ["-r", "-x", "-t", "-0"]);
        assert!(!rendered.contains(&"--event".to_string()));
        assert_eq!(rendered.last().unwrap(), &dir.path().display().to_string());
    }

    #[test]
    fn test_argv_carries_filtered_events() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.allow_events = vec!["Created".to_string()];
        let argv = watcher_argv(&cfg).unwrap();
        let rendered: Vec<String> = argv
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert!(rendered
            .windows(2)
            .any(|w| w[0] == "--event" && w[1] == "Created"));
    }

    #[test]
    fn test_argv_skips_nul_flag_for_custom_delimiter() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.delimiter = b'\n';
        let argv = watcher_argv(&cfg).unwrap();
        assert!(!argv.contains(&OsString::from("-0")));
    }

    #[test]
    fn test_argv_rejects_fully_excluded_filter() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.allow_events = vec!["Created".to_string()];
        cfg.exclude_events = vec!["Created".to_string()];
        assert!(matches!(
            watcher_argv(&cfg),
            Err(SetupError::EmptyEventFilter)
        ));
    }

    #[test]
    fn test_spawn_registers_and_pipes_stdout() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        // `true` ignores the watcher flags and exits immediately, leaving a
        // clean EOF on the piped stdout.
        cfg.watcher_program = OsString::from("true");

        let registry = ProcessRegistry::new();
        let mut handle = spawn(&cfg, &registry).unwrap();
        assert_eq!(registry.tracked(), 1);

        let mut stdout = handle.take_stdout().unwrap();
        let mut buf = Vec::new();
        stdout.read_to_end(&mut buf).unwrap();
        assert!(buf.is_empty());

        drop(handle);
        assert_eq!(registry.tracked(), 0);
    }

    #[test]
    fn test_spawn_missing_watcher_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = config(dir.path());
        cfg.watcher_program = OsString::from("/nonexistent/fsbatch-no-such-watcher");
        assert!(spawn(&cfg, &ProcessRegistry::new()).is_err());
    }
}
