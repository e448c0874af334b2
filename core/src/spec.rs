//! `ProgramSpec`: the validated, immutable per-program configuration record.
//!
//! Field set and defaults exactly as spec.md §3. Generalizes the teacher's
//! `manager::service::spec::ServiceSpec` (an immutable, validated record built from a
//! raw on-disk representation) to this system's program/group model.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::ConfigError;
use crate::signal::Signal;

/// Restart policy for a program once it has reached `running`. See spec.md §4.1's
/// `on_sigchld` table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AutoRestart {
    Always,
    Unexpected,
    Never,
}

impl AutoRestart {
    fn parse(s: &str) -> Option<AutoRestart> {
        match s {
            "always" => Some(AutoRestart::Always),
            "unexpected" => Some(AutoRestart::Unexpected),
            "never" => Some(AutoRestart::Never),
            _ => None,
        }
    }
}

/// Where a child's stdout/stderr is redirected. See spec.md §6 "Child I/O".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LogDestination {
    /// Open a uniquely-named temp file with the process name as prefix.
    Auto,
    /// `dup2` onto `/dev/null`.
    None,
    /// Open this path for writing; falls back to `/dev/null` if it cannot be opened.
    Path(PathBuf),
}

impl LogDestination {
    fn parse(raw: &str) -> LogDestination {
        match raw {
            "AUTO" => LogDestination::Auto,
            "NONE" => LogDestination::None,
            other => LogDestination::Path(PathBuf::from(other)),
        }
    }
}

/// Directly `Deserialize`-able mirror of a program's YAML entry. Every field is
/// optional; `ProgramSpec::from_raw` applies defaults and validates.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RawProgramSpec {
    pub command: Vec<String>,
    pub numprocs: Option<i64>,
    pub autostart: Option<bool>,
    pub autorestart: Option<String>,
    pub exitcodes: Option<Vec<i32>>,
    pub startsecs: Option<u64>,
    pub startretries: Option<u32>,
    pub stopsignal: Option<String>,
    pub stopwaitsecs: Option<u64>,
    pub stdout_logfile: Option<String>,
    pub stderr_logfile: Option<String>,
    pub environment: Option<HashMap<String, String>>,
    pub directory: Option<String>,
    pub umask: Option<String>,
}

/// The validated, immutable configuration record for one program.
///
/// Once constructed, a `ProgramSpec` never changes; reconfiguration always produces a
/// fresh one and replaces the owning `Group` wholesale (spec.md §3's "Group's process
/// set is fixed for its lifetime; reconfiguration replaces the Group object wholesale").
#[derive(Debug, Clone, PartialEq)]
pub struct ProgramSpec {
    pub name: String,
    pub command: Vec<String>,
    pub numprocs: u32,
    pub autostart: bool,
    pub autorestart: AutoRestart,
    pub exitcodes: Vec<i32>,
    pub startsecs: u64,
    pub startretries: u32,
    pub stopsignal: Signal,
    pub stopwaitsecs: u64,
    pub stdout_logfile: LogDestination,
    pub stderr_logfile: LogDestination,
    pub environment: HashMap<String, String>,
    pub directory: Option<PathBuf>,
    pub umask: Option<u32>,
}

impl ProgramSpec {
    pub fn from_raw(name: &str, raw: RawProgramSpec) -> Result<ProgramSpec, ConfigError> {
        if raw.command.is_empty() {
            return Err(ConfigError::EmptyCommand {
                name: name.to_string(),
            });
        }

        let numprocs = raw.numprocs.unwrap_or(1);
        if numprocs <= 0 {
            return Err(ConfigError::InvalidNumProcs {
                name: name.to_string(),
                value: numprocs,
            });
        }

        let autorestart = match raw.autorestart.as_deref() {
            None => AutoRestart::Unexpected,
            Some(value) => AutoRestart::parse(value).ok_or_else(|| ConfigError::UnknownAutoRestart {
                name: name.to_string(),
                value: value.to_string(),
            })?,
        };

        let stopsignal = match raw.stopsignal.as_deref() {
            None => Signal::default_stop(),
            Some(value) => Signal::parse_for(value, name)?,
        };

        let umask = match raw.umask.as_deref() {
            None => None,
            Some(value) => Some(u32::from_str_radix(value, 8).map_err(|_| ConfigError::InvalidUmask {
                name: name.to_string(),
                umask: value.to_string(),
            })?),
        };

        let stdout_logfile = LogDestination::parse(raw.stdout_logfile.as_deref().unwrap_or("AUTO"));
        if let LogDestination::Path(ref path) = stdout_logfile {
            validate_parent_exists(path).map_err(|parent| ConfigError::StdoutLogDirMissing {
                name: name.to_string(),
                parent,
            })?;
        }

        let stderr_logfile = LogDestination::parse(raw.stderr_logfile.as_deref().unwrap_or("AUTO"));
        if let LogDestination::Path(ref path) = stderr_logfile {
            validate_parent_exists(path).map_err(|parent| ConfigError::StderrLogDirMissing {
                name: name.to_string(),
                parent,
            })?;
        }

        Ok(ProgramSpec {
            name: name.to_string(),
            command: raw.command,
            numprocs: numprocs as u32,
            autostart: raw.autostart.unwrap_or(true),
            autorestart,
            exitcodes: raw.exitcodes.unwrap_or_else(|| vec![0]),
            startsecs: raw.startsecs.unwrap_or(1),
            startretries: raw.startretries.unwrap_or(3),
            stopsignal,
            stopwaitsecs: raw.stopwaitsecs.unwrap_or(10),
            stdout_logfile,
            stderr_logfile,
            environment: raw.environment.unwrap_or_default(),
            directory: raw.directory.map(PathBuf::from),
            umask,
        })
    }

    /// External name for the `index`-th sibling in this program's group, e.g. `alpha0`.
    pub fn process_name(&self, index: u32) -> String {
        format!("{}{}", self.name, index)
    }

    pub fn is_expected_exit(&self, exit_code: i32) -> bool {
        self.exitcodes.contains(&exit_code)
    }
}

fn validate_parent_exists(path: &Path) -> Result<(), PathBuf> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() || parent.is_dir() => Ok(()),
        Some(parent) => Err(parent.to_path_buf()),
        None => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn raw_with_command() -> RawProgramSpec {
        RawProgramSpec {
            command: vec!["sleep".to_string(), "60".to_string()],
            ..Default::default()
        }
    }

    #[test]
    fn applies_documented_defaults() {
        let spec = ProgramSpec::from_raw("alpha", raw_with_command()).unwrap();
        assert_eq!(spec.numprocs, 1);
        assert!(spec.autostart);
        assert_eq!(spec.autorestart, AutoRestart::Unexpected);
        assert_eq!(spec.exitcodes, vec![0]);
        assert_eq!(spec.startsecs, 1);
        assert_eq!(spec.startretries, 3);
        assert_eq!(spec.stopsignal, Signal::TERM);
        assert_eq!(spec.stopwaitsecs, 10);
        assert_eq!(spec.stdout_logfile, LogDestination::Auto);
        assert_eq!(spec.stderr_logfile, LogDestination::Auto);
    }

    #[test]
    fn rejects_empty_command() {
        let raw = RawProgramSpec::default();
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::EmptyCommand { .. }));
    }

    #[test]
    fn rejects_zero_numprocs() {
        let mut raw = raw_with_command();
        raw.numprocs = Some(0);
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidNumProcs { .. }));
    }

    #[test]
    fn rejects_unknown_autorestart() {
        let mut raw = raw_with_command();
        raw.autorestart = Some("sometimes".to_string());
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownAutoRestart { .. }));
    }

    #[test]
    fn rejects_unknown_stopsignal() {
        let mut raw = raw_with_command();
        raw.stopsignal = Some("BOGUS".to_string());
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::UnknownSignal { .. }));
    }

    #[test]
    fn rejects_invalid_umask() {
        let mut raw = raw_with_command();
        raw.umask = Some("99x".to_string());
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidUmask { .. }));
    }

    #[test]
    fn parses_valid_octal_umask() {
        let mut raw = raw_with_command();
        raw.umask = Some("022".to_string());
        let spec = ProgramSpec::from_raw("alpha", raw).unwrap();
        assert_eq!(spec.umask, Some(0o022));
    }

    #[test]
    fn process_name_concatenates_index() {
        let spec = ProgramSpec::from_raw("alpha", raw_with_command()).unwrap();
        assert_eq!(spec.process_name(0), "alpha0");
        assert_eq!(spec.process_name(1), "alpha1");
    }

    #[test]
    fn rejects_logfile_with_missing_parent_dir() {
        let mut raw = raw_with_command();
        raw.stdout_logfile = Some("/no/such/dir/out.log".to_string());
        let err = ProgramSpec::from_raw("alpha", raw).unwrap_err();
        assert!(matches!(err, ConfigError::StdoutLogDirMissing { .. }));
    }
}
