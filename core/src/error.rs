//! Crate-wide error type for `taskmaster-core`.
//!
//! Mirrors the teacher's hand-rolled `error::{Error, Result}` pattern (see
//! `habitat_core`/`habitat_sup`), but leans on `thiserror` instead of a macro to generate
//! the `Display`/`std::error::Error` boilerplate.

use std::path::PathBuf;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("signal {0:?} could not be delivered to pid {1}: {2}")]
    SignalDelivery(crate::signal::Signal, libc::pid_t, nix::errno::Errno),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while locating, parsing, or validating the configuration file.
///
/// Kept separate from the top-level `Error` so that `Supervisor::reload` can match on
/// `ConfigError` specifically: per spec.md §7, a configuration error must never partially
/// apply -- the daemon logs it and keeps running the previous configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error(
        "no configuration file found; searched {}",
        .0.iter().map(|p| p.display().to_string()).collect::<Vec<_>>().join(", ")
    )]
    NotFound(Vec<PathBuf>),

    #[error("failed to read configuration file '{path}': {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse configuration file '{path}': {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("program '{name}' has no 'command' entries")]
    EmptyCommand { name: String },

    #[error("program '{name}' has an unrecognized stopsignal '{signal}'")]
    UnknownSignal { name: String, signal: String },

    #[error("program '{name}' has an invalid umask '{umask}'")]
    InvalidUmask { name: String, umask: String },

    #[error("program '{name}' has an unrecognized autorestart value '{value}' (expected always, unexpected, or never)")]
    UnknownAutoRestart { name: String, value: String },

    #[error("program '{name}' stdout_logfile parent directory '{parent}' does not exist")]
    StdoutLogDirMissing { name: String, parent: PathBuf },

    #[error("program '{name}' stderr_logfile parent directory '{parent}' does not exist")]
    StderrLogDirMissing { name: String, parent: PathBuf },

    #[error("program '{name}' numprocs must be a positive integer, got {value}")]
    InvalidNumProcs { name: String, value: i64 },
}
