//! Crate-wide error type for `taskmaster-sup`.

use std::path::PathBuf;

use taskmaster_core::error::ConfigError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to fork/exec '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: nix::errno::Errno,
    },

    #[error("control socket path '{0}' is already in use by a running daemon")]
    SocketInUse(PathBuf),

    #[error("unknown command: {0}")]
    UnknownCommand(String),

    #[error("no such program or group: {0}")]
    NoSuchProcess(String),

    #[error("{0}")]
    BadArguments(String),

    #[error(transparent)]
    TaskmasterCore(#[from] taskmaster_core::error::Error),
}
