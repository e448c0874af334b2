//! Shared types and low-level process utilities used by both `taskmaster-sup` and
//! `taskmaster-ctl`.

pub mod config;
pub mod error;
pub mod pid_registry;
pub mod process;
pub mod signal;
pub mod spec;

pub use error::{Error, Result};
pub use pid_registry::PidRegistry;
pub use signal::Signal;
pub use spec::{AutoRestart, LogDestination, ProgramSpec};
