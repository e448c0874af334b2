//! Process supervision engine: the per-process state machine, group/program model,
//! SIGCHLD reaping, config reload, and the control-socket dispatcher.

pub mod control;
pub mod dispatcher;
pub mod error;
pub mod group;
pub mod logpipe;
pub mod process;
pub mod reaper;
pub mod supervisor;
pub mod timer;

pub use error::{Error, Result};
pub use supervisor::Supervisor;
