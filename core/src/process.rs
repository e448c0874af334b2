//! Low-level, OS-facing process utilities shared by the supervisor and its tests.
//!
//! Generalizes `habitat_core::os::process` (which exposed `is_alive`/signal helpers for
//! the launcher) on top of `nix` rather than hand-written `libc` calls.

use nix::sys::signal::kill;
use nix::sys::wait::{waitpid, WaitPidFlag, WaitStatus};
use nix::unistd::Pid;

/// True if a process with the given pid exists and is signalable by us.
///
/// Sends the null signal (`kill(pid, 0)`), which performs existence/permission checks
/// without actually delivering a signal.
pub fn is_alive(pid: libc::pid_t) -> bool {
    match kill(Pid::from_raw(pid), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::EPERM) => true,
        Err(_) => false,
    }
}

/// The outcome of reaping one child.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reaped {
    pub pid: libc::pid_t,
    pub exit_code: i32,
}

/// Non-blocking equivalent of `waitpid(-1, WNOHANG)`: reaps at most one already-dead
/// child. Returns `Ok(None)` when no child is ready to be reaped (`WaitStatus::StillAlive`),
/// and folds `Exited`/`Signaled` into a single normalized exit code.
pub fn try_reap_any() -> nix::Result<Option<Reaped>> {
    match waitpid(Pid::from_raw(-1), Some(WaitPidFlag::WNOHANG)) {
        Ok(WaitStatus::Exited(pid, code)) => Ok(Some(Reaped {
            pid: pid.as_raw(),
            exit_code: code,
        })),
        Ok(WaitStatus::Signaled(pid, signal, _)) => Ok(Some(Reaped {
            pid: pid.as_raw(),
            // Shell convention: signal-terminated exit codes are reported as 128+signal.
            exit_code: 128 + signal as i32,
        })),
        Ok(WaitStatus::StillAlive) => Ok(None),
        Ok(_) => Ok(None),
        Err(nix::errno::Errno::ECHILD) => Ok(None),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn current_process_is_alive() {
        assert!(is_alive(std::process::id() as libc::pid_t));
    }

    #[test]
    fn bogus_pid_is_not_alive() {
        // PID 1 always exists but we don't own it typically; instead pick an
        // implausibly large pid that cannot be running.
        assert!(!is_alive(i32::MAX - 1));
    }
}
