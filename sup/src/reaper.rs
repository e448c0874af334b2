//! SIGCHLD reaping via the self-pipe technique.
//!
//! The actual `SIGCHLD` handler (installed by `signal_hook`) only writes a byte to a
//! `UnixStream` pair; all real work -- draining the pipe, calling `waitpid(-1, WNOHANG)` in
//! a loop, and routing each reaped pid back to its `Process` -- happens here, off the
//! signal handler, where it is safe to take locks and log.

use std::os::unix::net::UnixStream;
use std::sync::Arc;

use log::{error, warn};
use signal_hook::consts::SIGCHLD;
use signal_hook::low_level::pipe;
use taskmaster_core::process::try_reap_any;
use taskmaster_core::PidRegistry;

use crate::process::Process;

/// Spawns the reaper thread and returns a `UnixStream` end that the control loop's
/// `nix::poll` set can also watch, in case the caller wants to react to child exits
/// without its own dedicated thread. The reaper here runs independently, draining its own
/// end of the pair.
pub fn spawn(registry: Arc<PidRegistry<Arc<Process>>>) -> std::io::Result<()> {
    let (mut receiver, sender) = UnixStream::pair()?;
    pipe::register(SIGCHLD, sender)?;

    std::thread::Builder::new()
        .name("sigchld-reaper".to_string())
        .spawn(move || reap_loop(&mut receiver, &registry))?;
    Ok(())
}

fn reap_loop(receiver: &mut UnixStream, registry: &Arc<PidRegistry<Arc<Process>>>) {
    use std::io::Read;
    let mut buf = [0u8; 128];
    loop {
        match receiver.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => drain_exits(registry),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("sigchld reaper: error reading self-pipe: {e}");
                return;
            }
        }
    }
}

fn drain_exits(registry: &Arc<PidRegistry<Arc<Process>>>) {
    loop {
        match try_reap_any() {
            Ok(Some(reaped)) => match registry.remove(reaped.pid) {
                Some(process) => process.on_exit(reaped.exit_code, registry),
                None => warn!("reaped unknown pid {} (exit code {})", reaped.pid, reaped.exit_code),
            },
            Ok(None) => return,
            Err(e) => {
                error!("waitpid failed: {e}");
                return;
            }
        }
    }
}
