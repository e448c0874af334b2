//! The control endpoint: a `UnixListener` serving one client connection at a time,
//! polled alongside two operator-signal self-pipes with `nix::poll`. No async runtime --
//! this is the one readiness-selection loop the whole daemon blocks on after startup.

use std::io::{BufRead, BufReader, Read, Write};
use std::os::fd::AsFd;
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, info, warn};
use nix::poll::{poll, PollFd, PollFlags, PollTimeout};
use signal_hook::consts::{SIGHUP, SIGINT, SIGQUIT, SIGTERM};
use signal_hook::low_level::pipe;

use crate::dispatcher;
use crate::supervisor::Supervisor;

/// Runs until a termination signal (`SIGTERM`/`SIGINT`/`SIGQUIT`) is received, then
/// gracefully stops every managed process and returns. `SIGHUP` triggers a reload and
/// keeps the loop running.
pub fn run(supervisor: &Arc<Supervisor>, socket_path: &Path) -> std::io::Result<()> {
    if socket_path.exists() {
        std::fs::remove_file(socket_path)?;
    }
    let listener = UnixListener::bind(socket_path)?;
    listener.set_nonblocking(true)?;
    info!("control endpoint listening on {}", socket_path.display());

    let (term_rx, term_tx) = UnixStream::pair()?;
    term_rx.set_nonblocking(true)?;
    for signal in [SIGTERM, SIGINT, SIGQUIT] {
        pipe::register(signal, term_tx.try_clone()?)?;
    }

    let (hup_rx, hup_tx) = UnixStream::pair()?;
    hup_rx.set_nonblocking(true)?;
    pipe::register(SIGHUP, hup_tx)?;

    let mut client: Option<(UnixStream, BufReader<UnixStream>)> = None;

    loop {
        let mut fds = vec![
            PollFd::new(listener.as_fd(), PollFlags::POLLIN),
            PollFd::new(term_rx.as_fd(), PollFlags::POLLIN),
            PollFd::new(hup_rx.as_fd(), PollFlags::POLLIN),
        ];
        if let Some((stream, _)) = &client {
            fds.push(PollFd::new(stream.as_fd(), PollFlags::POLLIN));
        }

        match poll(&mut fds, PollTimeout::NONE) {
            Ok(_) => {}
            Err(nix::errno::Errno::EINTR) => continue,
            Err(e) => {
                warn!("poll failed: {e}");
                continue;
            }
        }

        if revents_contain(&fds[1], PollFlags::POLLIN) {
            drain(&term_rx);
            info!("received termination signal, stopping all managed processes");
            supervisor.stop_all();
            return Ok(());
        }

        if revents_contain(&fds[2], PollFlags::POLLIN) {
            drain(&hup_rx);
            info!("received SIGHUP, reloading configuration");
            if let Err(e) = supervisor.reload() {
                warn!("reload failed: {e}");
            }
        }

        if revents_contain(&fds[0], PollFlags::POLLIN) {
            accept_one(&listener, &mut client);
        }

        if fds.len() == 4 && revents_contain(&fds[3], PollFlags::POLLIN) {
            service_client(supervisor, &mut client);
        }
    }
}

fn revents_contain(fd: &PollFd, flag: PollFlags) -> bool {
    fd.revents().map(|r| r.contains(flag)).unwrap_or(false)
}

fn drain(stream: &UnixStream) {
    use std::io::Read;
    let mut reader = stream;
    let mut buf = [0u8; 64];
    loop {
        match reader.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => continue,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => return,
            Err(_) => return,
        }
    }
}

fn accept_one(listener: &UnixListener, client: &mut Option<(UnixStream, BufReader<UnixStream>)>) {
    match listener.accept() {
        Ok((stream, _addr)) => {
            if client.is_some() {
                debug!("rejecting extra control connection; one is already attached");
                let mut stream = stream;
                let _ = stream.write_all(b"error: another client is already attached\n");
                return;
            }
            match stream.try_clone() {
                Ok(reader_stream) => {
                    *client = Some((stream, BufReader::new(reader_stream)));
                }
                Err(e) => warn!("failed to clone client stream: {e}"),
            }
        }
        Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
        Err(e) => warn!("accept failed: {e}"),
    }
}

fn service_client(supervisor: &Arc<Supervisor>, client: &mut Option<(UnixStream, BufReader<UnixStream>)>) {
    let mut disconnect = false;
    let mut attach_path: Option<(UnixStream, PathBuf)> = None;

    if let Some((stream, reader)) = client.as_mut() {
        let mut line = String::new();
        match reader.read_line(&mut line) {
            Ok(0) => disconnect = true,
            Ok(_) => {
                let trimmed = line.trim();
                if let Some(target) = trimmed.strip_prefix("attach ").map(str::trim) {
                    match dispatcher::resolve_attach(supervisor, target) {
                        Ok(path) => {
                            let _ = stream.write_all(format!("ok: tailing {}\n", path.display()).as_bytes());
                            // Hand the raw stream off to a dedicated tail loop; the poll
                            // loop stops tracking this connection entirely.
                            attach_path = Some((stream.try_clone().expect("client stream clone"), path));
                            disconnect = true;
                        }
                        Err(e) => {
                            if stream.write_all(e.as_bytes()).is_err() || stream.write_all(b".\n").is_err() {
                                disconnect = true;
                            }
                        }
                    }
                } else if trimmed == "quit" || trimmed == "exit" {
                    let _ = stream.write_all(b"goodbye\n.\n");
                    disconnect = true;
                } else {
                    let reply = dispatcher::dispatch(supervisor, &line);
                    if stream.write_all(reply.as_bytes()).is_err() || stream.write_all(b".\n").is_err() {
                        disconnect = true;
                    }
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => disconnect = true,
        }
    }

    if let Some((stream, path)) = attach_path {
        std::thread::spawn(move || tail_follow(stream, &path));
    }

    if disconnect {
        *client = None;
    }
}

/// Stream newly appended bytes from `path` to `stream` until the client disconnects or
/// sends any further bytes (treated as a cancellation per spec.md §4.3 `attach`). Runs on
/// its own thread so the main poll loop keeps serving other connections and signals.
fn tail_follow(mut stream: UnixStream, path: &Path) {
    let mut file = match std::fs::File::open(path) {
        Ok(f) => f,
        Err(e) => {
            let _ = stream.write_all(format!("error: could not open {}: {e}\n", path.display()).as_bytes());
            return;
        }
    };
    use std::io::{Seek, SeekFrom};
    if let Err(e) = file.seek(SeekFrom::End(0)) {
        warn!("attach: failed to seek {}: {e}", path.display());
        return;
    }
    if stream.set_nonblocking(true).is_err() {
        return;
    }

    let mut buf = [0u8; 4096];
    loop {
        match stream.read(&mut buf) {
            Ok(0) => return,
            Ok(_) => return,
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {}
            Err(_) => return,
        }

        match file.read(&mut buf) {
            Ok(0) => std::thread::sleep(Duration::from_millis(200)),
            Ok(n) => {
                if stream.write_all(&buf[..n]).is_err() {
                    return;
                }
            }
            Err(_) => return,
        }
    }
}
