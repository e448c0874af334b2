//! Resolves a program's `LogDestination` to an open file descriptor suitable for the
//! child's stdout/stderr, per spec.md §6 "Child I/O".

use std::fs::OpenOptions;
use std::os::unix::io::{IntoRawFd, RawFd};
use std::path::{Path, PathBuf};

use log::warn;
use taskmaster_core::spec::LogDestination;

/// Opens the destination described by `dest` for a given `process_name`/`stream` pair
/// (e.g. `alpha0`/`stdout`), falling back to `/dev/null` if a literal path cannot be
/// opened, matching spec.md's "falls back to /dev/null" edge case. Returns the resolved
/// path alongside the fd when the destination is a real file on disk (`AUTO` or a literal
/// path) so that `attach` can later tail it; `NONE` and a failed-open fallback carry no
/// path.
pub fn open_destination(dest: &LogDestination, process_name: &str, stream: &str) -> (RawFd, Option<PathBuf>) {
    match dest {
        LogDestination::None => (open_dev_null(), None),
        LogDestination::Auto => open_auto(process_name, stream),
        LogDestination::Path(path) => match open_path(path) {
            Some(fd) => (fd, Some(path.clone())),
            None => {
                warn!(
                    "{}: could not open {} logfile '{}', falling back to /dev/null",
                    process_name,
                    stream,
                    path.display()
                );
                (open_dev_null(), None)
            }
        },
    }
}

/// `stdout_logfile = "AUTO"`: a uniquely-named temp file with the process name as
/// prefix and a `.stdout`/`.stderr` suffix matching the stream, per spec.md §6. The
/// returned path stays valid on disk (unlike `NamedTempFile::into_file`, which would
/// unlink it) so `attach` can open and tail it later.
fn open_auto(process_name: &str, stream: &str) -> (RawFd, Option<PathBuf>) {
    let suffix = format!(".{stream}");
    match tempfile::Builder::new()
        .prefix(process_name)
        .suffix(&suffix)
        .tempfile()
    {
        Ok(named) => match named.keep() {
            Ok((file, path)) => (file.into_raw_fd(), Some(path)),
            Err(e) => {
                warn!("{process_name}: could not persist auto {stream} logfile: {e}, falling back to /dev/null");
                (open_dev_null(), None)
            }
        },
        Err(e) => {
            warn!("{process_name}: could not create auto {stream} logfile: {e}, falling back to /dev/null");
            (open_dev_null(), None)
        }
    }
}

fn open_path(path: &Path) -> Option<RawFd> {
    OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .ok()
        .map(|f| f.into_raw_fd())
}

fn open_dev_null() -> RawFd {
    OpenOptions::new()
        .write(true)
        .open("/dev/null")
        .expect("/dev/null must always be openable")
        .into_raw_fd()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::FromRawFd;

    #[test]
    fn auto_destination_leaves_a_tailable_path_on_disk() {
        let (fd, path) = open_auto("alpha0", "stdout");
        let path = path.expect("auto destination should resolve to a path");
        assert!(path.exists());
        assert!(path.to_string_lossy().ends_with(".stdout"));
        unsafe {
            drop(std::fs::File::from_raw_fd(fd));
        }
        let _ = std::fs::remove_file(&path);
    }

    #[test]
    fn none_destination_has_no_path() {
        let (fd, path) = open_destination(&LogDestination::None, "alpha0", "stdout");
        assert!(path.is_none());
        unsafe {
            drop(std::fs::File::from_raw_fd(fd));
        }
    }
}
