//! A thin synchronous client for the control socket: one request, one line-delimited
//! reply, per round trip.

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;

use crate::error::{Error, Result};

pub struct Client {
    stream: UnixStream,
    reader: BufReader<UnixStream>,
}

impl Client {
    pub fn connect(socket_path: &Path) -> Result<Client> {
        let stream = UnixStream::connect(socket_path).map_err(|source| Error::Connect {
            path: socket_path.to_path_buf(),
            source,
        })?;
        let reader = BufReader::new(stream.try_clone()?);
        Ok(Client { stream, reader })
    }

    /// Send one command line and return the daemon's reply. Every reply is terminated by
    /// a line containing a single `.`, which this strips before returning.
    pub fn send(&mut self, command: &str) -> Result<String> {
        writeln!(self.stream, "{command}")?;
        let mut reply = String::new();
        loop {
            let mut line = String::new();
            let n = self.reader.read_line(&mut line)?;
            if n == 0 {
                break;
            }
            if line.trim_end_matches('\n') == "." {
                break;
            }
            reply.push_str(&line);
        }
        Ok(reply)
    }
}
