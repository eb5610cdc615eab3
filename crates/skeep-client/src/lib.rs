//! Library half of the `skeep` CLI: a minimal client for the skeepd
//! socket protocol. One connection per operation, matching the server's
//! one-shot transaction model.

#![forbid(unsafe_code)]

pub mod args;

use std::io::{BufReader, Read, Write};
use std::net::Shutdown;
use std::os::unix::net::UnixStream;
use std::path::PathBuf;

use skeep_protocol::{Status, is_valid_key, read_request_line};

#[derive(thiserror::Error, Debug)]
pub enum ClientError {
    #[error("{0}")]
    Io(#[from] std::io::Error),

    #[error("invalid secret name '{0}'")]
    InvalidKey(String),

    #[error("server rejected the request: {0:?}")]
    Rejected(Status),

    #[error("unexpected server response")]
    Protocol,
}

pub struct Client {
    socket: PathBuf,
}

impl Client {
    pub fn new(socket: impl Into<PathBuf>) -> Client {
        Client {
            socket: socket.into(),
        }
    }

    /// Fetch a secret's plaintext. `Ok(None)` is a miss (the server
    /// closes without writing anything).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>, ClientError> {
        check_key(key)?;

        let mut stream = UnixStream::connect(&self.socket)?;
        stream.write_all(format!("get {key}\r\n").as_bytes())?;
        stream.shutdown(Shutdown::Write)?;

        let mut response = Vec::new();
        stream.read_to_end(&mut response)?;

        if response.is_empty() {
            return Ok(None);
        }
        // The wire format carries no framing for get responses; a stored
        // value that happens to equal a status line is indistinguishable
        // from the status itself.
        if response == Status::AccessDenied.as_bytes()
            || response == Status::InvalidSyntax.as_bytes()
        {
            let line = String::from_utf8_lossy(&response);
            let status = Status::from_line(line.trim_end()).ok_or(ClientError::Protocol)?;
            return Err(ClientError::Rejected(status));
        }
        Ok(Some(response))
    }

    /// Store a secret. The value rides after the command line, binary
    /// safe, terminated by half-closing the connection.
    pub fn set(&self, key: &str, value: &[u8]) -> Result<(), ClientError> {
        check_key(key)?;

        let stream = UnixStream::connect(&self.socket)?;
        let mut writer = &stream;
        writer.write_all(format!("set {key}\r\n").as_bytes())?;
        writer.write_all(value)?;
        stream.shutdown(Shutdown::Write)?;

        let mut reader = BufReader::new(&stream);
        let line = read_request_line(&mut reader).map_err(|_| ClientError::Protocol)?;
        let line = String::from_utf8_lossy(&line);

        match Status::from_line(&line) {
            Some(Status::Stored) => Ok(()),
            Some(status) => Err(ClientError::Rejected(status)),
            None => Err(ClientError::Protocol),
        }
    }
}

fn check_key(key: &str) -> Result<(), ClientError> {
    if is_valid_key(key) {
        Ok(())
    } else {
        Err(ClientError::InvalidKey(key.to_string()))
    }
}
