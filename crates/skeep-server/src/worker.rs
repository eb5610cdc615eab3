//! Per-connection request handling.
//!
//! Every connection is a one-shot transaction: Idle -> Reading-line ->
//! Dispatched(get|set) -> Responding -> Closed. `set` is the only command
//! that consumes bytes after the command line (the value, binary-safe, to
//! EOF). A request error never takes a worker down; it becomes a wire
//! status and the connection closes.

use std::io::{BufReader, Read, Write};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::Relaxed;
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError};
use skeep_protocol::{Command, Error as ProtocolError, Status, read_request_line};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use crate::context::ServerContext;
use crate::store::StoreError;

/// How long a worker blocks on the intake channel before rechecking the
/// shutdown flag.
const POLL_INTERVAL: Duration = Duration::from_millis(350);

/// Per-connection socket read budget; a stalled client does not pin a
/// worker forever.
const READ_TIMEOUT: Duration = Duration::from_secs(30);

pub fn worker_loop(
    intake: Receiver<UnixStream>,
    ctx: Arc<ServerContext>,
    keep_running: Arc<AtomicBool>,
) {
    while keep_running.load(Relaxed) {
        match intake.recv_timeout(POLL_INTERVAL) {
            Ok(stream) => handle_connection(stream, &ctx),
            Err(RecvTimeoutError::Timeout) => {}
            Err(RecvTimeoutError::Disconnected) => break,
        }
    }
}

pub fn handle_connection(stream: UnixStream, ctx: &ServerContext) {
    if let Err(e) = serve(&stream, ctx) {
        debug!("connection dropped: {e}");
    }
}

fn serve(stream: &UnixStream, ctx: &ServerContext) -> std::io::Result<()> {
    stream.set_read_timeout(Some(READ_TIMEOUT))?;
    let mut reader = BufReader::new(stream);
    let mut writer = stream;

    let line = match read_request_line(&mut reader) {
        Ok(line) => line,
        Err(ProtocolError::Io(e)) => return Err(e),
        Err(_) => return writer.write_all(Status::InvalidSyntax.as_bytes()),
    };

    match Command::parse(&line) {
        Ok(Command::Get(key)) => handle_get(writer, ctx, &key),
        Ok(Command::Set(key)) => handle_set(reader, writer, ctx, &key),
        Err(ProtocolError::UnknownCommand(verb)) => {
            debug!("unknown command '{verb}'");
            writer.write_all(Status::Error.as_bytes())
        }
        Err(_) => writer.write_all(Status::InvalidSyntax.as_bytes()),
    }
}

fn handle_get(mut out: &UnixStream, ctx: &ServerContext, key: &str) -> std::io::Result<()> {
    if !ctx.settings.access_read {
        return out.write_all(Status::AccessDenied.as_bytes());
    }

    if let Some(value) = ctx.cache.get(key) {
        return out.write_all(&value);
    }

    match ctx.store.get(key, &ctx.catalog()) {
        Ok(value) => {
            ctx.cache.insert(key, &value);
            out.write_all(&value)
        }
        // A miss closes the connection with no reply body
        Err(StoreError::NoSuchKey(_)) => Ok(()),
        Err(e) => {
            warn!("get '{key}': {e}");
            Ok(())
        }
    }
}

fn handle_set(
    mut reader: BufReader<&UnixStream>,
    mut out: &UnixStream,
    ctx: &ServerContext,
    key: &str,
) -> std::io::Result<()> {
    if !ctx.settings.access_write {
        return out.write_all(Status::AccessDenied.as_bytes());
    }

    let mut value = Zeroizing::new(Vec::new());
    if let Err(e) = reader.read_to_end(&mut value) {
        warn!("set '{key}': reading value failed: {e}");
        return out.write_all(Status::NotStored.as_bytes());
    }

    match ctx.store.put(key, &value, &ctx.catalog()) {
        Ok(()) => {
            ctx.cache.insert(key, &value);
            out.write_all(Status::Stored.as_bytes())
        }
        Err(e) => {
            warn!("set '{key}': {e}");
            out.write_all(Status::NotStored.as_bytes())
        }
    }
}
