//! The accepting supervisor and its worker pool.
//!
//! The supervisor owns the listening socket; workers take accepted
//! connections from a bounded channel and run one transaction each. All
//! shared state lives in the [`ServerContext`]; the persistent store is
//! the source of truth, so nothing a worker caches needs to be visible to
//! its siblings.

use std::fs;
use std::os::unix::fs::{FileTypeExt, PermissionsExt};
use std::os::unix::net::{UnixListener, UnixStream};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering::{AcqRel, Acquire, Release};
use std::time::Duration;

use crossbeam_channel::bounded;
use tracing::{debug, info, warn};

use crate::context::ServerContext;
use crate::worker;

/// Set by the SIGHUP handler. The supervisor rebuilds the token catalogue
/// before accepting further connections when it sees this; storage and
/// cache are left alone.
pub static RELOAD_TOKENS: AtomicBool = AtomicBool::new(false);

const ACCEPT_POLL: Duration = Duration::from_millis(50);

#[derive(thiserror::Error, Debug)]
pub enum ServerError {
    #[error("{path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("spawning worker: {0}")]
    Spawn(std::io::Error),
}

pub struct Server {
    ctx: Arc<ServerContext>,
    keep_running: Arc<AtomicBool>,
    reload: Arc<AtomicBool>,
}

impl Server {
    pub fn new(ctx: Arc<ServerContext>) -> Server {
        Server {
            ctx,
            keep_running: Arc::new(AtomicBool::new(true)),
            reload: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Flag that stops the accept loop when cleared. Handed to the signal
    /// handler.
    pub fn shutdown_handle(&self) -> Arc<AtomicBool> {
        self.keep_running.clone()
    }

    /// Per-instance reload trigger, equivalent to SIGHUP for this server
    /// only.
    pub fn reload_handle(&self) -> Arc<AtomicBool> {
        self.reload.clone()
    }

    pub fn run(&self) -> Result<(), ServerError> {
        let listener = self.bind()?;
        let settings = &self.ctx.settings;

        // Each worker takes one connection at a time; a small buffer
        // absorbs accept bursts without unbounded queueing.
        let (intake_tx, intake_rx) = bounded::<UnixStream>(settings.max_servers * 2);

        let mut workers = Vec::with_capacity(settings.max_servers);
        for i in 0..settings.max_servers {
            let intake = intake_rx.clone();
            let ctx = self.ctx.clone();
            let keep_running = self.keep_running.clone();

            let handle = std::thread::Builder::new()
                .name(format!("worker-{i}"))
                .spawn(move || worker::worker_loop(intake, ctx, keep_running))
                .map_err(ServerError::Spawn)?;
            workers.push(handle);
        }
        drop(intake_rx);

        info!(
            "serving namespace '{}' on {} with {} worker(s)",
            settings.namespace,
            settings.socket_file.display(),
            settings.max_servers
        );

        while self.keep_running.load(Acquire) {
            if RELOAD_TOKENS.swap(false, AcqRel) | self.reload.swap(false, AcqRel) {
                self.ctx.reload_tokens();
            }

            match listener.accept() {
                Ok((stream, _addr)) => {
                    if intake_tx.send_timeout(stream, Duration::from_secs(5)).is_err() {
                        warn!("worker pool saturated, dropping connection");
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!("accept failed: {e}");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        info!("shutting down, draining workers");
        drop(intake_tx);
        for handle in workers {
            let _ = handle.join();
        }
        self.cleanup();
        info!("server finished");
        Ok(())
    }

    fn bind(&self) -> Result<UnixListener, ServerError> {
        let settings = &self.ctx.settings;
        let path = &settings.socket_file;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|source| io_err(parent, source))?;
            }
        }

        // A socket file left by a dead instance is removed; anything else
        // at that path is someone else's file and a hard error.
        match fs::symlink_metadata(path) {
            Ok(meta) if meta.file_type().is_socket() => {
                debug!("removing stale socket {}", path.display());
                fs::remove_file(path).map_err(|source| io_err(path, source))?;
            }
            Ok(_) => {
                return Err(io_err(
                    path,
                    std::io::Error::new(
                        std::io::ErrorKind::AlreadyExists,
                        "exists and is not a socket",
                    ),
                ));
            }
            Err(_) => {}
        }

        let listener = UnixListener::bind(path).map_err(|source| io_err(path, source))?;
        listener
            .set_nonblocking(true)
            .map_err(|source| io_err(path, source))?;

        fs::set_permissions(path, fs::Permissions::from_mode(settings.socket_mode))
            .map_err(|source| io_err(path, source))?;
        debug!(
            "socket mode set to {:04o} on {}",
            settings.socket_mode,
            path.display()
        );

        fs::write(&settings.pid_file, format!("{}\n", std::process::id()))
            .map_err(|source| io_err(&settings.pid_file, source))?;

        if let Some(user) = &settings.user {
            info!(
                "configured service identity: {}:{}",
                user,
                settings.group.as_deref().unwrap_or("-")
            );
        }

        Ok(listener)
    }

    fn cleanup(&self) {
        let _ = fs::remove_file(&self.ctx.settings.socket_file);
        let _ = fs::remove_file(&self.ctx.settings.pid_file);
    }
}

impl Drop for Server {
    fn drop(&mut self) {
        self.keep_running.store(false, Release);
    }
}

fn io_err(path: &Path, source: std::io::Error) -> ServerError {
    ServerError::Io {
        path: path.display().to_string(),
        source,
    }
}
