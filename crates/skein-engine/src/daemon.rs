//! The daemon: a long-lived owner of one store, multiplexing clients over
//! a Unix-domain socket.
//!
//! A single-threaded cooperative accept loop is enough: the store
//! serialises writers anyway, and the protocol is strictly
//! request/response. The daemon advertises itself through the daemon lock
//! file; clients probe that before connecting.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::{UnixListener, UnixStream};
use std::time::Duration;

use tracing::{debug, info, warn};

use skein_core::cancel::CancelToken;
use skein_lockfile::{DaemonLock, DaemonLockInfo, write_daemon_lock};
use skein_storage::{Result, Storage, StorageError};
use skein_sync::SyncOptions;

use crate::project::{ENGINE_VERSION, Engine};
use crate::rpc::{Request, Response, WireError, ready_filter};

/// Poll interval of the accept loop between cancellation checks.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// A running daemon bound to its socket and holding the daemon lock.
pub struct Daemon {
    engine: Engine,
    listener: UnixListener,
    _lock: DaemonLock,
}

impl Daemon {
    /// Binds the socket and takes the daemon lock. Fails with `LockBusy`
    /// when another daemon already owns the store.
    pub fn bind(engine: Engine) -> Result<Self> {
        let lock_path = engine.store_dir().daemon_lock_path();
        let socket_path = engine.store_dir().daemon_socket_path();

        let info = DaemonLockInfo::for_current_process(
            &engine.store_dir().database_path(),
            ENGINE_VERSION,
        );
        let lock = write_daemon_lock(&lock_path, &info).map_err(|e| match e {
            skein_lockfile::LockError::Busy => {
                StorageError::lock_busy("a daemon already owns this store")
            }
            skein_lockfile::LockError::Io(e) => {
                StorageError::Connection(format!("daemon lock error: {e}"))
            }
        })?;

        // A previous daemon may have left its socket behind.
        let _ = std::fs::remove_file(&socket_path);
        let listener = UnixListener::bind(&socket_path).map_err(|e| {
            StorageError::Connection(format!(
                "failed to bind {}: {e}",
                socket_path.display()
            ))
        })?;
        listener.set_nonblocking(true).map_err(|e| {
            StorageError::Connection(format!("failed to set nonblocking: {e}"))
        })?;

        info!(socket = %socket_path.display(), "daemon listening");
        Ok(Self {
            engine,
            listener,
            _lock: lock,
        })
    }

    /// Serves until the token flips or a client sends `Shutdown`.
    pub fn serve(self, cancel: &CancelToken) -> Result<()> {
        loop {
            if cancel.is_cancelled() {
                break;
            }
            match self.listener.accept() {
                Ok((stream, _addr)) => {
                    if self.handle_connection(stream, cancel)? {
                        break; // Shutdown requested.
                    }
                }
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => {
                    std::thread::sleep(ACCEPT_POLL);
                }
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    std::thread::sleep(ACCEPT_POLL);
                }
            }
        }

        let socket_path = self.engine.store_dir().daemon_socket_path();
        let _ = std::fs::remove_file(&socket_path);
        info!("daemon stopped");
        Ok(())
    }

    /// Drains one client connection. Returns `true` on `Shutdown`.
    fn handle_connection(&self, stream: UnixStream, cancel: &CancelToken) -> Result<bool> {
        stream
            .set_nonblocking(false)
            .map_err(|e| StorageError::Connection(format!("stream mode: {e}")))?;
        let mut writer = stream
            .try_clone()
            .map_err(|e| StorageError::Connection(format!("stream clone: {e}")))?;
        let reader = BufReader::new(stream);

        for line in reader.lines() {
            if cancel.is_cancelled() {
                return Ok(false);
            }
            let line = match line {
                Ok(line) => line,
                Err(e) => {
                    debug!(error = %e, "client hung up");
                    return Ok(false);
                }
            };
            if line.trim().is_empty() {
                continue;
            }

            let request: Request = match serde_json::from_str(&line) {
                Ok(request) => request,
                Err(e) => {
                    let response = Response::Error {
                        error: WireError::from(&StorageError::invalid(format!(
                            "bad request: {e}"
                        ))),
                    };
                    write_response(&mut writer, &response)?;
                    continue;
                }
            };

            let shutdown = matches!(request, Request::Shutdown);
            let response = self.dispatch(request);
            write_response(&mut writer, &response)?;
            if shutdown {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn dispatch(&self, request: Request) -> Response {
        let result: Result<Response> = match request {
            Request::Ping => Ok(Response::Pong {
                version: ENGINE_VERSION.to_string(),
                pid: std::process::id(),
            }),
            Request::GetIssue { id } => {
                self.engine.store().get_issue(&id).map(|issue| Response::Issue { issue })
            }
            Request::Ready { limit } => self
                .engine
                .ready(&ready_filter(limit))
                .map(|issues| Response::Issues { issues }),
            Request::Claim { id, actor } => self
                .engine
                .store()
                .claim_issue(&id, &actor)
                .map(|()| Response::Ok),
            Request::Close {
                id,
                reason,
                actor,
                session,
            } => self
                .engine
                .store()
                .close_issue(&id, &reason, &actor, &session)
                .map(|()| Response::Ok),
            Request::Search { query } => self
                .engine
                .search(&query)
                .map(|issues| Response::Issues { issues }),
            Request::Sync { full } => self
                .engine
                .sync(&SyncOptions {
                    full,
                    delete_missing: false,
                })
                .map(|outcome| Response::Synced {
                    exported: outcome.export.written,
                    imported: outcome.import.created.len() + outcome.import.updated.len(),
                }),
            Request::Shutdown => Ok(Response::Ok),
        };

        match result {
            Ok(response) => response,
            Err(e) => Response::Error {
                error: WireError::from(&e),
            },
        }
    }
}

fn write_response(writer: &mut UnixStream, response: &Response) -> Result<()> {
    let mut json = serde_json::to_string(response)?;
    json.push('\n');
    writer
        .write_all(json.as_bytes())
        .map_err(|e| StorageError::Connection(format!("write to client: {e}")))
}
