//! Client side of the daemon protocol.
//!
//! A command probes the daemon lock file; when a live daemon owns the
//! store it talks to it over the socket, otherwise it falls back to direct
//! database access under the file fence.

#![cfg(unix)]

use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::time::Duration;

use tracing::debug;

use skein_config::StoreDir;
use skein_lockfile::{DaemonProbe, probe_daemon};
use skein_storage::{Result, StorageError};

use crate::rpc::{Request, Response};

/// Read/write timeout on the daemon socket.
const IO_TIMEOUT: Duration = Duration::from_secs(10);

/// A connection to a live daemon.
#[derive(Debug)]
pub struct DaemonClient {
    stream: UnixStream,
}

impl DaemonClient {
    /// Probes for a live daemon and connects to it.
    ///
    /// `Ok(None)` means "no daemon, use direct access" -- the caller only
    /// gets `DaemonUnavailable` when it demanded the daemon via
    /// [`DaemonClient::connect_required`].
    pub fn connect(store_dir: &StoreDir) -> Result<Option<Self>> {
        let lock_path = store_dir.daemon_lock_path();
        match probe_daemon(&lock_path) {
            Ok(DaemonProbe::Alive(info)) => {
                debug!(pid = info.pid, "daemon detected");
            }
            Ok(DaemonProbe::Absent | DaemonProbe::StaleRecovered) => return Ok(None),
            Err(e) => {
                debug!(error = %e, "daemon probe failed; using direct access");
                return Ok(None);
            }
        }

        let socket_path = store_dir.daemon_socket_path();
        let stream = match UnixStream::connect(&socket_path) {
            Ok(stream) => stream,
            Err(e) => {
                debug!(error = %e, "daemon socket refused; using direct access");
                return Ok(None);
            }
        };
        stream
            .set_read_timeout(Some(IO_TIMEOUT))
            .and_then(|()| stream.set_write_timeout(Some(IO_TIMEOUT)))
            .map_err(|e| StorageError::Connection(format!("socket timeout: {e}")))?;

        Ok(Some(Self { stream }))
    }

    /// Like [`connect`](Self::connect) but the daemon is mandatory.
    pub fn connect_required(store_dir: &StoreDir) -> Result<Self> {
        Self::connect(store_dir)?.ok_or_else(|| StorageError::DaemonUnavailable {
            hint: "no daemon is running for this store; run the command directly".into(),
        })
    }

    /// Sends one request and reads one response.
    pub fn call(&mut self, request: &Request) -> Result<Response> {
        let mut json = serde_json::to_string(request)?;
        json.push('\n');
        self.stream
            .write_all(json.as_bytes())
            .map_err(|e| StorageError::DaemonUnavailable {
                hint: format!("daemon went away mid-request: {e}"),
            })?;

        let mut reader = BufReader::new(&self.stream);
        let mut line = String::new();
        reader
            .read_line(&mut line)
            .map_err(|e| StorageError::DaemonUnavailable {
                hint: format!("daemon did not answer: {e}"),
            })?;

        let response: Response = serde_json::from_str(line.trim())?;
        Ok(response)
    }

    /// Calls and unwraps an error response into the typed error.
    pub fn call_ok(&mut self, request: &Request) -> Result<Response> {
        match self.call(request)? {
            Response::Error { error } => Err(error.into_storage_error()),
            other => Ok(other),
        }
    }
}
