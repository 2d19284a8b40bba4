//! The command-facing facade of the skein issue engine.
//!
//! A front end (CLI, editor plug-in, bot) opens an [`Engine`] for each
//! invocation: that resolves the project, takes the cross-process fence,
//! opens the store and exposes the high-level operations. Long-lived hosts
//! run a [`Daemon`](daemon::Daemon) instead and point short-lived commands
//! at it through [`DaemonClient`](client::DaemonClient).

pub mod client;
pub mod daemon;
pub mod project;
pub mod rpc;

pub use project::{ENGINE_VERSION, Engine};
pub use rpc::{Request, Response, WireError};
pub use skein_lockfile::LockMode;

/// Installs the default tracing subscriber for embedding binaries.
///
/// Honors `RUST_LOG`-style filtering through the `SKEIN_LOG` variable.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    let filter = EnvFilter::try_from_env("SKEIN_LOG")
        .unwrap_or_else(|_| EnvFilter::new("skein=info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
