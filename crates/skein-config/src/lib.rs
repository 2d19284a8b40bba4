//! Configuration for a skein project.
//!
//! A project keeps its engine state under `.skein/` at the repository root:
//! the SQLite store, the JSONL mirror, the config file and (optionally) the
//! daemon lock and socket.

pub mod config;
pub mod store_dir;

pub use config::{Config, ConfigError, IdMode, OrphanPolicy, load_config, save_config};
pub use store_dir::{STORE_DIR_NAME, StoreDir, find_store_dir};
