//! SQLite backend.

mod batch;
mod comments;
mod dependencies;
mod dirty;
mod ids;
mod issues;
mod kv;
mod labels;
mod queries;
pub mod schema;
mod store;
mod transaction;

pub use store::SqliteStore;
