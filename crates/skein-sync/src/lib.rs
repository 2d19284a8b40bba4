//! Text-mirror synchronisation for the skein issue engine.
//!
//! The mirror is a one-line-per-issue JSONL file inside the project tree;
//! this crate converts changes in either direction and three-way-merges
//! forked mirrors.

pub mod export;
pub mod import;
pub mod merge;
pub mod sync;

pub use export::{ExportOptions, ExportOutcome, export_incremental};
pub use import::{ImportOptions, ImportOutcome, import_mirror, import_mirror_text};
pub use merge::{MergeReport, merge_mirrors};
pub use sync::{SyncOptions, SyncOutcome, run_sync};
