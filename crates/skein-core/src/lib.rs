//! Core types for the skein issue engine.
//!
//! Everything the storage backend, query compiler and mirror sync agree on
//! lives here: the issue model, the dependency edge types, identifier
//! handling, the JSONL mirror codec and the content hash.

pub mod cancel;
pub mod comment;
pub mod content_hash;
pub mod decision;
pub mod dependency;
pub mod enums;
pub mod filter;
pub mod ids;
pub mod issue;
pub mod mirror;
pub mod validation;
