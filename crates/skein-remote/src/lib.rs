//! External-tracker field mapping.
//!
//! An issue may carry an `external_ref` pointing at its twin in a
//! third-party tracker. This crate canonicalises those URLs, recognises the
//! provider, and maps issue fields to and from a neutral record the
//! (out-of-tree) tracker plug-ins exchange. No network code lives here.

pub mod mapping;
pub mod refurl;

pub use mapping::{RemoteIssue, RemoteState, apply_remote, to_remote};
pub use refurl::{CanonicalRef, Provider, RefError, canonicalize_ref};
