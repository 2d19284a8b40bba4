//! Wire protocol between clients and the daemon.
//!
//! Line-delimited JSON over a Unix-domain socket: one request per line, one
//! response per line. Errors cross the wire as the tagged envelope
//! (`kind`, `message`, optional `context`).

use serde::{Deserialize, Serialize};

use skein_core::filter::WorkFilter;
use skein_core::issue::Issue;
use skein_storage::StorageError;

/// A client request.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum Request {
    Ping,
    GetIssue {
        id: String,
    },
    Ready {
        #[serde(default)]
        limit: Option<i32>,
    },
    Claim {
        id: String,
        actor: String,
    },
    Close {
        id: String,
        reason: String,
        actor: String,
        session: String,
    },
    Search {
        query: String,
    },
    Sync {
        #[serde(default)]
        full: bool,
    },
    Shutdown,
}

/// A daemon response.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum Response {
    Ok,
    Pong {
        version: String,
        pid: u32,
    },
    Issue {
        issue: Issue,
    },
    Issues {
        issues: Vec<Issue>,
    },
    Synced {
        exported: usize,
        imported: usize,
    },
    Error {
        error: WireError,
    },
}

/// The tagged error envelope as it crosses the wire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireError {
    pub kind: String,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub context: Option<serde_json::Value>,
}

impl From<&StorageError> for WireError {
    fn from(e: &StorageError) -> Self {
        let context = match e {
            StorageError::Cycle { path } => Some(serde_json::json!({ "path": path })),
            StorageError::OrphanParent { ids } => Some(serde_json::json!({ "ids": ids })),
            StorageError::MirrorConflict { ids } => Some(serde_json::json!({ "ids": ids })),
            StorageError::HasDependents { ids } => Some(serde_json::json!({ "ids": ids })),
            StorageError::AlreadyClaimed { assignee } => {
                Some(serde_json::json!({ "assignee": assignee }))
            }
            StorageError::LockBusy { hint } | StorageError::DaemonUnavailable { hint } => {
                Some(serde_json::json!({ "hint": hint }))
            }
            _ => None,
        };
        Self {
            kind: e.kind().to_string(),
            message: e.to_string(),
            context,
        }
    }
}

impl WireError {
    /// Rebuilds a client-side error from the envelope. Structured context
    /// is restored for the kinds that carry it.
    pub fn into_storage_error(self) -> StorageError {
        let ids_from = |ctx: &Option<serde_json::Value>| -> Vec<String> {
            ctx.as_ref()
                .and_then(|c| c.get("ids"))
                .and_then(|v| serde_json::from_value(v.clone()).ok())
                .unwrap_or_default()
        };
        match self.kind.as_str() {
            "NotFound" => StorageError::not_found("issue", self.message),
            "Cycle" => StorageError::Cycle {
                path: self
                    .context
                    .as_ref()
                    .and_then(|c| c.get("path"))
                    .and_then(|v| serde_json::from_value(v.clone()).ok())
                    .unwrap_or_default(),
            },
            "OrphanParent" => StorageError::OrphanParent {
                ids: ids_from(&self.context),
            },
            "MirrorConflict" => StorageError::MirrorConflict {
                ids: ids_from(&self.context),
            },
            "HasDependents" => StorageError::HasDependents {
                ids: ids_from(&self.context),
            },
            "AlreadyClaimed" => StorageError::AlreadyClaimed {
                assignee: self
                    .context
                    .as_ref()
                    .and_then(|c| c.get("assignee"))
                    .and_then(|v| v.as_str())
                    .unwrap_or_default()
                    .to_string(),
            },
            "BadReason" => StorageError::BadReason,
            "Cancelled" => StorageError::Cancelled,
            "LockBusy" => StorageError::lock_busy(self.message),
            "DaemonUnavailable" => StorageError::DaemonUnavailable { hint: self.message },
            _ => StorageError::invalid(self.message),
        }
    }
}

/// Work filter for the `Ready` request (only the limit crosses the wire;
/// richer filtering stays client-side for now).
pub fn ready_filter(limit: Option<i32>) -> WorkFilter {
    WorkFilter {
        limit,
        ..Default::default()
    }
}
