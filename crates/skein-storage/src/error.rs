//! The tagged storage error -- the engine's error envelope.
//!
//! Every public operation resolves to either a typed result or one of these
//! variants. The `kind()` string is the wire tag consumed by front ends;
//! contention variants carry a retry hint.

/// Errors from storage operations.
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    /// The requested entity does not exist.
    #[error("{entity} not found: {id}")]
    NotFound {
        /// Entity kind ("issue", "dependency", "config", ...).
        entity: String,
        id: String,
    },

    /// A validation rule rejected the input.
    #[error("invalid input: {message}")]
    Invalid {
        message: String,
    },

    /// An issue id does not carry the configured project prefix.
    #[error("issue {id} does not match configured prefix '{prefix}'")]
    PrefixMismatch {
        id: String,
        prefix: String,
    },

    /// An issue with this id already exists.
    #[error("issue {id} already exists")]
    DuplicateId {
        id: String,
    },

    /// An identical dependency edge already exists.
    #[error("dependency {from} -> {to} ({dep_type}) already exists")]
    DuplicateDependency {
        from: String,
        to: String,
        dep_type: String,
    },

    /// Inserting the edge would close a cycle in the blocking graph.
    #[error("dependency would create a cycle: {}", path.join(" -> "))]
    Cycle {
        /// The ids along the would-be cycle, first == last.
        path: Vec<String>,
    },

    /// An edge references issues that exist in neither batch nor store.
    #[error("missing referenced issues: {}", ids.join(", "))]
    OrphanParent {
        ids: Vec<String>,
    },

    /// A claim lost the compare-and-set race.
    #[error("issue already claimed by {assignee}")]
    AlreadyClaimed {
        assignee: String,
    },

    /// Close was called without a reason.
    #[error("a non-empty close reason is required")]
    BadReason,

    /// Deletion refused because other issues still point here.
    #[error("issues have dependents: {}", ids.join(", "))]
    HasDependents {
        ids: Vec<String>,
    },

    /// The cross-process fence is held elsewhere.
    #[error("database locked: {hint}")]
    LockBusy {
        hint: String,
    },

    /// The caller demanded the daemon and it is not answering.
    #[error("daemon unavailable: {hint}")]
    DaemonUnavailable {
        hint: String,
    },

    /// Concurrent mirror rewrites could not be reconciled.
    #[error("mirror conflict on: {}", ids.join(", "))]
    MirrorConflict {
        ids: Vec<String>,
    },

    /// The operation was cancelled via its token.
    #[error("operation cancelled")]
    Cancelled,

    // -- Internal variants (not part of the envelope) ------------------------
    /// Failed to establish or maintain a database connection.
    #[error("connection error: {0}")]
    Connection(String),

    /// A transaction could not begin, commit or roll back.
    #[error("transaction error: {0}")]
    Transaction(String),

    /// A schema migration failed.
    #[error("migration {name} failed: {reason}")]
    Migration {
        name: String,
        reason: String,
    },

    /// A raw SQLite error.
    #[error("query error: {0}")]
    Query(#[from] rusqlite::Error),

    /// JSON (de)serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Convenience alias used throughout the storage crate and its consumers.
pub type Result<T> = std::result::Result<T, StorageError>;

impl StorageError {
    // -- Constructors --------------------------------------------------------

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    pub fn invalid(message: impl Into<String>) -> Self {
        Self::Invalid {
            message: message.into(),
        }
    }

    pub fn lock_busy(hint: impl Into<String>) -> Self {
        Self::LockBusy { hint: hint.into() }
    }

    // -- Classification ------------------------------------------------------

    /// The wire tag for this error.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Invalid { .. } => "Invalid",
            Self::PrefixMismatch { .. } => "PrefixMismatch",
            Self::DuplicateId { .. } => "DuplicateID",
            Self::DuplicateDependency { .. } => "Duplicate",
            Self::Cycle { .. } => "Cycle",
            Self::OrphanParent { .. } => "OrphanParent",
            Self::AlreadyClaimed { .. } => "AlreadyClaimed",
            Self::BadReason => "BadReason",
            Self::HasDependents { .. } => "HasDependents",
            Self::LockBusy { .. } => "LockBusy",
            Self::DaemonUnavailable { .. } => "DaemonUnavailable",
            Self::MirrorConflict { .. } => "MirrorConflict",
            Self::Cancelled => "Cancelled",
            Self::Connection(_)
            | Self::Transaction(_)
            | Self::Migration { .. }
            | Self::Query(_)
            | Self::Serialization(_) => "Internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Contention errors carry a retry suggestion.
    pub fn retry_hint(&self) -> Option<&str> {
        match self {
            Self::LockBusy { hint } | Self::DaemonUnavailable { hint } => Some(hint),
            _ => None,
        }
    }

    /// Transient errors that may succeed on retry.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::LockBusy { .. }
                | Self::DaemonUnavailable { .. }
                | Self::Connection(_)
                | Self::Transaction(_)
        )
    }
}

impl From<skein_core::validation::ValidationError> for StorageError {
    fn from(e: skein_core::validation::ValidationError) -> Self {
        Self::Invalid {
            message: e.to_string(),
        }
    }
}
