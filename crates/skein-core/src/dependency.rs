//! Dependency edges -- typed relationships between issues.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::enums::DependencyType;

/// Prefix marking a cross-store endpoint.
///
/// Edges with an `external:` end reference an issue in another store; they
/// skip existence checks and never participate in readiness or cycle
/// detection.
pub const EXTERNAL_PREFIX: &str = "external:";

/// Returns `true` if an edge endpoint references another store.
pub fn is_external_endpoint(id: &str) -> bool {
    id.starts_with(EXTERNAL_PREFIX)
}

/// Strips the `external:` prefix, if present.
pub fn strip_external(id: &str) -> &str {
    id.strip_prefix(EXTERNAL_PREFIX).unwrap_or(id)
}

/// A directed edge `issue_id -> depends_on_id` of a given type.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Dependency {
    pub issue_id: String,

    pub depends_on_id: String,

    /// Edge type (serialised as "type" in JSON).
    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub created_by: String,
}

impl Dependency {
    /// Builds an edge stamped now.
    pub fn new(
        issue_id: impl Into<String>,
        depends_on_id: impl Into<String>,
        dep_type: DependencyType,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            issue_id: issue_id.into(),
            depends_on_id: depends_on_id.into(),
            dep_type,
            created_at: Utc::now(),
            created_by: created_by.into(),
        }
    }

    /// `true` when either endpoint lives in another store.
    pub fn is_cross_store(&self) -> bool {
        is_external_endpoint(&self.issue_id) || is_external_endpoint(&self.depends_on_id)
    }

    /// Whether this edge gates readiness of `issue_id`.
    ///
    /// Cross-store edges never do, whatever their type.
    pub fn gates_readiness(&self) -> bool {
        self.dep_type.affects_ready_work() && !self.is_cross_store()
    }
}

/// Counts of edges touching one issue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DependencyCounts {
    /// Outgoing edges (issues this one depends on).
    pub dependency_count: i32,
    /// Incoming edges (issues depending on this one).
    pub dependent_count: i32,
}
