//! String-backed enum types for the skein issue model.
//!
//! Each enum serialises as its snake/kebab-case string, deserialises any
//! unknown string into a `Custom` variant (custom values are validated
//! against project config at write time, not here), and exposes `as_str()`,
//! `is_default()` and a `Display` impl.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

// ---------------------------------------------------------------------------
// Macro: enum with known string variants + a Custom(String) fallback.
// ---------------------------------------------------------------------------
macro_rules! string_enum {
    (
        $(#[$meta:meta])*
        $name:ident, default = $default:ident,
        variants: [
            $( ($variant:ident, $str:expr) ),+ $(,)?
        ]
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash)]
        pub enum $name {
            $( $variant, )+
            Custom(String),
        }

        impl $name {
            /// Returns the string representation.
            pub fn as_str(&self) -> &str {
                match self {
                    $( Self::$variant => $str, )+
                    Self::Custom(s) => s.as_str(),
                }
            }

            /// Returns `true` if this is the default variant.
            pub fn is_default(&self) -> bool {
                *self == Self::$default
            }

            /// Returns `true` for a known built-in variant.
            pub fn is_builtin(&self) -> bool {
                !matches!(self, Self::Custom(_))
            }

            /// Returns `true` if built-in, or if the custom value appears in
            /// the project-declared extension set.
            pub fn is_valid_with(&self, declared: &[String]) -> bool {
                match self {
                    Self::Custom(s) => declared.iter().any(|d| d == s),
                    _ => true,
                }
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::$default
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let s = String::deserialize(deserializer)?;
                Ok(Self::from(s))
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                match s {
                    $( $str => Self::$variant, )+
                    other => Self::Custom(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                match s.as_str() {
                    $( $str => Self::$variant, )+
                    _ => Self::Custom(s),
                }
            }
        }
    };
}

// ===========================================================================
// Status
// ===========================================================================

string_enum! {
    /// Workflow state of an issue.
    ///
    /// Anything other than `Closed` counts as open for blocking purposes,
    /// including custom statuses.
    Status, default = Open,
    variants: [
        (Open, "open"),
        (InProgress, "in_progress"),
        (Blocked, "blocked"),
        (Closed, "closed"),
    ]
}

impl Status {
    /// Whether an issue in this status still blocks its dependents.
    pub fn blocks_dependents(&self) -> bool {
        *self != Self::Closed
    }
}

// ===========================================================================
// IssueType
// ===========================================================================

string_enum! {
    /// Kind of work an issue represents.
    IssueType, default = Task,
    variants: [
        (Task, "task"),
        (Bug, "bug"),
        (Feature, "feature"),
        (Epic, "epic"),
        (Chore, "chore"),
        (Gate, "gate"),
    ]
}

impl IssueType {
    /// Gate issues carry a decision point and park downstream work until a
    /// human answers it.
    pub fn is_gate(&self) -> bool {
        *self == Self::Gate
    }
}

// ===========================================================================
// DependencyType
// ===========================================================================

string_enum! {
    /// Relationship type between two issues.
    DependencyType, default = Blocks,
    variants: [
        (Blocks, "blocks"),
        (ParentChild, "parent-child"),
        (Related, "related"),
        (DiscoveredFrom, "discovered-from"),
        (Duplicates, "duplicates"),
    ]
}

impl DependencyType {
    /// Whether edges of this type feed the ready-work calculation.
    ///
    /// Only `blocks` and `parent-child` gate readiness; the informational
    /// types never do, custom types included.
    pub fn affects_ready_work(&self) -> bool {
        matches!(self, Self::Blocks | Self::ParentChild)
    }
}

/// SQL fragment listing the ready-affecting dependency types.
///
/// Kept next to [`DependencyType::affects_ready_work`] so the two cannot
/// drift apart.
pub const READY_AFFECTING_TYPES_SQL: &str = "('blocks', 'parent-child')";

// ===========================================================================
// EventKind
// ===========================================================================

/// Categorises audit-trail events.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EventKind {
    Created,
    Updated,
    Closed,
    Reopened,
    Deleted,
    CommentAdded,
    DependencyAdded,
    DependencyRemoved,
    LabelAdded,
    LabelRemoved,
    Claimed,
    /// Catch-all for unknown / future event kinds.
    Other(String),
}

impl EventKind {
    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        match self {
            Self::Created => "created",
            Self::Updated => "updated",
            Self::Closed => "closed",
            Self::Reopened => "reopened",
            Self::Deleted => "deleted",
            Self::CommentAdded => "comment_added",
            Self::DependencyAdded => "dependency_added",
            Self::DependencyRemoved => "dependency_removed",
            Self::LabelAdded => "label_added",
            Self::LabelRemoved => "label_removed",
            Self::Claimed => "claimed",
            Self::Other(s) => s.as_str(),
        }
    }
}

impl Default for EventKind {
    fn default() -> Self {
        Self::Created
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Ok(Self::from(s.as_str()))
    }
}

impl From<&str> for EventKind {
    fn from(s: &str) -> Self {
        match s {
            "created" => Self::Created,
            "updated" => Self::Updated,
            "closed" => Self::Closed,
            "reopened" => Self::Reopened,
            "deleted" => Self::Deleted,
            "comment_added" => Self::CommentAdded,
            "dependency_added" => Self::DependencyAdded,
            "dependency_removed" => Self::DependencyRemoved,
            "label_added" => Self::LabelAdded,
            "label_removed" => Self::LabelRemoved,
            "claimed" => Self::Claimed,
            other => Self::Other(other.to_owned()),
        }
    }
}
