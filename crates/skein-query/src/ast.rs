//! The query AST and field model.

use crate::error::{QueryError, Result};

/// A parsed query expression.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// All children must hold.
    And(Vec<Expr>),
    /// At least one child must hold.
    Or(Vec<Expr>),
    Not(Box<Expr>),
    Cmp(Comparison),
}

/// One `field op value` leaf.
#[derive(Debug, Clone, PartialEq)]
pub struct Comparison {
    pub field: Field,
    pub op: CmpOp,
    pub value: Value,
    /// Byte offset of the field token, for error reporting.
    pub pos: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmpOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl CmpOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            Self::Eq => "=",
            Self::Ne => "!=",
            Self::Lt => "<",
            Self::Le => "<=",
            Self::Gt => ">",
            Self::Ge => ">=",
        }
    }

    /// Orderings apply to numbers and dates, not enums or strings.
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::Lt | Self::Le | Self::Gt | Self::Ge)
    }
}

/// A literal on the right-hand side.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Bare word (enum value, duration literal, id...).
    Word(String),
    Int(i64),
    /// Quoted string.
    Str(String),
}

impl Value {
    pub fn as_text(&self) -> String {
        match self {
            Self::Word(s) | Self::Str(s) => s.clone(),
            Self::Int(n) => n.to_string(),
        }
    }
}

/// Recognised issue fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Field {
    Status,
    IssueType,
    Priority,
    Assignee,
    Owner,
    Title,
    Id,
    Label,
    Pinned,
    Ephemeral,
    Template,
    SpecId,
    Created,
    Updated,
    /// `metadata.<key>`, dot-separated key.
    Metadata(String),
}

impl Field {
    /// Resolves a field name, or fails with the spelled position.
    pub fn resolve(name: &str, pos: usize) -> Result<Self> {
        if let Some(key) = name.strip_prefix("metadata.") {
            if key.is_empty() {
                return Err(QueryError::UnknownField {
                    pos,
                    field: name.to_string(),
                });
            }
            return Ok(Self::Metadata(key.to_string()));
        }
        match name {
            "status" => Ok(Self::Status),
            "type" | "issue_type" => Ok(Self::IssueType),
            "priority" => Ok(Self::Priority),
            "assignee" => Ok(Self::Assignee),
            "owner" => Ok(Self::Owner),
            "title" => Ok(Self::Title),
            "id" => Ok(Self::Id),
            "label" => Ok(Self::Label),
            "pinned" => Ok(Self::Pinned),
            "ephemeral" => Ok(Self::Ephemeral),
            "template" | "is_template" => Ok(Self::Template),
            "spec_id" => Ok(Self::SpecId),
            "created" | "created_at" => Ok(Self::Created),
            "updated" | "updated_at" => Ok(Self::Updated),
            _ => Err(QueryError::UnknownField {
                pos,
                field: name.to_string(),
            }),
        }
    }

    /// Which operators make sense on this field.
    pub fn admits(&self, op: CmpOp) -> bool {
        match self {
            Self::Priority | Self::Created | Self::Updated => true,
            Self::Metadata(_) => true,
            // Enum/string/bool fields: equality only.
            _ => !op.is_ordering(),
        }
    }
}

impl std::fmt::Display for Field {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Status => write!(f, "status"),
            Self::IssueType => write!(f, "type"),
            Self::Priority => write!(f, "priority"),
            Self::Assignee => write!(f, "assignee"),
            Self::Owner => write!(f, "owner"),
            Self::Title => write!(f, "title"),
            Self::Id => write!(f, "id"),
            Self::Label => write!(f, "label"),
            Self::Pinned => write!(f, "pinned"),
            Self::Ephemeral => write!(f, "ephemeral"),
            Self::Template => write!(f, "template"),
            Self::SpecId => write!(f, "spec_id"),
            Self::Created => write!(f, "created"),
            Self::Updated => write!(f, "updated"),
            Self::Metadata(key) => write!(f, "metadata.{key}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolve_known_fields() {
        assert_eq!(Field::resolve("status", 0).unwrap(), Field::Status);
        assert_eq!(Field::resolve("type", 0).unwrap(), Field::IssueType);
        assert_eq!(
            Field::resolve("metadata.run.id", 0).unwrap(),
            Field::Metadata("run.id".into())
        );
    }

    #[test]
    fn unknown_field_cites_position() {
        let err = Field::resolve("priroty", 9).unwrap_err();
        assert_eq!(err.position(), 9);
        assert!(err.to_string().contains("priroty"));
    }

    #[test]
    fn operator_admission() {
        assert!(Field::Priority.admits(CmpOp::Le));
        assert!(!Field::Status.admits(CmpOp::Lt));
        assert!(Field::Status.admits(CmpOp::Ne));
        assert!(Field::Updated.admits(CmpOp::Gt));
    }
}
