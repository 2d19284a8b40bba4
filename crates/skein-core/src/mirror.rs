//! The text-mirror line codec.
//!
//! Each mirror line is one issue serialised as a single JSON object with a
//! fixed key order, newline-terminated, UTF-8. Dependencies, labels and
//! comments are nested on the parent record; a decision point appears on
//! gate issues. Blank lines are tombstones left by deletions and are
//! skipped on read.

use std::io::{self, BufRead};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::comment::Comment;
use crate::decision::DecisionPoint;
use crate::dependency::Dependency;
use crate::enums::{DependencyType, IssueType, Status};
use crate::issue::Issue;

/// Error type for mirror codec operations.
#[derive(Debug, thiserror::Error)]
pub enum MirrorError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("bad mirror record at line {line}: {source}")]
    Record {
        line: usize,
        source: serde_json::Error,
    },
}

pub type Result<T> = std::result::Result<T, MirrorError>;

// ---------------------------------------------------------------------------
// Timestamp serde: RFC 3339 with fixed millisecond precision
// ---------------------------------------------------------------------------

pub(crate) mod ts {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.3fZ";

    pub fn to_string(dt: &DateTime<Utc>) -> String {
        dt.format(FORMAT).to_string()
    }

    pub fn serialize<S: Serializer>(
        dt: &DateTime<Utc>,
        s: S,
    ) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&to_string(dt))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        d: D,
    ) -> std::result::Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        raw.parse::<DateTime<Utc>>()
            .map_err(serde::de::Error::custom)
    }

    pub mod opt {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            dt: &Option<DateTime<Utc>>,
            s: S,
        ) -> std::result::Result<S::Ok, S::Error> {
            match dt {
                Some(dt) => s.serialize_some(&super::to_string(dt)),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> std::result::Result<Option<DateTime<Utc>>, D::Error> {
            let raw: Option<String> = Option::deserialize(d)?;
            match raw {
                Some(raw) => raw
                    .parse::<DateTime<Utc>>()
                    .map(Some)
                    .map_err(serde::de::Error::custom),
                None => Ok(None),
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Record types
// ---------------------------------------------------------------------------

fn is_false(b: &bool) -> bool {
    !b
}

fn is_empty_vec<T>(v: &Vec<T>) -> bool {
    v.is_empty()
}

/// A nested dependency on a mirror record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MirrorDep {
    pub to: String,

    #[serde(rename = "type")]
    pub dep_type: DependencyType,

    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
}

/// A nested comment on a mirror record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MirrorComment {
    pub author: String,

    pub text: String,

    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,
}

/// One mirror line. Field order here IS the wire key order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    pub id: String,

    pub title: String,

    pub issue_type: IssueType,

    pub status: Status,

    pub priority: i32,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub assignee: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub owner: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub design: String,

    #[serde(default, rename = "acceptance", skip_serializing_if = "String::is_empty")]
    pub acceptance_criteria: String,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub notes: String,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub labels: Vec<String>,

    #[serde(default, skip_serializing_if = "is_false")]
    pub pinned: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub ephemeral: bool,

    #[serde(default, skip_serializing_if = "is_false")]
    pub is_template: bool,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub spec_id: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_ref: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Box<serde_json::value::RawValue>>,

    #[serde(with = "ts")]
    pub created_at: DateTime<Utc>,

    #[serde(with = "ts")]
    pub updated_at: DateTime<Utc>,

    #[serde(
        default,
        with = "ts::opt",
        skip_serializing_if = "Option::is_none"
    )]
    pub closed_at: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub dependencies: Vec<MirrorDep>,

    #[serde(default, skip_serializing_if = "is_empty_vec")]
    pub comments: Vec<MirrorComment>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decision: Option<DecisionPoint>,
}

impl From<&Issue> for MirrorRecord {
    fn from(issue: &Issue) -> Self {
        Self {
            id: issue.id.clone(),
            title: issue.title.clone(),
            issue_type: issue.issue_type.clone(),
            status: issue.status.clone(),
            priority: issue.priority,
            assignee: issue.assignee.clone(),
            owner: issue.owner.clone(),
            description: issue.description.clone(),
            design: issue.design.clone(),
            acceptance_criteria: issue.acceptance_criteria.clone(),
            notes: issue.notes.clone(),
            labels: issue.labels.clone(),
            pinned: issue.pinned,
            ephemeral: issue.ephemeral,
            is_template: issue.is_template,
            spec_id: issue.spec_id.clone(),
            external_ref: issue.external_ref.clone(),
            metadata: issue.metadata.clone(),
            created_at: issue.created_at,
            updated_at: issue.updated_at,
            closed_at: issue.closed_at,
            dependencies: issue
                .dependencies
                .iter()
                .map(|d| MirrorDep {
                    to: d.depends_on_id.clone(),
                    dep_type: d.dep_type.clone(),
                    created_at: d.created_at,
                })
                .collect(),
            comments: issue
                .comments
                .iter()
                .map(|c| MirrorComment {
                    author: c.author.clone(),
                    text: c.text.clone(),
                    created_at: c.created_at,
                })
                .collect(),
            decision: issue.decision.clone(),
        }
    }
}

impl MirrorRecord {
    /// Rebuilds an [`Issue`] from this record.
    pub fn into_issue(self) -> Issue {
        let id = self.id.clone();
        let mut issue = Issue::default();
        issue.id = self.id;
        issue.title = self.title;
        issue.issue_type = self.issue_type;
        issue.status = self.status;
        issue.priority = self.priority;
        issue.assignee = self.assignee;
        issue.owner = self.owner;
        issue.description = self.description;
        issue.design = self.design;
        issue.acceptance_criteria = self.acceptance_criteria;
        issue.notes = self.notes;
        issue.labels = self.labels;
        issue.pinned = self.pinned;
        issue.ephemeral = self.ephemeral;
        issue.is_template = self.is_template;
        issue.spec_id = self.spec_id;
        issue.external_ref = self.external_ref;
        issue.metadata = self.metadata;
        issue.created_at = self.created_at;
        issue.updated_at = self.updated_at;
        issue.closed_at = self.closed_at;
        issue.dependencies = self
            .dependencies
            .into_iter()
            .map(|d| Dependency {
                issue_id: id.clone(),
                depends_on_id: d.to,
                dep_type: d.dep_type,
                created_at: d.created_at,
                created_by: String::new(),
            })
            .collect();
        issue.comments = self
            .comments
            .into_iter()
            .map(|c| Comment {
                id: 0,
                issue_id: id.clone(),
                author: c.author,
                text: c.text,
                created_at: c.created_at,
            })
            .collect();
        issue.decision = self.decision;
        issue.set_defaults();
        issue
    }
}

// ---------------------------------------------------------------------------
// Line-level helpers
// ---------------------------------------------------------------------------

/// Serialises one issue as its mirror line (no trailing newline).
pub fn write_line(issue: &Issue) -> String {
    let record = MirrorRecord::from(issue);
    serde_json::to_string(&record).expect("mirror record serialisation cannot fail")
}

/// Parses one mirror line.
pub fn parse_line(line: &str, line_no: usize) -> Result<MirrorRecord> {
    serde_json::from_str(line).map_err(|source| MirrorError::Record {
        line: line_no,
        source,
    })
}

/// Streaming reader over a mirror file; yields `(line_number, record)` and
/// skips tombstone (blank) lines.
pub fn read_records<R: BufRead>(reader: R) -> RecordIter<R> {
    RecordIter {
        reader,
        line_number: 0,
    }
}

pub struct RecordIter<R> {
    reader: R,
    line_number: usize,
}

impl<R: BufRead> Iterator for RecordIter<R> {
    type Item = Result<(usize, MirrorRecord)>;

    fn next(&mut self) -> Option<Self::Item> {
        let mut line = String::new();
        loop {
            line.clear();
            match self.reader.read_line(&mut line) {
                Ok(0) => return None,
                Ok(_) => {
                    self.line_number += 1;
                    let trimmed = line.trim();
                    if trimmed.is_empty() {
                        continue;
                    }
                    return Some(
                        parse_line(trimmed, self.line_number).map(|r| (self.line_number, r)),
                    );
                }
                Err(e) => return Some(Err(MirrorError::Io(e))),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::issue::IssueBuilder;
    use pretty_assertions::assert_eq;
    use std::io::BufReader;

    fn sample() -> Issue {
        let mut issue = IssueBuilder::new("Sample")
            .id("sk-a1b")
            .priority(1)
            .description("body text")
            .labels(vec!["infra".into()])
            .build();
        issue.dependencies.push(Dependency::new(
            "sk-a1b",
            "sk-zz9",
            DependencyType::Blocks,
            "alice",
        ));
        issue
    }

    #[test]
    fn line_roundtrip() {
        let issue = sample();
        let line = write_line(&issue);
        let record = parse_line(&line, 1).unwrap();
        let back = record.into_issue();

        assert_eq!(back.id, issue.id);
        assert_eq!(back.title, issue.title);
        assert_eq!(back.priority, issue.priority);
        assert_eq!(back.labels, issue.labels);
        assert_eq!(back.dependencies.len(), 1);
        assert_eq!(back.dependencies[0].depends_on_id, "sk-zz9");
        assert_eq!(back.dependencies[0].issue_id, "sk-a1b");
    }

    #[test]
    fn key_order_is_stable() {
        let line = write_line(&sample());
        let id_pos = line.find(r#""id""#).unwrap();
        let title_pos = line.find(r#""title""#).unwrap();
        let created_pos = line.find(r#""created_at""#).unwrap();
        let deps_pos = line.find(r#""dependencies""#).unwrap();
        assert!(id_pos < title_pos && title_pos < created_pos && created_pos < deps_pos);
    }

    #[test]
    fn acceptance_wire_key() {
        let mut issue = sample();
        issue.acceptance_criteria = "all tests pass".into();
        let line = write_line(&issue);
        assert!(line.contains(r#""acceptance":"all tests pass""#));
        assert!(!line.contains("acceptance_criteria"));
    }

    #[test]
    fn timestamps_fixed_precision() {
        let line = write_line(&sample());
        let record = parse_line(&line, 1).unwrap();
        // Re-serialising parses back to the identical string.
        let again = serde_json::to_string(&record).unwrap();
        assert_eq!(line, again);
    }

    #[test]
    fn reader_skips_tombstones_and_numbers_lines() {
        let a = write_line(&sample());
        let data = format!("{a}\n\n{a}\n");
        let reader = BufReader::new(data.as_bytes());
        let items: Vec<_> = read_records(reader).collect::<Result<Vec<_>>>().unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].0, 1);
        assert_eq!(items[1].0, 3);
    }

    #[test]
    fn reader_reports_bad_line() {
        let data = "not-json\n";
        let reader = BufReader::new(data.as_bytes());
        let items: Vec<_> = read_records(reader).collect();
        match &items[0] {
            Err(MirrorError::Record { line, .. }) => assert_eq!(*line, 1),
            other => panic!("expected record error, got {other:?}"),
        }
    }
}
