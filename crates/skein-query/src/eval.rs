//! In-memory evaluation of a query AST against one issue.
//!
//! Used directly in predicate mode, and by tests as the reference semantics
//! the lowered filter must agree with.

use chrono::{DateTime, Utc};

use skein_core::issue::Issue;
use skein_core::validation::normalize_label;

use crate::ast::{CmpOp, Comparison, Expr, Field, Value};

/// Evaluates `expr` against an issue, resolving duration literals against
/// `now`.
///
/// Assumes the expression already passed [`crate::lower::check`]; malformed
/// values evaluate to `false` rather than erroring.
pub fn eval(expr: &Expr, issue: &Issue, now: DateTime<Utc>) -> bool {
    match expr {
        Expr::And(terms) => terms.iter().all(|t| eval(t, issue, now)),
        Expr::Or(branches) => branches.iter().any(|b| eval(b, issue, now)),
        Expr::Not(inner) => !eval(inner, issue, now),
        Expr::Cmp(cmp) => eval_cmp(cmp, issue, now),
    }
}

fn eval_cmp(cmp: &Comparison, issue: &Issue, now: DateTime<Utc>) -> bool {
    match &cmp.field {
        Field::Status => text_cmp(issue.status.as_str(), cmp),
        Field::IssueType => text_cmp(issue.issue_type.as_str(), cmp),
        Field::Assignee => text_cmp(&issue.assignee, cmp),
        Field::Owner => text_cmp(&issue.owner, cmp),
        Field::Title => text_cmp(&issue.title, cmp),
        Field::Id => text_cmp(&issue.id, cmp),
        Field::SpecId => text_cmp(&issue.spec_id, cmp),
        Field::Label => {
            let wanted = normalize_label(&cmp.value.as_text());
            let has = issue.labels.iter().any(|l| normalize_label(l) == wanted);
            match cmp.op {
                CmpOp::Eq => has,
                CmpOp::Ne => !has,
                _ => false,
            }
        }
        Field::Pinned => bool_cmp(issue.pinned, cmp),
        Field::Ephemeral => bool_cmp(issue.ephemeral, cmp),
        Field::Template => bool_cmp(issue.is_template, cmp),
        Field::Priority => {
            let Value::Int(wanted) = &cmp.value else {
                return false;
            };
            let wanted = *wanted;
            let actual = i64::from(issue.priority);
            match cmp.op {
                CmpOp::Eq => actual == wanted,
                CmpOp::Ne => actual != wanted,
                CmpOp::Lt => actual < wanted,
                CmpOp::Le => actual <= wanted,
                CmpOp::Gt => actual > wanted,
                CmpOp::Ge => actual >= wanted,
            }
        }
        Field::Created => date_cmp(issue.created_at, cmp, now),
        Field::Updated => date_cmp(issue.updated_at, cmp, now),
        Field::Metadata(key) => metadata_cmp(issue, key, cmp),
    }
}

fn text_cmp(actual: &str, cmp: &Comparison) -> bool {
    let wanted = cmp.value.as_text();
    match cmp.op {
        CmpOp::Eq => actual == wanted,
        CmpOp::Ne => actual != wanted,
        _ => false,
    }
}

fn bool_cmp(actual: bool, cmp: &Comparison) -> bool {
    let wanted = match cmp.value.as_text().as_str() {
        "true" => true,
        "false" => false,
        _ => return false,
    };
    match cmp.op {
        CmpOp::Eq => actual == wanted,
        CmpOp::Ne => actual != wanted,
        _ => false,
    }
}

/// Resolves the comparison instant: a duration literal counts back from
/// `now`, anything else must parse as RFC 3339.
pub(crate) fn resolve_instant(value: &Value, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    let text = value.as_text();
    if let Ok(instant) = skein_timeparse::resolve_ago(&text, now) {
        return Some(instant);
    }
    text.parse::<DateTime<Utc>>().ok()
}

fn date_cmp(actual: DateTime<Utc>, cmp: &Comparison, now: DateTime<Utc>) -> bool {
    let Some(bound) = resolve_instant(&cmp.value, now) else {
        return false;
    };
    match cmp.op {
        CmpOp::Lt => actual < bound,
        CmpOp::Le => actual <= bound,
        CmpOp::Gt => actual > bound,
        CmpOp::Ge => actual >= bound,
        // Point equality on timestamps is rejected at check time.
        CmpOp::Eq | CmpOp::Ne => false,
    }
}

fn metadata_cmp(issue: &Issue, key: &str, cmp: &Comparison) -> bool {
    let actual: Option<serde_json::Value> = issue
        .metadata
        .as_ref()
        .and_then(|raw| serde_json::from_str::<serde_json::Value>(raw.get()).ok())
        .and_then(|v| v.as_object().and_then(|m| m.get(key).cloned()));

    let Some(actual) = actual else {
        // Absent key: unequal to everything.
        return cmp.op == CmpOp::Ne;
    };

    match (&actual, &cmp.value) {
        (serde_json::Value::Number(n), Value::Int(wanted)) => {
            let Some(actual_num) = n.as_i64() else {
                return false;
            };
            match cmp.op {
                CmpOp::Eq => actual_num == *wanted,
                CmpOp::Ne => actual_num != *wanted,
                CmpOp::Lt => actual_num < *wanted,
                CmpOp::Le => actual_num <= *wanted,
                CmpOp::Gt => actual_num > *wanted,
                CmpOp::Ge => actual_num >= *wanted,
            }
        }
        (serde_json::Value::String(s), value) => {
            let wanted = value.as_text();
            match cmp.op {
                CmpOp::Eq => *s == wanted,
                CmpOp::Ne => *s != wanted,
                _ => false,
            }
        }
        (serde_json::Value::Bool(b), value) => {
            let wanted = value.as_text();
            let wanted_bool = wanted == "true";
            match cmp.op {
                CmpOp::Eq => *b == wanted_bool && (wanted == "true" || wanted == "false"),
                CmpOp::Ne => *b != wanted_bool && (wanted == "true" || wanted == "false"),
                _ => false,
            }
        }
        _ => false,
    }
}
