//! Lowering: compile an AST into a storage-level filter, plus a residual
//! predicate when the tree does not reduce to one.
//!
//! Filter-only mode covers conjunctions of simple comparisons (and `NOT`
//! over a field the storage can negate); a pure OR of `label = X`
//! comparisons specialises into `labels_any`. Everything else keeps an
//! over-approximating base filter and evaluates the full expression per row.

use chrono::{DateTime, Utc};

use skein_core::enums::{IssueType, Status};
use skein_core::filter::IssueFilter;
use skein_core::issue::Issue;
use skein_core::validation::normalize_label;

use crate::ast::{CmpOp, Comparison, Expr, Field, Value};
use crate::error::{QueryError, Result};
use crate::eval;

/// Compilation context: the reference instant for duration literals and the
/// project-declared enum extensions.
#[derive(Debug, Clone)]
pub struct CompileContext {
    pub now: DateTime<Utc>,
    pub custom_statuses: Vec<String>,
    pub custom_types: Vec<String>,
}

impl CompileContext {
    pub fn at(now: DateTime<Utc>) -> Self {
        Self {
            now,
            custom_statuses: Vec::new(),
            custom_types: Vec::new(),
        }
    }
}

/// A row predicate applied after the storage query returns.
pub type Predicate = Box<dyn Fn(&Issue) -> bool + Send + Sync>;

/// The compiled form of a query.
pub struct CompiledQuery {
    /// Pushed down to storage. In predicate mode this over-approximates the
    /// query (never excludes a matching row).
    pub filter: IssueFilter,
    /// Present in predicate mode only.
    pub predicate: Option<Predicate>,
}

impl CompiledQuery {
    /// Whether the storage filter alone answers the query.
    pub fn is_filter_only(&self) -> bool {
        self.predicate.is_none()
    }

    /// Applies the residual predicate (always true in filter-only mode).
    pub fn admits(&self, issue: &Issue) -> bool {
        self.predicate.as_ref().is_none_or(|p| p(issue))
    }
}

impl std::fmt::Debug for CompiledQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CompiledQuery")
            .field("filter", &self.filter)
            .field("predicate", &self.predicate.is_some())
            .finish()
    }
}

/// Compiles a parsed expression.
pub fn lower(expr: &Expr, ctx: &CompileContext) -> Result<CompiledQuery> {
    check(expr, ctx)?;

    // A pure OR of label equalities collapses into labels_any.
    if let Some(labels) = as_label_union(expr) {
        let mut filter = IssueFilter::default();
        filter.labels_any = labels;
        return Ok(CompiledQuery {
            filter,
            predicate: None,
        });
    }

    // Conjunction of simple comparisons: try the pure pushdown.
    let conjuncts = flatten_and(expr);
    if let Some(conjuncts) = conjuncts {
        let mut filter = IssueFilter::default();
        if conjuncts
            .iter()
            .all(|c| apply_to_filter(c, &mut filter, ctx))
        {
            return Ok(CompiledQuery {
                filter,
                predicate: None,
            });
        }
    }

    // Predicate mode. Where the top level is a conjunction, its filterable
    // conjuncts still narrow the base query; the full expression re-runs on
    // every candidate row.
    let mut filter = IssueFilter::default();
    if let Some(conjuncts) = flatten_and(expr) {
        for c in &conjuncts {
            apply_to_filter(c, &mut filter, ctx);
        }
    }

    let expr = expr.clone();
    let now = ctx.now;
    Ok(CompiledQuery {
        filter,
        predicate: Some(Box::new(move |issue| eval::eval(&expr, issue, now))),
    })
}

// ---------------------------------------------------------------------------
// Static checking
// ---------------------------------------------------------------------------

/// Validates every comparison's value against its field.
pub fn check(expr: &Expr, ctx: &CompileContext) -> Result<()> {
    match expr {
        Expr::And(terms) | Expr::Or(terms) => {
            for t in terms {
                check(t, ctx)?;
            }
            Ok(())
        }
        Expr::Not(inner) => check(inner, ctx),
        Expr::Cmp(cmp) => check_cmp(cmp, ctx),
    }
}

fn check_cmp(cmp: &Comparison, ctx: &CompileContext) -> Result<()> {
    match &cmp.field {
        Field::Status => {
            let value = cmp.value.as_text();
            let status = Status::from(value.as_str());
            if !status.is_valid_with(&ctx.custom_statuses) {
                return Err(QueryError::BadStatus {
                    pos: cmp.pos,
                    value,
                });
            }
        }
        Field::IssueType => {
            let value = cmp.value.as_text();
            let issue_type = IssueType::from(value.as_str());
            if !issue_type.is_valid_with(&ctx.custom_types) {
                return Err(QueryError::BadType {
                    pos: cmp.pos,
                    value,
                });
            }
        }
        Field::Priority => {
            let Value::Int(n) = &cmp.value else {
                return Err(QueryError::BadValue {
                    pos: cmp.pos,
                    field: "priority".into(),
                    reason: "expected an integer".into(),
                });
            };
            if !(0..=4).contains(n) {
                return Err(QueryError::BadPriority {
                    pos: cmp.pos,
                    value: *n,
                });
            }
        }
        Field::Pinned | Field::Ephemeral | Field::Template => {
            let value = cmp.value.as_text();
            if value != "true" && value != "false" {
                return Err(QueryError::BadValue {
                    pos: cmp.pos,
                    field: cmp.field.to_string(),
                    reason: format!("expected true or false, got '{value}'"),
                });
            }
        }
        Field::Created | Field::Updated => {
            if !cmp.op.is_ordering() {
                return Err(QueryError::BadOperator {
                    pos: cmp.pos,
                    field: cmp.field.to_string(),
                    op: cmp.op.symbol().to_string(),
                });
            }
            if eval::resolve_instant(&cmp.value, ctx.now).is_none() {
                return Err(QueryError::BadValue {
                    pos: cmp.pos,
                    field: cmp.field.to_string(),
                    reason: format!(
                        "'{}' is neither a duration nor an RFC 3339 instant",
                        cmp.value.as_text()
                    ),
                });
            }
        }
        _ => {}
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// Shape analysis
// ---------------------------------------------------------------------------

/// Flattens a tree of ANDs over comparisons (and negated comparisons) into
/// a conjunct list. Returns `None` when the shape is anything else.
fn flatten_and(expr: &Expr) -> Option<Vec<Conjunct>> {
    let mut out = Vec::new();
    if collect_conjuncts(expr, &mut out) {
        Some(out)
    } else {
        None
    }
}

#[derive(Clone)]
struct Conjunct {
    cmp: Comparison,
    negated: bool,
}

fn collect_conjuncts(expr: &Expr, out: &mut Vec<Conjunct>) -> bool {
    match expr {
        Expr::And(terms) => terms.iter().all(|t| collect_conjuncts(t, out)),
        Expr::Cmp(cmp) => {
            out.push(Conjunct {
                cmp: cmp.clone(),
                negated: false,
            });
            true
        }
        Expr::Not(inner) => match inner.as_ref() {
            Expr::Cmp(cmp) => {
                out.push(Conjunct {
                    cmp: cmp.clone(),
                    negated: true,
                });
                true
            }
            _ => false,
        },
        Expr::Or(_) => false,
    }
}

/// Matches a pure OR (or single leaf) of `label = X` comparisons.
fn as_label_union(expr: &Expr) -> Option<Vec<String>> {
    let branches: Vec<&Expr> = match expr {
        Expr::Or(branches) if branches.len() > 1 => branches.iter().collect(),
        _ => return None,
    };
    let mut labels = Vec::new();
    for branch in branches {
        match branch {
            Expr::Cmp(Comparison {
                field: Field::Label,
                op: CmpOp::Eq,
                value,
                ..
            }) => labels.push(normalize_label(&value.as_text())),
            _ => return None,
        }
    }
    Some(labels)
}

/// Folds one conjunct into the filter. Returns `false` when the comparison
/// has no faithful filter form (caller falls back to predicate mode).
fn apply_to_filter(conjunct: &Conjunct, filter: &mut IssueFilter, ctx: &CompileContext) -> bool {
    let cmp = &conjunct.cmp;

    // `NOT (f = v)` is `f != v`; `NOT (f != v)` is `f = v`. Other negated
    // operators could be flipped too, but orderings under NOT stay in
    // predicate mode to keep this table small.
    let op = match (conjunct.negated, cmp.op) {
        (false, op) => op,
        (true, CmpOp::Eq) => CmpOp::Ne,
        (true, CmpOp::Ne) => CmpOp::Eq,
        (true, _) => return false,
    };

    match (&cmp.field, op) {
        (Field::Status, CmpOp::Eq) => {
            filter.statuses.push(Status::from(cmp.value.as_text()));
            true
        }
        (Field::Status, CmpOp::Ne) => {
            filter
                .exclude_statuses
                .push(Status::from(cmp.value.as_text()));
            true
        }
        (Field::IssueType, CmpOp::Eq) => {
            filter.issue_types.push(IssueType::from(cmp.value.as_text()));
            true
        }
        (Field::Priority, op) => {
            let Value::Int(n) = &cmp.value else {
                return false;
            };
            let n = *n as i32;
            match op {
                CmpOp::Eq => filter.priority = Some(n),
                CmpOp::Le => filter.priority_max = Some(n),
                CmpOp::Lt => filter.priority_max = Some(n - 1),
                CmpOp::Ge => filter.priority_min = Some(n),
                CmpOp::Gt => filter.priority_min = Some(n + 1),
                CmpOp::Ne => return false,
            }
            true
        }
        (Field::Assignee, CmpOp::Eq) => {
            let value = cmp.value.as_text();
            if value.is_empty() {
                filter.unassigned = true;
            } else {
                filter.assignee = Some(value);
            }
            true
        }
        (Field::Owner, CmpOp::Eq) => {
            filter.owner = Some(cmp.value.as_text());
            true
        }
        (Field::Label, CmpOp::Eq) => {
            filter.labels.push(normalize_label(&cmp.value.as_text()));
            true
        }
        (Field::Id, CmpOp::Eq) => {
            filter.ids.push(cmp.value.as_text());
            true
        }
        (Field::Pinned, CmpOp::Eq | CmpOp::Ne) => {
            let b = cmp.value.as_text() == "true";
            filter.pinned = Some(if op == CmpOp::Eq { b } else { !b });
            true
        }
        (Field::Ephemeral, CmpOp::Eq | CmpOp::Ne) => {
            let b = cmp.value.as_text() == "true";
            filter.ephemeral = Some(if op == CmpOp::Eq { b } else { !b });
            true
        }
        (Field::Template, CmpOp::Eq | CmpOp::Ne) => {
            let b = cmp.value.as_text() == "true";
            filter.is_template = Some(if op == CmpOp::Eq { b } else { !b });
            true
        }
        (Field::Created, op) => {
            let Some(bound) = date_bound(&cmp.value, op, ctx) else {
                return false;
            };
            match op {
                CmpOp::Lt | CmpOp::Le => filter.created_before = Some(bound),
                CmpOp::Gt | CmpOp::Ge => filter.created_after = Some(bound),
                _ => return false,
            }
            true
        }
        (Field::Updated, op) => {
            let Some(bound) = date_bound(&cmp.value, op, ctx) else {
                return false;
            };
            match op {
                CmpOp::Lt | CmpOp::Le => filter.updated_before = Some(bound),
                CmpOp::Gt | CmpOp::Ge => filter.updated_after = Some(bound),
                _ => return false,
            }
            true
        }
        // spec_id equality over-approximates as a prefix match; title and
        // metadata have no pushdown at all.
        (Field::SpecId, CmpOp::Eq) => {
            filter.spec_prefix = Some(cmp.value.as_text());
            false
        }
        _ => false,
    }
}

/// Resolves a date comparison bound for the inclusive SQL filters.
///
/// The store keeps timestamps at millisecond precision, so the strict
/// operators shift the bound one tick to stay exact under `<=` / `>=`.
fn date_bound(
    value: &Value,
    op: CmpOp,
    ctx: &CompileContext,
) -> Option<chrono::DateTime<Utc>> {
    let bound = eval::resolve_instant(value, ctx.now)?;
    Some(match op {
        CmpOp::Lt => bound - chrono::Duration::milliseconds(1),
        CmpOp::Gt => bound + chrono::Duration::milliseconds(1),
        _ => bound,
    })
}
