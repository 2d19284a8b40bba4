//! Three-way merge of mirror files.
//!
//! Both branches rewrote the mirror; the merge reconciles them record by
//! record. Fields merge individually: a field changed on one side only takes
//! that side; a field changed on both sides resolves last-writer-wins on
//! `updated_at`, ties going to the lexicographically larger actor. Label
//! sets union. Dependency sets union minus any edge that would close a
//! cycle in the merged ready-graph.

use std::collections::{HashMap, HashSet};
use std::io::BufReader;

use tracing::warn;

use skein_core::enums::DependencyType;
use skein_core::mirror::{self, MirrorComment, MirrorDep, MirrorRecord};
use skein_storage::{Result, StorageError};

/// Report of a merge run.
#[derive(Debug, Clone, Default)]
pub struct MergeReport {
    /// Ids whose fields conflicted and were resolved last-writer-wins.
    pub conflicts_resolved: Vec<String>,
    /// Edges dropped because they would close a cycle: `(from, to, type)`.
    pub dropped_edges: Vec<(String, String, String)>,
}

/// Merges two descendants of a common ancestor mirror. Returns the merged
/// mirror text and the report.
pub fn merge_mirrors(base: &str, ours: &str, theirs: &str) -> Result<(String, MergeReport)> {
    let base_map = parse_to_map(base)?;
    let (ours_map, ours_order) = parse_to_ordered_map(ours)?;
    let (theirs_map, theirs_order) = parse_to_ordered_map(theirs)?;

    let mut report = MergeReport::default();

    // Union order: our order first, then their additions.
    let mut order: Vec<String> = ours_order.clone();
    for id in &theirs_order {
        if !ours_map.contains_key(id) {
            order.push(id.clone());
        }
    }

    let mut merged: Vec<MirrorRecord> = Vec::new();
    for id in &order {
        let base_rec = base_map.get(id);
        let ours_rec = ours_map.get(id);
        let theirs_rec = theirs_map.get(id);

        let record = match (ours_rec, theirs_rec) {
            (Some(l), Some(r)) => Some(merge_records(base_rec, l, r, &mut report)),
            // Present on one side only: an addition survives, a deletion of
            // an unmodified record sticks, a modify/delete conflict keeps
            // the modification.
            (Some(l), None) => match base_rec {
                None => Some(l.clone()),
                Some(b) if records_equal(b, l) => None,
                Some(_) => {
                    report.conflicts_resolved.push(id.clone());
                    Some(l.clone())
                }
            },
            (None, Some(r)) => match base_rec {
                None => Some(r.clone()),
                Some(b) if records_equal(b, r) => None,
                Some(_) => {
                    report.conflicts_resolved.push(id.clone());
                    Some(r.clone())
                }
            },
            (None, None) => None,
        };
        if let Some(record) = record {
            merged.push(record);
        }
    }

    drop_cycle_edges(&mut merged, &mut report);

    let mut out = String::new();
    for record in &merged {
        out.push_str(&serde_json::to_string(record)?);
        out.push('\n');
    }
    Ok((out, report))
}

// ---------------------------------------------------------------------------
// Record-level merge
// ---------------------------------------------------------------------------

/// The actor a record's changes are attributed to, for tie-breaking.
fn record_actor(record: &MirrorRecord) -> &str {
    if !record.owner.is_empty() {
        &record.owner
    } else {
        &record.assignee
    }
}

fn records_equal(a: &MirrorRecord, b: &MirrorRecord) -> bool {
    // RawValue defeats PartialEq; compare serialised forms.
    serde_json::to_string(a).ok() == serde_json::to_string(b).ok()
}

fn merge_records(
    base: Option<&MirrorRecord>,
    ours: &MirrorRecord,
    theirs: &MirrorRecord,
    report: &mut MergeReport,
) -> MirrorRecord {
    // Last writer wins on double-changed fields; ties go to the
    // lexicographically larger actor.
    let ours_wins = match ours.updated_at.cmp(&theirs.updated_at) {
        std::cmp::Ordering::Greater => true,
        std::cmp::Ordering::Less => false,
        std::cmp::Ordering::Equal => record_actor(ours) >= record_actor(theirs),
    };

    let mut conflicted = false;
    macro_rules! pick {
        ($field:ident) => {
            pick_field(
                base.map(|b| &b.$field),
                &ours.$field,
                &theirs.$field,
                ours_wins,
                &mut conflicted,
            )
        };
    }

    let metadata = {
        let to_text = |r: &MirrorRecord| r.metadata.as_ref().map(|m| m.get().to_string());
        let picked = pick_field(
            base.map(to_text).as_ref(),
            &to_text(ours),
            &to_text(theirs),
            ours_wins,
            &mut conflicted,
        );
        picked.and_then(|raw| serde_json::value::RawValue::from_string(raw).ok())
    };

    // Labels union rather than conflict.
    let mut labels: Vec<String> = ours.labels.clone();
    for label in &theirs.labels {
        if !labels.contains(label) {
            labels.push(label.clone());
        }
    }
    labels.sort();

    // Dependency union; cycle pruning happens globally afterwards.
    let mut dependencies: Vec<MirrorDep> = ours.dependencies.clone();
    for dep in &theirs.dependencies {
        if !dependencies
            .iter()
            .any(|d| d.to == dep.to && d.dep_type == dep.dep_type)
        {
            dependencies.push(dep.clone());
        }
    }
    dependencies.sort_by(|a, b| {
        (a.to.as_str(), a.dep_type.as_str()).cmp(&(b.to.as_str(), b.dep_type.as_str()))
    });

    // Comments are immutable posts: union, deduplicated, in time order.
    let mut comments: Vec<MirrorComment> = ours.comments.clone();
    for comment in &theirs.comments {
        if !comments.iter().any(|c| {
            c.author == comment.author
                && c.text == comment.text
                && c.created_at == comment.created_at
        }) {
            comments.push(comment.clone());
        }
    }
    comments.sort_by_key(|c| c.created_at);

    let merged = MirrorRecord {
        id: ours.id.clone(),
        title: pick!(title),
        issue_type: pick!(issue_type),
        status: pick!(status),
        priority: pick!(priority),
        assignee: pick!(assignee),
        owner: pick!(owner),
        description: pick!(description),
        design: pick!(design),
        acceptance_criteria: pick!(acceptance_criteria),
        notes: pick!(notes),
        labels,
        pinned: pick!(pinned),
        ephemeral: pick!(ephemeral),
        is_template: pick!(is_template),
        spec_id: pick!(spec_id),
        external_ref: pick!(external_ref),
        metadata,
        created_at: ours.created_at.min(theirs.created_at),
        updated_at: ours.updated_at.max(theirs.updated_at),
        closed_at: pick!(closed_at),
        dependencies,
        comments,
        decision: pick!(decision),
    };

    if conflicted {
        report.conflicts_resolved.push(merged.id.clone());
    }
    merged
}

/// Per-field three-way resolution.
fn pick_field<T: Clone + PartialEq>(
    base: Option<&T>,
    ours: &T,
    theirs: &T,
    ours_wins: bool,
    conflicted: &mut bool,
) -> T {
    if ours == theirs {
        return ours.clone();
    }
    if base == Some(ours) {
        return theirs.clone();
    }
    if base == Some(theirs) {
        return ours.clone();
    }
    // Changed on both sides (or no base): last writer wins.
    *conflicted = true;
    if ours_wins {
        ours.clone()
    } else {
        theirs.clone()
    }
}

// ---------------------------------------------------------------------------
// Cycle-safe dependency union
// ---------------------------------------------------------------------------

/// Rebuilds every record's edge list, dropping edges that would close a
/// cycle in the merged ready-affecting graph. Edges are admitted in a
/// deterministic order so both sides of a fork converge on the same drop
/// set.
fn drop_cycle_edges(records: &mut [MirrorRecord], report: &mut MergeReport) {
    let mut candidates: Vec<(String, MirrorDep)> = Vec::new();
    for record in records.iter() {
        for dep in &record.dependencies {
            candidates.push((record.id.clone(), dep.clone()));
        }
    }
    candidates.sort_by(|a, b| {
        (a.0.as_str(), a.1.to.as_str(), a.1.dep_type.as_str())
            .cmp(&(b.0.as_str(), b.1.to.as_str(), b.1.dep_type.as_str()))
    });

    let mut graph: HashMap<String, Vec<String>> = HashMap::new();
    let mut admitted: HashSet<(String, String, String)> = HashSet::new();

    for (from, dep) in &candidates {
        let key = (
            from.clone(),
            dep.to.clone(),
            dep.dep_type.as_str().to_string(),
        );
        if !gates_readiness(dep) {
            admitted.insert(key);
            continue;
        }
        if reaches(&graph, &dep.to, from) {
            warn!(from = %from, to = %dep.to, "dropping merge edge that would close a cycle");
            report
                .dropped_edges
                .push((from.clone(), dep.to.clone(), dep.dep_type.as_str().to_string()));
            continue;
        }
        graph.entry(from.clone()).or_default().push(dep.to.clone());
        admitted.insert(key);
    }

    for record in records.iter_mut() {
        let id = record.id.clone();
        record.dependencies.retain(|dep| {
            admitted.contains(&(
                id.clone(),
                dep.to.clone(),
                dep.dep_type.as_str().to_string(),
            ))
        });
    }
}

fn gates_readiness(dep: &MirrorDep) -> bool {
    matches!(
        dep.dep_type,
        DependencyType::Blocks | DependencyType::ParentChild
    ) && !skein_core::dependency::is_external_endpoint(&dep.to)
}

fn reaches(graph: &HashMap<String, Vec<String>>, from: &str, target: &str) -> bool {
    if from == target {
        return true;
    }
    let mut stack = vec![from];
    let mut seen: HashSet<&str> = HashSet::new();
    while let Some(node) = stack.pop() {
        if node == target {
            return true;
        }
        if !seen.insert(node) {
            continue;
        }
        if let Some(nexts) = graph.get(node) {
            stack.extend(nexts.iter().map(String::as_str));
        }
    }
    false
}

// ---------------------------------------------------------------------------
// Parsing helpers
// ---------------------------------------------------------------------------

fn parse_to_map(text: &str) -> Result<HashMap<String, MirrorRecord>> {
    Ok(parse_to_ordered_map(text)?.0)
}

fn parse_to_ordered_map(text: &str) -> Result<(HashMap<String, MirrorRecord>, Vec<String>)> {
    let reader = BufReader::new(text.as_bytes());
    let mut map = HashMap::new();
    let mut order = Vec::new();
    for item in mirror::read_records(reader) {
        let (_, record) = item.map_err(|e| StorageError::invalid(e.to_string()))?;
        if !map.contains_key(&record.id) {
            order.push(record.id.clone());
        }
        map.insert(record.id.clone(), record);
    }
    Ok((map, order))
}
