//! Identifier allocation and renames.
//!
//! Sequential mode walks a per-prefix counter. Hash mode derives a base-36
//! suffix from the issue's identity inputs, resampling the nonce on
//! collision up to [`ids::MAX_NONCE_ATTEMPTS`] times before widening the
//! suffix by one character. Child ids walk a per-parent counter.

use rusqlite::{Connection, OptionalExtension, params};

use skein_core::ids;

use crate::error::{Result, StorageError};
use crate::sqlite::store::SqliteStore;
use crate::traits::NewIdRequest;

/// Bumps and returns the named counter.
pub(crate) fn next_counter(conn: &Connection, scope: &str) -> Result<i64> {
    conn.execute(
        "INSERT INTO counters (scope, value) VALUES (?1, 1)
         ON CONFLICT(scope) DO UPDATE SET value = value + 1",
        params![scope],
    )?;
    let value: i64 = conn.query_row(
        "SELECT value FROM counters WHERE scope = ?1",
        params![scope],
        |row| row.get(0),
    )?;
    Ok(value)
}

fn id_taken(conn: &Connection, id: &str) -> Result<bool> {
    Ok(conn
        .query_row("SELECT 1 FROM issues WHERE id = ?1", params![id], |_| Ok(()))
        .optional()?
        .is_some())
}

/// Mints a fresh unused id per the request.
pub(crate) fn allocate_id_on_conn(conn: &Connection, req: &NewIdRequest) -> Result<String> {
    // Child ids: walk the per-parent counter past any taken slots (imported
    // children may have advanced beyond it).
    if let Some(ref parent) = req.parent {
        if !id_taken(conn, parent)? {
            return Err(StorageError::not_found("issue", parent.clone()));
        }
        let scope = format!("child:{parent}");
        loop {
            let n = next_counter(conn, &scope)?;
            let candidate = ids::child_id(parent, n as u32);
            if !id_taken(conn, &candidate)? {
                return Ok(candidate);
            }
        }
    }

    if !req.hash_mode {
        let scope = format!("seq:{}", req.prefix);
        loop {
            let n = next_counter(conn, &scope)?;
            let candidate = ids::sequential_id(&req.prefix, n);
            if !id_taken(conn, &candidate)? {
                return Ok(candidate);
            }
        }
    }

    // Hash mode: resample the nonce, then widen.
    let mut length = req.hash_length.clamp(ids::MIN_HASH_LEN, ids::MAX_HASH_LEN);
    loop {
        for nonce in 0..ids::MAX_NONCE_ATTEMPTS {
            let candidate = ids::hash_id(
                &req.prefix,
                &req.title,
                req.created_at,
                &req.salt,
                nonce,
                length,
            );
            if !id_taken(conn, &candidate)? {
                return Ok(candidate);
            }
        }
        if length >= ids::MAX_HASH_LEN {
            return Err(StorageError::invalid(format!(
                "exhausted hash id space at length {length} for prefix '{}'",
                req.prefix
            )));
        }
        length += 1;
    }
}

/// Renames an issue, rewriting both dependency endpoints. Runs on whatever
/// connection the caller holds; the public entry wraps it transactionally.
pub(crate) fn update_issue_id_on_conn(
    conn: &Connection,
    old_id: &str,
    new_id: &str,
    actor: &str,
) -> Result<()> {
    if ids::parse_id(new_id).is_none() {
        return Err(StorageError::invalid(format!(
            "new id '{new_id}' does not match the identifier grammar"
        )));
    }
    if id_taken(conn, new_id)? {
        return Err(StorageError::DuplicateId {
            id: new_id.to_string(),
        });
    }

    let affected = conn.execute(
        "UPDATE issues SET id = ?1 WHERE id = ?2",
        params![new_id, old_id],
    )?;
    if affected == 0 {
        return Err(StorageError::not_found("issue", old_id));
    }

    // labels/comments/decision_points follow via ON UPDATE CASCADE; the
    // dependency and dirty tables carry no foreign keys.
    conn.execute(
        "UPDATE dependencies SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE dependencies SET depends_on_id = ?1 WHERE depends_on_id = ?2",
        params![new_id, old_id],
    )?;
    conn.execute(
        "UPDATE dirty_issues SET issue_id = ?1 WHERE issue_id = ?2",
        params![new_id, old_id],
    )?;

    let now_str = crate::sqlite::issues::format_datetime(&chrono::Utc::now());
    crate::sqlite::issues::emit_event(
        conn,
        new_id,
        skein_core::enums::EventKind::Updated,
        actor,
        Some(&format!("renamed from {old_id}")),
        &now_str,
    )?;
    crate::sqlite::dirty::mark_dirty_on_conn(conn, new_id)?;
    crate::sqlite::dirty::clear_dirty_on_conn(conn, old_id)?;
    Ok(())
}

impl SqliteStore {
    pub fn allocate_id_impl(&self, req: &NewIdRequest) -> Result<String> {
        self.check_cancelled()?;
        let conn = self.lock_conn()?;
        allocate_id_on_conn(&conn, req)
    }

    pub fn update_issue_id_impl(&self, old_id: &str, new_id: &str, actor: &str) -> Result<()> {
        self.check_cancelled()?;
        let mut conn = self.lock_conn()?;
        let tx = conn
            .transaction_with_behavior(rusqlite::TransactionBehavior::Immediate)
            .map_err(|e| StorageError::Transaction(format!("failed to begin: {e}")))?;
        update_issue_id_on_conn(&tx, old_id, new_id, actor)?;
        tx.commit()
            .map_err(|e| StorageError::Transaction(format!("failed to commit: {e}")))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use skein_core::dependency::Dependency;
    use skein_core::enums::DependencyType;
    use skein_core::issue::IssueBuilder;

    fn test_store() -> SqliteStore {
        SqliteStore::open_in_memory().unwrap()
    }

    fn hash_req(title: &str) -> NewIdRequest {
        NewIdRequest {
            prefix: "sk".into(),
            hash_mode: true,
            hash_length: 3,
            salt: "salt".into(),
            title: title.into(),
            created_at: Utc::now(),
            parent: None,
        }
    }

    #[test]
    fn sequential_ids_increment() {
        let store = test_store();
        let req = NewIdRequest {
            prefix: "sk".into(),
            hash_mode: false,
            hash_length: 3,
            salt: String::new(),
            title: "t".into(),
            created_at: Utc::now(),
            parent: None,
        };
        assert_eq!(store.allocate_id_impl(&req).unwrap(), "sk-1");
        // Allocation alone does not reserve; simulate the issue landing.
        store
            .create_issue_impl(&IssueBuilder::new("a").id("sk-1").build(), "t")
            .unwrap();
        assert_eq!(store.allocate_id_impl(&req).unwrap(), "sk-2");
    }

    #[test]
    fn sequential_skips_taken_slots() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("a").id("sk-1").build(), "t")
            .unwrap();
        let req = NewIdRequest {
            prefix: "sk".into(),
            hash_mode: false,
            hash_length: 3,
            salt: String::new(),
            title: "t".into(),
            created_at: Utc::now(),
            parent: None,
        };
        // Counter starts at 1 which is taken; allocator walks past it.
        assert_eq!(store.allocate_id_impl(&req).unwrap(), "sk-2");
    }

    #[test]
    fn hash_id_shape_and_uniqueness() {
        let store = test_store();
        let id = store.allocate_id_impl(&hash_req("Implement export")).unwrap();
        assert!(id.starts_with("sk-"));
        assert_eq!(id.len(), "sk-".len() + 3);
        assert!(ids::parse_id(&id).is_some());
    }

    #[test]
    fn hash_collision_resamples() {
        let store = test_store();
        let req = hash_req("Same title");
        let first = store.allocate_id_impl(&req).unwrap();
        store
            .create_issue_impl(&IssueBuilder::new("a").id(&first).build(), "t")
            .unwrap();
        // Identical inputs: nonce 0 collides, allocator must move on.
        let second = store.allocate_id_impl(&req).unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn child_ids_walk_the_counter() {
        let store = test_store();
        store
            .create_issue_impl(&IssueBuilder::new("p").id("sk-par").build(), "t")
            .unwrap();
        let mut req = hash_req("child");
        req.parent = Some("sk-par".into());

        assert_eq!(store.allocate_id_impl(&req).unwrap(), "sk-par.1");
        store
            .create_issue_impl(&IssueBuilder::new("c").id("sk-par.1").build(), "t")
            .unwrap();
        assert_eq!(store.allocate_id_impl(&req).unwrap(), "sk-par.2");
    }

    #[test]
    fn child_of_missing_parent_fails() {
        let store = test_store();
        let mut req = hash_req("child");
        req.parent = Some("sk-ghost".into());
        assert!(store.allocate_id_impl(&req).unwrap_err().is_not_found());
    }

    #[test]
    fn rename_rewrites_endpoints() {
        let store = test_store();
        for id in ["sk-old", "sk-dep"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }
        store
            .add_dependency_impl(
                &Dependency::new("sk-dep", "sk-old", DependencyType::Blocks, "t"),
                "t",
            )
            .unwrap();
        store.add_label_impl("sk-old", "keep", "t").unwrap();

        store.update_issue_id_impl("sk-old", "sk-new", "t").unwrap();

        assert!(store.get_issue_impl("sk-old").is_err());
        let renamed = store.get_issue_impl("sk-new").unwrap();
        assert_eq!(renamed.title, "x");
        assert_eq!(store.get_labels_impl("sk-new").unwrap(), vec!["keep"]);

        let deps = store.get_dependency_records_impl("sk-dep").unwrap();
        assert_eq!(deps[0].depends_on_id, "sk-new");
    }

    #[test]
    fn rename_to_taken_id_fails() {
        let store = test_store();
        for id in ["sk-a", "sk-b"] {
            store
                .create_issue_impl(&IssueBuilder::new("x").id(id).build(), "t")
                .unwrap();
        }
        let err = store.update_issue_id_impl("sk-a", "sk-b", "t").unwrap_err();
        assert!(matches!(err, StorageError::DuplicateId { .. }));
    }
}
