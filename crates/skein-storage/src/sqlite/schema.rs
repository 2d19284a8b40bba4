//! DDL and migrations for the SQLite schema.
//!
//! Timestamps are TEXT in RFC 3339 with millisecond precision (SQLite has no
//! datetime type), booleans are INTEGER 0/1, JSON blobs are TEXT.

/// Current schema version; bumped whenever DDL or migrations change.
pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// Core DDL executed during `init_schema`.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    // -- Issues --------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS issues (
        id                  TEXT PRIMARY KEY,
        content_hash        TEXT NOT NULL DEFAULT '',
        title               TEXT NOT NULL,
        description         TEXT NOT NULL DEFAULT '',
        design              TEXT NOT NULL DEFAULT '',
        acceptance_criteria TEXT NOT NULL DEFAULT '',
        notes               TEXT NOT NULL DEFAULT '',
        spec_id             TEXT NOT NULL DEFAULT '',
        status              TEXT NOT NULL DEFAULT 'open',
        priority            INTEGER NOT NULL DEFAULT 2,
        issue_type          TEXT NOT NULL DEFAULT 'task',
        assignee            TEXT NOT NULL DEFAULT '',
        owner               TEXT NOT NULL DEFAULT '',
        created_at          TEXT NOT NULL,
        updated_at          TEXT NOT NULL,
        closed_at           TEXT,
        close_reason        TEXT NOT NULL DEFAULT '',
        closed_by_session   TEXT NOT NULL DEFAULT '',
        external_ref        TEXT,
        metadata            TEXT NOT NULL DEFAULT '{}',
        pinned              INTEGER NOT NULL DEFAULT 0,
        ephemeral           INTEGER NOT NULL DEFAULT 0,
        is_template         INTEGER NOT NULL DEFAULT 0
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_issues_status ON issues(status)",
    "CREATE INDEX IF NOT EXISTS idx_issues_priority ON issues(priority)",
    "CREATE INDEX IF NOT EXISTS idx_issues_issue_type ON issues(issue_type)",
    "CREATE INDEX IF NOT EXISTS idx_issues_assignee ON issues(assignee)",
    "CREATE INDEX IF NOT EXISTS idx_issues_updated_at ON issues(updated_at)",
    "CREATE INDEX IF NOT EXISTS idx_issues_spec_id ON issues(spec_id)",
    "CREATE INDEX IF NOT EXISTS idx_issues_external_ref ON issues(external_ref)",
    // -- Dependencies --------------------------------------------------------
    // A pair of issues may carry several edges of different types, so the
    // type is part of the primary key. No foreign keys: endpoints may be
    // `external:` references that never appear in the issues table, and
    // existence of local endpoints is checked in code.
    r#"
    CREATE TABLE IF NOT EXISTS dependencies (
        issue_id      TEXT NOT NULL,
        depends_on_id TEXT NOT NULL,
        dep_type      TEXT NOT NULL DEFAULT 'blocks',
        created_at    TEXT NOT NULL,
        created_by    TEXT NOT NULL DEFAULT '',
        PRIMARY KEY (issue_id, depends_on_id, dep_type)
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_dependencies_issue ON dependencies(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on ON dependencies(depends_on_id)",
    "CREATE INDEX IF NOT EXISTS idx_dependencies_depends_on_type ON dependencies(depends_on_id, dep_type)",
    // -- Labels --------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS labels (
        issue_id TEXT NOT NULL,
        label    TEXT NOT NULL,
        PRIMARY KEY (issue_id, label),
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_labels_label ON labels(label)",
    // -- Comments ------------------------------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS comments (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        author     TEXT NOT NULL,
        text       TEXT NOT NULL,
        created_at TEXT NOT NULL,
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_comments_issue ON comments(issue_id)",
    // -- Events (append-only audit trail) ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS events (
        id         INTEGER PRIMARY KEY AUTOINCREMENT,
        issue_id   TEXT NOT NULL,
        kind       TEXT NOT NULL,
        actor      TEXT NOT NULL,
        payload    TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_events_issue ON events(issue_id)",
    "CREATE INDEX IF NOT EXISTS idx_events_created_at ON events(created_at)",
    // -- Decision points (one per gate issue) --------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS decision_points (
        issue_id        TEXT PRIMARY KEY,
        prompt          TEXT NOT NULL,
        options         TEXT NOT NULL,
        default_option  TEXT NOT NULL,
        iteration       INTEGER NOT NULL DEFAULT 1,
        max_iterations  INTEGER NOT NULL DEFAULT 1,
        prior_id        TEXT,
        guidance        TEXT NOT NULL DEFAULT '',
        selected_option TEXT,
        response_text   TEXT NOT NULL DEFAULT '',
        responded_at    TEXT,
        responded_by    TEXT NOT NULL DEFAULT '',
        FOREIGN KEY (issue_id) REFERENCES issues(id) ON DELETE CASCADE ON UPDATE CASCADE
    )
    "#,
    // -- Dirty set (needs-export tracking) -----------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS dirty_issues (
        issue_id  TEXT PRIMARY KEY,
        marked_at TEXT NOT NULL
    )
    "#,
    // -- Id counters (sequential mode and child ids) -------------------------
    r#"
    CREATE TABLE IF NOT EXISTS counters (
        scope TEXT PRIMARY KEY,
        value INTEGER NOT NULL DEFAULT 0
    )
    "#,
    // -- Config (project settings mirrored into the store) -------------------
    r#"
    CREATE TABLE IF NOT EXISTS config (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
    // -- Metadata (engine-internal state) ------------------------------------
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        key   TEXT PRIMARY KEY,
        value TEXT NOT NULL
    )
    "#,
];

/// Schema migrations applied after the initial DDL.
///
/// `(name, sql)` pairs, tracked in `metadata` under `migration:<name>` so
/// each runs at most once.
pub const MIGRATIONS: &[(&str, &str)] = &[
    // e.g. ("001_add_foo", "ALTER TABLE issues ADD COLUMN foo TEXT DEFAULT ''"),
];

/// Metadata keys the engine maintains.
pub mod meta_keys {
    /// RFC 3339 instant of the last successful sync.
    pub const LAST_SYNC: &str = "last_sync";
    /// Hex sha-256 of the mirror file as last written.
    pub const MIRROR_HASH: &str = "mirror_hash";
    /// Engine version that last touched the store.
    pub const LAST_ENGINE_VERSION: &str = "last_engine_version";
    /// RFC 3339 instant of the last mirror compaction.
    pub const MIRROR_COMPACTED_AT: &str = "mirror_compacted_at";
    /// Per-issue export hash prefix; full key is `import_hash:{id}`.
    pub const IMPORT_HASH_PREFIX: &str = "import_hash:";
}
