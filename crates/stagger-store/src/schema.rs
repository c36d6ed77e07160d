//! Catalog schema SQL.

/// Capacity-limited stores and their cleanup settings.
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS capacity_stores (
    name TEXT PRIMARY KEY,
    max_capacity_mb INTEGER NOT NULL CHECK (max_capacity_mb > 0),
    used_mb INTEGER NOT NULL DEFAULT 0,
    size_based_cleanup INTEGER NOT NULL DEFAULT 1,
    time_based_cleanup INTEGER NOT NULL DEFAULT 0,
    read_only INTEGER NOT NULL DEFAULT 0,
    updated_at INTEGER
);

CREATE INDEX IF NOT EXISTS idx_stores_capacity ON capacity_stores(max_capacity_mb DESC, name ASC);

CREATE TABLE IF NOT EXISTS capacity_changes (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    name TEXT NOT NULL,
    old_capacity_mb INTEGER NOT NULL,
    new_capacity_mb INTEGER NOT NULL,
    changed_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_changes_name ON capacity_changes(name);
"#;

/// Every ceiling change is recorded in `capacity_changes`.
pub const HISTORY_TRIGGER_SQL: &str = r#"
CREATE TRIGGER IF NOT EXISTS capacity_stores_au AFTER UPDATE OF max_capacity_mb ON capacity_stores
WHEN old.max_capacity_mb <> new.max_capacity_mb BEGIN
    INSERT INTO capacity_changes(name, old_capacity_mb, new_capacity_mb, changed_at)
    VALUES (new.name, old.max_capacity_mb, new.max_capacity_mb, COALESCE(new.updated_at, 0));
END;
"#;
