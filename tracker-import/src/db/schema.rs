//! Tracker tables
//!
//! Metadata rows keep the full object as JSON in `body`; the identifier
//! columns (`uid`, `code`, `name`) and `metadata_attribute_values` exist so
//! preheat can look objects up under any id scheme. Timestamps are RFC 3339
//! text.

use sqlx::SqlitePool;
use tracker_common::Result;

const TABLES: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS metadata (
        id INTEGER PRIMARY KEY,
        kind TEXT NOT NULL,
        uid TEXT NOT NULL,
        code TEXT,
        name TEXT NOT NULL,
        body TEXT NOT NULL,
        UNIQUE (kind, uid)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_metadata_code ON metadata (kind, code)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_metadata_name ON metadata (kind, name)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS metadata_attribute_values (
        metadata_id INTEGER NOT NULL REFERENCES metadata (id) ON DELETE CASCADE,
        attribute TEXT NOT NULL,
        value TEXT NOT NULL,
        PRIMARY KEY (metadata_id, attribute)
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_metadata_attribute_values ON metadata_attribute_values (attribute, value)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS users (
        id INTEGER PRIMARY KEY,
        uid TEXT NOT NULL UNIQUE,
        username TEXT NOT NULL UNIQUE
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS tracked_entities (
        uid TEXT PRIMARY KEY,
        tracked_entity_type_id INTEGER NOT NULL,
        org_unit_id INTEGER NOT NULL,
        inactive INTEGER NOT NULL DEFAULT 0,
        deleted INTEGER NOT NULL DEFAULT 0,
        attributes TEXT NOT NULL DEFAULT '[]',
        created TEXT NOT NULL,
        created_at_client TEXT,
        last_updated TEXT NOT NULL,
        last_updated_at_client TEXT,
        created_by TEXT,
        last_updated_by TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS enrollments (
        uid TEXT PRIMARY KEY,
        tracked_entity TEXT NOT NULL REFERENCES tracked_entities (uid),
        program_id INTEGER NOT NULL,
        org_unit_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        enrolled_at TEXT,
        occurred_at TEXT,
        deleted INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL,
        created_at_client TEXT,
        last_updated TEXT NOT NULL,
        last_updated_at_client TEXT,
        created_by TEXT,
        last_updated_by TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_enrollments_program ON enrollments (program_id)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS events (
        uid TEXT PRIMARY KEY,
        enrollment TEXT REFERENCES enrollments (uid),
        program_id INTEGER NOT NULL,
        program_stage_id INTEGER NOT NULL,
        org_unit_id INTEGER NOT NULL,
        attribute_option_combo_id INTEGER NOT NULL,
        status TEXT NOT NULL,
        occurred_at TEXT,
        scheduled_at TEXT,
        assigned_user_id INTEGER,
        data_values TEXT NOT NULL DEFAULT '[]',
        deleted INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL,
        created_at_client TEXT,
        last_updated TEXT NOT NULL,
        last_updated_at_client TEXT,
        created_by TEXT,
        last_updated_by TEXT
    )
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS relationships (
        uid TEXT PRIMARY KEY,
        relationship_type_id INTEGER NOT NULL,
        relationship_type TEXT NOT NULL,
        bidirectional INTEGER NOT NULL DEFAULT 0,
        from_item TEXT NOT NULL,
        to_item TEXT NOT NULL,
        key TEXT NOT NULL,
        inverted_key TEXT NOT NULL,
        deleted INTEGER NOT NULL DEFAULT 0,
        created TEXT NOT NULL,
        created_at_client TEXT,
        last_updated TEXT NOT NULL,
        last_updated_at_client TEXT,
        created_by TEXT,
        last_updated_by TEXT
    )
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_relationships_key ON relationships (key)
    "#,
    r#"
    CREATE INDEX IF NOT EXISTS idx_relationships_inverted_key ON relationships (inverted_key)
    "#,
    r#"
    CREATE TABLE IF NOT EXISTS program_owners (
        tracked_entity TEXT NOT NULL REFERENCES tracked_entities (uid),
        program TEXT NOT NULL,
        org_unit TEXT NOT NULL,
        PRIMARY KEY (tracked_entity, program)
    )
    "#,
];

/// Create every tracker table that does not exist yet
pub async fn create_tables(pool: &SqlitePool) -> Result<()> {
    for statement in TABLES {
        sqlx::query(statement).execute(pool).await?;
    }
    tracing::info!(statements = TABLES.len(), "Tracker tables initialized");
    Ok(())
}
