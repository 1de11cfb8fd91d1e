//! SQLite schema for the knowledge graph store.
//!
//! Graph shape, relationally: `action_graphs.fingerprint_hash` is the
//! TRIGGERS edge, `steps.graph_id` is HAS_STEP, `step_edges` carries the
//! STARTS_WITH entry point and the NEXT chain, `findings.graph_id` is
//! PRODUCED, and `repairs` records REPAIRED_TO splices.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    let current_version: i32 = conn
        .query_row(
            "SELECT COALESCE(MAX(version), 0) FROM schema_version",
            [],
            |row| row.get(0),
        )
        .unwrap_or(0);

    if current_version < 1 {
        apply_v1_schema(conn)?;
    }

    Ok(())
}

fn apply_v1_schema(conn: &Connection) -> SqliteResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS fingerprints (
            hash TEXT PRIMARY KEY,
            tech_stack TEXT NOT NULL,
            auth_model TEXT NOT NULL,
            endpoint_pattern TEXT NOT NULL,
            security_signals TEXT NOT NULL DEFAULT '[]',
            observation_text TEXT,
            observation_embedding BLOB
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS action_graphs (
            id TEXT PRIMARY KEY,
            fingerprint_hash TEXT NOT NULL REFERENCES fingerprints(hash) ON DELETE CASCADE,
            vulnerability_type TEXT NOT NULL,
            description TEXT NOT NULL,
            confidence REAL,
            times_executed INTEGER NOT NULL DEFAULT 0,
            times_succeeded INTEGER NOT NULL DEFAULT 0,
            created_at TEXT NOT NULL DEFAULT (datetime('now')),
            updated_at TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS steps (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            graph_id TEXT NOT NULL REFERENCES action_graphs(id) ON DELETE CASCADE,
            step_order INTEGER NOT NULL,
            phase TEXT NOT NULL,
            step_type TEXT NOT NULL,
            command TEXT NOT NULL,
            parameters TEXT NOT NULL DEFAULT '{}',
            output_file TEXT,
            success_criteria TEXT,
            deterministic INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // STARTS_WITH rows have a NULL from_step; NEXT rows link two steps.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS step_edges (
            graph_id TEXT NOT NULL REFERENCES action_graphs(id) ON DELETE CASCADE,
            kind TEXT NOT NULL CHECK (kind IN ('STARTS_WITH', 'NEXT')),
            from_step INTEGER REFERENCES steps(id) ON DELETE CASCADE,
            to_step INTEGER NOT NULL REFERENCES steps(id) ON DELETE CASCADE
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS findings (
            id TEXT PRIMARY KEY,
            graph_id TEXT NOT NULL REFERENCES action_graphs(id) ON DELETE CASCADE,
            observation TEXT NOT NULL,
            severity TEXT NOT NULL,
            evidence_summary TEXT NOT NULL,
            target_url TEXT,
            observation_embedding BLOB,
            discovered_at TEXT NOT NULL DEFAULT (datetime('now'))
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS repairs (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            graph_id TEXT NOT NULL REFERENCES action_graphs(id) ON DELETE CASCADE,
            failed_order INTEGER NOT NULL,
            reason TEXT NOT NULL,
            repaired_at TEXT NOT NULL DEFAULT (datetime('now')),
            old_step TEXT,
            new_step TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_graphs_fingerprint
         ON action_graphs(fingerprint_hash, created_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_steps_graph ON steps(graph_id, step_order)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_edges_graph ON step_edges(graph_id, kind)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_findings_graph ON findings(graph_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_repairs_graph ON repairs(graph_id, repaired_at)",
        [],
    )?;

    conn.execute("INSERT INTO schema_version (version) VALUES (1)", [])?;

    Ok(())
}

/// Get the current schema version.
pub fn get_schema_version(conn: &Connection) -> SqliteResult<i32> {
    conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )
}

/// Check if the schema is initialized.
pub fn is_initialized(conn: &Connection) -> bool {
    conn.query_row(
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='fingerprints'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}

/// Drop all knowledge graph tables and recreate the schema.
pub fn reset_schema(conn: &Connection) -> SqliteResult<()> {
    for table in [
        "repairs",
        "findings",
        "step_edges",
        "steps",
        "action_graphs",
        "fingerprints",
        "schema_version",
    ] {
        conn.execute(&format!("DROP TABLE IF EXISTS {}", table), [])?;
    }
    initialize_schema(conn)
}
