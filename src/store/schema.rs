//! SQLite schema and migrations for the pipeline store.

use rusqlite::{Connection, Result as SqliteResult};

/// Current schema version.
pub const SCHEMA_VERSION: i32 = 1;

/// Initialize the database schema.
pub fn initialize_schema(conn: &Connection) -> SqliteResult<()> {
    // WAL mode for better concurrent access
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
        "CREATE TABLE IF NOT EXISTS targets (
            id TEXT PRIMARY KEY,
            universe_id TEXT NOT NULL,
            symbol TEXT NOT NULL,
            name TEXT NOT NULL,
            target_type TEXT NOT NULL,
            is_active INTEGER NOT NULL DEFAULT 1,
            llm_overrides TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS articles (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL,
            title TEXT NOT NULL,
            content TEXT,
            summary TEXT,
            first_seen_at TEXT NOT NULL,
            content_hash TEXT NOT NULL,
            fingerprint_hash TEXT NOT NULL,
            key_phrases TEXT,
            is_test INTEGER NOT NULL DEFAULT 0,
            UNIQUE (source_id, content_hash)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS signals (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            source_id TEXT NOT NULL,
            url TEXT NOT NULL,
            content TEXT NOT NULL,
            direction TEXT NOT NULL,
            detected_at TEXT NOT NULL,
            metadata TEXT,
            is_test INTEGER NOT NULL DEFAULT 0
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS predictors (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            article_id TEXT NOT NULL,
            analyst_slug TEXT NOT NULL,
            direction TEXT NOT NULL,
            strength INTEGER NOT NULL,
            confidence REAL NOT NULL,
            reasoning TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            consumed_by_prediction_id TEXT,
            expires_at TEXT NOT NULL,
            created_at TEXT NOT NULL,
            scenario_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS predictions (
            id TEXT PRIMARY KEY,
            target_id TEXT NOT NULL,
            direction TEXT NOT NULL,
            magnitude TEXT NOT NULL,
            confidence REAL NOT NULL,
            timeframe_hours INTEGER NOT NULL,
            expires_at TEXT NOT NULL,
            predicted_at TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            reasoning TEXT NOT NULL,
            analyst_ensemble TEXT,
            llm_ensemble TEXT,
            status TEXT NOT NULL DEFAULT 'active',
            analyst_slug TEXT NOT NULL,
            is_arbitrator INTEGER NOT NULL DEFAULT 0,
            context_versions TEXT,
            is_test INTEGER NOT NULL DEFAULT 0,
            test_scenario_id TEXT
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS prediction_snapshots (
            id TEXT PRIMARY KEY,
            prediction_id TEXT NOT NULL UNIQUE,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS source_subscriptions (
            id TEXT PRIMARY KEY,
            source_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            keywords_include TEXT,
            keywords_exclude TEXT,
            last_processed_at TEXT,
            is_active INTEGER NOT NULL DEFAULT 1,
            default_limit INTEGER
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS analysts (
            id TEXT PRIMARY KEY,
            slug TEXT NOT NULL UNIQUE,
            name TEXT NOT NULL,
            perspective TEXT NOT NULL,
            default_weight REAL NOT NULL DEFAULT 1.0,
            tier TEXT NOT NULL,
            performance_status TEXT NOT NULL DEFAULT 'active',
            is_active INTEGER NOT NULL DEFAULT 1
        )",
        [],
    )?;

    // Explicit analyst → target assignments; a target with no rows inherits
    // every active analyst.
    conn.execute(
        "CREATE TABLE IF NOT EXISTS analyst_assignments (
            analyst_id TEXT NOT NULL,
            target_id TEXT NOT NULL,
            PRIMARY KEY (analyst_id, target_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS analyst_context_versions (
            id TEXT PRIMARY KEY,
            analyst_id TEXT NOT NULL,
            fork_type TEXT NOT NULL,
            perspective TEXT NOT NULL,
            tier_instructions TEXT,
            default_weight REAL NOT NULL DEFAULT 1.0,
            version_number INTEGER NOT NULL,
            is_current INTEGER NOT NULL DEFAULT 1,
            agent_journal TEXT,
            changed_by TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS learnings (
            id TEXT PRIMARY KEY,
            analyst_id TEXT NOT NULL,
            target_id TEXT,
            content TEXT NOT NULL,
            created_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS target_snapshots (
            rowid_pk INTEGER PRIMARY KEY AUTOINCREMENT,
            target_id TEXT NOT NULL,
            price REAL NOT NULL,
            open REAL,
            high REAL,
            low REAL,
            volume REAL,
            change_24h_pct REAL,
            price_at TEXT NOT NULL
        )",
        [],
    )?;

    // Indexes for the hot paths
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_articles_source_seen ON articles(source_id, first_seen_at)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_signals_target ON signals(target_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictors_target_status ON predictors(target_id, status)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictors_article ON predictors(target_id, article_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_predictions_target_status ON predictions(target_id, status)",
        [],
    )?;
    // At most one active prediction per (target, analyst slug).
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_predictions_one_active
         ON predictions(target_id, analyst_slug) WHERE status = 'active'",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_context_versions_current
         ON analyst_context_versions(analyst_id, fork_type, is_current)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_learnings_analyst ON learnings(analyst_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_target_snapshots_target
         ON target_snapshots(target_id, price_at)",
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
        "SELECT COUNT(*) FROM sqlite_master WHERE type='table' AND name='predictors'",
        [],
        |row| row.get::<_, i32>(0),
    )
    .map(|count| count > 0)
    .unwrap_or(false)
}
