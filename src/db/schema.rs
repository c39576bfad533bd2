//! SQL DDL for all lensmatch tables.
//!
//! Catalogue tables (`survey_questions`, `content_units`, `photographers`,
//! `quiz_sessions`), the `embedding_jobs` queue, the append-only
//! `match_runs`/`match_results` audit trail, and `schema_meta`. All DDL uses
//! `IF NOT EXISTS` for idempotent initialization.

use rusqlite::Connection;

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS survey_questions (
    question_key TEXT PRIMARY KEY,
    question_text TEXT NOT NULL,
    question_type TEXT NOT NULL CHECK(question_type IN ('single_choice','multi_choice','image_choice','freeform')),
    weight_category TEXT NOT NULL CHECK(weight_category IN ('style_emotion','communication_psychology','purpose_story','companion')),
    base_weight REAL NOT NULL DEFAULT 1.0,
    display_order INTEGER NOT NULL DEFAULT 0,
    is_active INTEGER NOT NULL DEFAULT 1,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

-- Every embeddable piece of content: survey choices, survey images and
-- the four profile-dimension descriptions of each photographer.
CREATE TABLE IF NOT EXISTS content_units (
    id TEXT PRIMARY KEY,
    kind TEXT NOT NULL CHECK(kind IN ('choice','image','profile_dimension')),
    owner_id TEXT NOT NULL,
    dimension TEXT CHECK(dimension IS NULL OR dimension IN ('style_emotion','communication_psychology','purpose_story','companion')),
    source TEXT NOT NULL,
    embedding BLOB,
    embedding_model TEXT,
    embedding_generated_at TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    CHECK((kind = 'profile_dimension') = (dimension IS NOT NULL))
);

CREATE INDEX IF NOT EXISTS idx_units_owner ON content_units(owner_id, kind);
CREATE UNIQUE INDEX IF NOT EXISTS idx_units_profile_dimension
    ON content_units(owner_id, dimension) WHERE kind = 'profile_dimension';

CREATE TABLE IF NOT EXISTS photographers (
    photographer_id TEXT PRIMARY KEY,
    display_name TEXT NOT NULL DEFAULT '',
    service_regions TEXT NOT NULL DEFAULT '[]',
    price_min INTEGER,
    price_max INTEGER,
    companion_types TEXT NOT NULL DEFAULT '[]',
    profile_completed INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS embedding_jobs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    job_type TEXT NOT NULL CHECK(job_type IN ('choice','image','profile_dimension')),
    target_id TEXT NOT NULL,
    status TEXT NOT NULL DEFAULT 'pending' CHECK(status IN ('pending','processing','completed','failed')),
    error_message TEXT,
    attempts INTEGER NOT NULL DEFAULT 0,
    created_at TEXT NOT NULL,
    started_at TEXT,
    processed_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status ON embedding_jobs(status, id);
CREATE INDEX IF NOT EXISTS idx_jobs_target ON embedding_jobs(target_id, status);

CREATE TABLE IF NOT EXISTS quiz_sessions (
    id TEXT PRIMARY KEY,
    responses TEXT NOT NULL,
    created_at TEXT NOT NULL,
    matched_at TEXT
);

CREATE TABLE IF NOT EXISTS match_runs (
    id TEXT PRIMARY KEY,
    session_id TEXT NOT NULL REFERENCES quiz_sessions(id) ON DELETE CASCADE,
    candidate_count INTEGER NOT NULL,
    pending_units INTEGER NOT NULL DEFAULT 0,
    missing_dimensions TEXT NOT NULL DEFAULT '[]',
    weighting_policy TEXT NOT NULL,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_runs_session ON match_runs(session_id, created_at);

CREATE TABLE IF NOT EXISTS match_results (
    run_id TEXT NOT NULL REFERENCES match_runs(id) ON DELETE CASCADE,
    photographer_id TEXT NOT NULL,
    style_emotion_score REAL,
    communication_psychology_score REAL,
    purpose_story_score REAL,
    companion_score REAL,
    total_score REAL NOT NULL,
    rank_position INTEGER NOT NULL,
    PRIMARY KEY (run_id, photographer_id)
);

CREATE TABLE IF NOT EXISTS schema_meta (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
);
"#;

/// Initialize all schema tables. Idempotent (uses IF NOT EXISTS).
pub fn init_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(SCHEMA_SQL)?;

    conn.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('schema_version', '1')",
        [],
    )?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_creates_all_tables() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let tables: Vec<String> = conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
            .unwrap()
            .query_map([], |row| row.get(0))
            .unwrap()
            .collect::<Result<Vec<_>, _>>()
            .unwrap();

        for expected in [
            "content_units",
            "embedding_jobs",
            "match_results",
            "match_runs",
            "photographers",
            "quiz_sessions",
            "schema_meta",
            "survey_questions",
        ] {
            assert!(tables.contains(&expected.to_string()), "missing {expected}");
        }
    }

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();
        init_schema(&conn).unwrap();
    }

    #[test]
    fn profile_dimension_requires_dimension_column() {
        let conn = Connection::open_in_memory().unwrap();
        init_schema(&conn).unwrap();

        let result = conn.execute(
            "INSERT INTO content_units (id, kind, owner_id, dimension, source, created_at, updated_at) \
             VALUES ('u1', 'profile_dimension', 'p1', NULL, 'text', 'now', 'now')",
            [],
        );
        assert!(result.is_err());
    }
}
