//! Forward-only migrations on top of the base schema in [`super::schema`].
//!
//! `schema_meta.schema_version` records the last applied step; a fresh base
//! schema is version 1. Each step commits together with its version bump.

use rusqlite::{Connection, OptionalExtension, Transaction};

/// The schema version that the current binary expects.
pub const CURRENT_SCHEMA_VERSION: u32 = 3;

type Step = fn(&Transaction<'_>) -> rusqlite::Result<()>;

/// `(version reached, description, step)`, in ascending order.
const MIGRATIONS: &[(u32, &str, Step)] = &[
    (2, "missing-embedding index and recorded text model", missing_embedding_index),
    (3, "stuck job recovery index", stuck_job_index),
];

pub fn get_schema_version(conn: &Connection) -> rusqlite::Result<u32> {
    let value: Option<String> = conn
        .query_row(
            "SELECT value FROM schema_meta WHERE key = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    match value {
        None => Ok(0),
        Some(v) => v.parse().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        }),
    }
}

fn set_schema_version(conn: &Connection, version: u32) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('schema_version', ?1)",
        [version.to_string()],
    )?;
    Ok(())
}

/// Identifier of the text model that produced the stored vectors, if recorded.
pub fn get_embedding_model(conn: &Connection) -> rusqlite::Result<Option<String>> {
    conn.query_row(
        "SELECT value FROM schema_meta WHERE key = 'embedding_model'",
        [],
        |row| row.get(0),
    )
    .optional()
}

pub fn set_embedding_model(conn: &Connection, model: &str) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT OR REPLACE INTO schema_meta (key, value) VALUES ('embedding_model', ?1)",
        [model],
    )?;
    Ok(())
}

/// Apply every step above the recorded version.
pub fn run_migrations(conn: &mut Connection) -> rusqlite::Result<()> {
    let current = get_schema_version(conn)?;
    if current > CURRENT_SCHEMA_VERSION {
        tracing::warn!(
            schema_version = current,
            supported = CURRENT_SCHEMA_VERSION,
            "database was written by a newer lensmatch"
        );
        return Ok(());
    }

    for &(version, description, step) in MIGRATIONS.iter().filter(|(v, ..)| *v > current) {
        tracing::info!(version, description, "applying migration");
        let tx = conn.transaction()?;
        step(&tx)?;
        set_schema_version(&tx, version)?;
        tx.commit()?;
    }
    Ok(())
}

/// Backfill and eligibility scan units by `embedding_generated_at`. Databases
/// created before the model was recorded were built with the default model.
fn missing_embedding_index(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_units_generated_at ON content_units(embedding_generated_at);",
    )?;
    tx.execute(
        "INSERT OR IGNORE INTO schema_meta (key, value) VALUES ('embedding_model', 'all-MiniLM-L6-v2')",
        [],
    )?;
    Ok(())
}

/// `recover_stuck` filters processing jobs by claim time.
fn stuck_job_index(tx: &Transaction<'_>) -> rusqlite::Result<()> {
    tx.execute_batch("CREATE INDEX IF NOT EXISTS idx_jobs_started ON embedding_jobs(status, started_at);")
}
