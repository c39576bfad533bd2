//! Catalogue records consumed by the matching engine.
//!
//! Every write that creates embeddable content or changes its text/image
//! reference goes through [`insert_unit`] or [`replace_source`], which keep the
//! embedding store and the job queue in step: new or edited units lose their
//! vector and get a pending job in the same transaction.

pub mod import;
pub mod photographers;
pub mod questions;
pub mod sessions;
pub mod types;

use anyhow::Result;
use rusqlite::{params, Connection};

use crate::db::now_timestamp;
use crate::embedding::store;
use crate::jobs::queue;
use types::{ContentKind, ContentUnit, Dimension};

/// Insert a new content unit and queue it for embedding.
pub(crate) fn insert_unit(
    conn: &Connection,
    id: &str,
    kind: ContentKind,
    owner_id: &str,
    dimension: Option<Dimension>,
    source: &str,
) -> Result<()> {
    let now = now_timestamp();
    conn.execute(
        "INSERT INTO content_units (id, kind, owner_id, dimension, source, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
        params![
            id,
            kind.as_str(),
            owner_id,
            dimension.map(|d| d.as_str()),
            source,
            now
        ],
    )?;
    queue::enqueue(conn, kind, id)?;
    Ok(())
}

/// Replace a unit's source. Unchanged text is a no-op; a real change drops the
/// stored vector and queues a fresh job. Returns whether anything changed.
pub(crate) fn replace_source(conn: &Connection, unit: &ContentUnit, new_source: &str) -> Result<bool> {
    if unit.source == new_source {
        return Ok(false);
    }

    conn.execute(
        "UPDATE content_units SET source = ?1, updated_at = ?2 WHERE id = ?3",
        params![new_source, now_timestamp(), unit.id],
    )?;
    store::invalidate(conn, &unit.id)?;
    queue::enqueue(conn, unit.kind, &unit.id)?;

    tracing::debug!(unit = %unit.id, kind = %unit.kind, "content changed, embedding invalidated");
    Ok(true)
}

/// Delete a unit together with any jobs still waiting for it.
pub(crate) fn delete_unit(conn: &Connection, unit_id: &str) -> Result<bool> {
    conn.execute(
        "DELETE FROM embedding_jobs WHERE target_id = ?1 AND status = 'pending'",
        params![unit_id],
    )?;
    let rows = conn.execute("DELETE FROM content_units WHERE id = ?1", params![unit_id])?;
    Ok(rows > 0)
}

/// Update the source of any unit by id, invalidating and re-queueing it.
pub fn update_content_source(conn: &mut Connection, unit_id: &str, new_source: &str) -> Result<bool> {
    anyhow::ensure!(!new_source.trim().is_empty(), "content must not be empty");

    let tx = conn.transaction()?;
    let unit = store::get_unit(&tx, unit_id)?
        .ok_or_else(|| anyhow::anyhow!("content unit not found: {unit_id}"))?;
    let changed = replace_source(&tx, &unit, new_source)?;
    tx.commit()?;
    Ok(changed)
}

pub(crate) fn new_unit_id() -> String {
    uuid::Uuid::now_v7().to_string()
}
