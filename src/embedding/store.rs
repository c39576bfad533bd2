//! Embedding store: content unit → vector, plus the staleness marker.
//!
//! The `content_units` row is the source of truth. A unit whose
//! `embedding_generated_at` is NULL has no usable vector, and callers must
//! exclude it rather than substitute anything.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::catalog::types::{ContentKind, ContentUnit, Dimension};
use crate::db::now_timestamp;

/// Encode an f32 vector as little-endian bytes for BLOB storage.
pub fn embedding_to_bytes(embedding: &[f32]) -> Vec<u8> {
    embedding.iter().flat_map(|x| x.to_le_bytes()).collect()
}

/// Decode a BLOB written by [`embedding_to_bytes`].
pub fn bytes_to_embedding(bytes: &[u8]) -> Result<Vec<f32>> {
    if bytes.len() % 4 != 0 {
        bail!("embedding blob length {} is not a multiple of 4", bytes.len());
    }
    Ok(bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect())
}

pub(crate) const UNIT_COLUMNS: &str = "id, kind, owner_id, dimension, source, embedding, \
     embedding_model, embedding_generated_at, created_at, updated_at";

/// Map a row selected with [`UNIT_COLUMNS`] into a [`ContentUnit`].
pub(crate) fn unit_from_row(row: &Row<'_>) -> rusqlite::Result<ContentUnit> {
    let kind: String = row.get(1)?;
    let dimension: Option<String> = row.get(3)?;
    let blob: Option<Vec<u8>> = row.get(5)?;
    let generated_at: Option<String> = row.get(7)?;

    let embedding = match (blob, &generated_at) {
        (Some(bytes), Some(_)) => Some(bytes_to_embedding(&bytes).map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(5, rusqlite::types::Type::Blob, e.into())
        })?),
        _ => None,
    };

    Ok(ContentUnit {
        id: row.get(0)?,
        kind: kind.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        owner_id: row.get(2)?,
        dimension: dimension
            .map(|d| d.parse::<Dimension>())
            .transpose()
            .map_err(|e| {
                rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
            })?,
        source: row.get(4)?,
        embedding,
        embedding_model: row.get(6)?,
        embedding_generated_at: generated_at,
        created_at: row.get(8)?,
        updated_at: row.get(9)?,
    })
}

pub fn get_unit(conn: &Connection, unit_id: &str) -> Result<Option<ContentUnit>> {
    let unit = conn
        .query_row(
            &format!("SELECT {UNIT_COLUMNS} FROM content_units WHERE id = ?1"),
            params![unit_id],
            unit_from_row,
        )
        .optional()?;
    Ok(unit)
}

/// The current vector for a unit, or `None` while it is pending or stale.
pub fn get_embedding(conn: &Connection, unit_id: &str) -> Result<Option<Vec<f32>>> {
    let blob: Option<Option<Vec<u8>>> = conn
        .query_row(
            "SELECT embedding FROM content_units \
             WHERE id = ?1 AND embedding_generated_at IS NOT NULL",
            params![unit_id],
            |row| row.get(0),
        )
        .optional()?;

    match blob.flatten() {
        Some(bytes) => Ok(Some(bytes_to_embedding(&bytes)?)),
        None => Ok(None),
    }
}

/// Store a vector and stamp `embedding_generated_at`.
pub fn set_embedding(conn: &Connection, unit_id: &str, embedding: &[f32], model: &str) -> Result<()> {
    let rows = conn.execute(
        "UPDATE content_units SET embedding = ?1, embedding_model = ?2, embedding_generated_at = ?3 \
         WHERE id = ?4",
        params![embedding_to_bytes(embedding), model, now_timestamp(), unit_id],
    )?;
    if rows == 0 {
        bail!("content unit not found: {unit_id}");
    }
    Ok(())
}

/// Store a vector only if the unit's source is still the text it was computed
/// from. Returns `false` when the unit was edited (or removed) in the meantime.
pub fn set_embedding_if_current(
    conn: &Connection,
    unit_id: &str,
    embedded_source: &str,
    embedding: &[f32],
    model: &str,
) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE content_units SET embedding = ?1, embedding_model = ?2, embedding_generated_at = ?3 \
         WHERE id = ?4 AND source = ?5",
        params![
            embedding_to_bytes(embedding),
            model,
            now_timestamp(),
            unit_id,
            embedded_source
        ],
    )?;
    Ok(rows > 0)
}

/// Drop a unit's vector. Returns `false` if the unit does not exist.
pub fn invalidate(conn: &Connection, unit_id: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE content_units SET embedding = NULL, embedding_model = NULL, embedding_generated_at = NULL \
         WHERE id = ?1",
        params![unit_id],
    )?;
    Ok(rows > 0)
}

/// Drop every stored vector, e.g. after switching embedding models.
pub fn invalidate_all(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE content_units SET embedding = NULL, embedding_model = NULL, embedding_generated_at = NULL \
         WHERE embedding IS NOT NULL OR embedding_generated_at IS NOT NULL",
        [],
    )?;
    Ok(rows)
}

/// Units that have no current vector, oldest first.
pub fn units_missing_embeddings(conn: &Connection) -> Result<Vec<(String, ContentKind)>> {
    let mut stmt = conn.prepare(
        "SELECT id, kind FROM content_units WHERE embedding_generated_at IS NULL ORDER BY created_at, id",
    )?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    rows.into_iter()
        .map(|(id, kind)| {
            let kind = kind.parse::<ContentKind>().map_err(anyhow::Error::msg)?;
            Ok((id, kind))
        })
        .collect()
}

pub fn count_missing(conn: &Connection) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM content_units WHERE embedding_generated_at IS NULL",
        [],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
