//! Persisted result sets. Each run is a new `match_runs` row with its
//! `match_results`; rows are never updated afterwards.

use anyhow::Result;
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;

use super::engine::MatchComputation;
use super::types::{MatchingResult, WeightingPolicy};
use crate::catalog::types::Dimension;
use crate::db::now_timestamp;

/// A stored run with its ranked results.
#[derive(Debug, Clone, Serialize)]
pub struct MatchRun {
    pub run_id: String,
    pub session_id: String,
    pub candidate_count: usize,
    pub pending_units: usize,
    pub missing_dimensions: Vec<Dimension>,
    pub weighting_policy: WeightingPolicy,
    pub created_at: String,
    pub results: Vec<MatchingResult>,
}

/// Store a computed result set as a new run. Returns the run id and its
/// creation timestamp.
pub fn save_run(
    conn: &Connection,
    computation: &MatchComputation,
    policy: WeightingPolicy,
) -> Result<(String, String)> {
    let run_id = uuid::Uuid::now_v7().to_string();
    let created_at = now_timestamp();

    conn.execute(
        "INSERT INTO match_runs \
         (id, session_id, candidate_count, pending_units, missing_dimensions, weighting_policy, created_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            run_id,
            computation.session_id,
            computation.candidate_count as i64,
            computation.pending_units as i64,
            serde_json::to_string(&computation.missing_dimensions)?,
            policy.as_str(),
            created_at,
        ],
    )?;

    let mut stmt = conn.prepare(
        "INSERT INTO match_results \
         (run_id, photographer_id, style_emotion_score, communication_psychology_score, purpose_story_score, \
          companion_score, total_score, rank_position) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
    )?;
    for r in &computation.results {
        stmt.execute(params![
            run_id,
            r.photographer_id,
            r.style_emotion_score,
            r.communication_psychology_score,
            r.purpose_story_score,
            r.companion_score,
            r.total_score,
            r.rank_position,
        ])?;
    }

    Ok((run_id, created_at))
}

/// The most recent run for a session, if any.
pub fn latest_run(conn: &Connection, session_id: &str) -> Result<Option<MatchRun>> {
    let run_id: Option<String> = conn
        .query_row(
            "SELECT id FROM match_runs WHERE session_id = ?1 ORDER BY created_at DESC, id DESC LIMIT 1",
            params![session_id],
            |row| row.get(0),
        )
        .optional()?;
    match run_id {
        Some(id) => get_run(conn, &id),
        None => Ok(None),
    }
}

pub fn get_run(conn: &Connection, run_id: &str) -> Result<Option<MatchRun>> {
    let header = conn
        .query_row(
            "SELECT id, session_id, candidate_count, pending_units, missing_dimensions, weighting_policy, created_at \
             FROM match_runs WHERE id = ?1",
            params![run_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                    row.get::<_, String>(6)?,
                ))
            },
        )
        .optional()?;
    let Some((run_id, session_id, candidate_count, pending_units, missing, policy, created_at)) = header else {
        return Ok(None);
    };

    let mut stmt = conn.prepare(
        "SELECT photographer_id, style_emotion_score, communication_psychology_score, purpose_story_score, \
         companion_score, total_score, rank_position \
         FROM match_results WHERE run_id = ?1 ORDER BY rank_position",
    )?;
    let results = stmt
        .query_map(params![run_id], |row| {
            Ok(MatchingResult {
                photographer_id: row.get(0)?,
                style_emotion_score: row.get(1)?,
                communication_psychology_score: row.get(2)?,
                purpose_story_score: row.get(3)?,
                companion_score: row.get(4)?,
                total_score: row.get(5)?,
                rank_position: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Some(MatchRun {
        run_id,
        session_id,
        candidate_count: candidate_count as usize,
        pending_units: pending_units as usize,
        missing_dimensions: serde_json::from_str(&missing)?,
        weighting_policy: policy.parse().map_err(anyhow::Error::msg)?,
        created_at,
        results,
    }))
}

/// Number of stored runs for a session.
pub fn count_runs(conn: &Connection, session_id: &str) -> Result<u64> {
    let n: i64 = conn.query_row(
        "SELECT COUNT(*) FROM match_runs WHERE session_id = ?1",
        params![session_id],
        |row| row.get(0),
    )?;
    Ok(n as u64)
}
