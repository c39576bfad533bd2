//! The one entry point external callers use to match a quiz session:
//! compute, persist a new run, stamp the session, return the ranking.

use serde::Serialize;

use crate::catalog::sessions;
use crate::catalog::types::Dimension;
use crate::db::{self, SharedDb};
use crate::matching::engine;
use crate::matching::results::{self, MatchRun};
use crate::matching::{CandidateFilter, MatchError, MatchingResult, WeightingPolicy};

/// What a caller gets back from a match run.
#[derive(Debug, Clone, Serialize)]
pub struct MatchOutcome {
    pub run_id: String,
    pub session_id: String,
    pub results: Vec<MatchingResult>,
    /// Dimensions the session had no signal for; their weight was not used.
    pub missing_dimensions: Vec<Dimension>,
    /// Selected options still waiting for an embedding.
    pub pending_units: usize,
    pub weighting_policy: WeightingPolicy,
    pub created_at: String,
}

impl From<MatchRun> for MatchOutcome {
    fn from(run: MatchRun) -> Self {
        Self {
            run_id: run.run_id,
            session_id: run.session_id,
            results: run.results,
            missing_dimensions: run.missing_dimensions,
            pending_units: run.pending_units,
            weighting_policy: run.weighting_policy,
            created_at: run.created_at,
        }
    }
}

/// Match a session and persist the result set.
///
/// Runs on the blocking pool; the snapshot read and the write of the new
/// run are separate transactions, so a slow scoring pass never holds a
/// write lock.
pub async fn match_session(
    db: SharedDb,
    session_id: String,
    filter: CandidateFilter,
    policy: WeightingPolicy,
) -> Result<MatchOutcome, MatchError> {
    tokio::task::spawn_blocking(move || {
        let mut conn = db::lock(&db)?;
        match_session_blocking(&mut conn, &session_id, &filter, policy)
    })
    .await
    .map_err(|e| MatchError::Storage(e.into()))?
}

pub fn match_session_blocking(
    conn: &mut rusqlite::Connection,
    session_id: &str,
    filter: &CandidateFilter,
    policy: WeightingPolicy,
) -> Result<MatchOutcome, MatchError> {
    let computation = engine::compute(conn, session_id, filter, policy)?;

    let tx = conn.transaction()?;
    let (run_id, created_at) = results::save_run(&tx, &computation, policy)?;
    sessions::mark_matched(&tx, session_id)?;
    tx.commit()?;

    tracing::info!(
        session = %session_id,
        run = %run_id,
        results = computation.results.len(),
        policy = policy.as_str(),
        "match run stored"
    );

    Ok(MatchOutcome {
        run_id,
        session_id: computation.session_id,
        results: computation.results,
        missing_dimensions: computation.missing_dimensions,
        pending_units: computation.pending_units,
        weighting_policy: policy,
        created_at,
    })
}

/// The most recent stored run for a session.
pub async fn latest_results(db: SharedDb, session_id: String) -> Result<Option<MatchOutcome>, MatchError> {
    tokio::task::spawn_blocking(move || {
        let conn = db::lock(&db)?;
        if sessions::get_session(&conn, &session_id)?.is_none() {
            return Err(MatchError::SessionNotFound(session_id));
        }
        Ok(results::latest_run(&conn, &session_id)?.map(MatchOutcome::from))
    })
    .await
    .map_err(|e| MatchError::Storage(e.into()))?
}
