//! Ranks eligible photographers against one quiz session.
//!
//! [`load_snapshot`] reads everything a run needs inside one SQLite
//! transaction; [`rank`] is pure computation over that snapshot, so a run
//! never sees a vector written halfway through.

use std::collections::HashMap;

use rusqlite::Connection;
use serde::Serialize;

use super::similarity::dimension_score;
use super::types::{
    CandidateFilter, DimensionScores, MatchError, MatchingResult, WeightingPolicy, DIMENSION_WEIGHTS,
};
use super::vectorizer::{vectorize, SessionVectors};
use crate::catalog::photographers::{list_photographers, PhotographerRecord};
use crate::catalog::questions::{list_questions, options_for_question};
use crate::catalog::sessions::get_session;
use crate::catalog::types::{ContentUnit, Dimension, QuizSession, SurveyQuestion};

/// Everything one match run reads, captured at a single point in time.
#[derive(Debug, Clone)]
pub struct MatchSnapshot {
    pub session: QuizSession,
    pub questions: HashMap<String, SurveyQuestion>,
    /// Options of the answered questions, by unit id.
    pub options: HashMap<String, ContentUnit>,
    pub photographers: Vec<PhotographerRecord>,
}

/// A ranked result set plus what the session was missing.
#[derive(Debug, Clone, Serialize)]
pub struct MatchComputation {
    pub session_id: String,
    pub results: Vec<MatchingResult>,
    pub missing_dimensions: Vec<Dimension>,
    pub pending_units: usize,
    pub candidate_count: usize,
}

pub fn load_snapshot(conn: &mut Connection, session_id: &str) -> Result<MatchSnapshot, MatchError> {
    let tx = conn.transaction()?;

    let session = get_session(&tx, session_id)?
        .ok_or_else(|| MatchError::SessionNotFound(session_id.to_string()))?;

    let questions: HashMap<String, SurveyQuestion> = list_questions(&tx, false)?
        .into_iter()
        .map(|q| (q.question_key.clone(), q))
        .collect();

    let mut options = HashMap::new();
    for question_key in session.responses.keys() {
        if !questions.contains_key(question_key) {
            continue;
        }
        for unit in options_for_question(&tx, question_key)? {
            options.insert(unit.id.clone(), unit);
        }
    }

    let photographers = list_photographers(&tx)?;
    tx.commit()?;

    Ok(MatchSnapshot {
        session,
        questions,
        options,
        photographers,
    })
}

/// Score and rank a snapshot.
///
/// The session's signal is checked first: with no usable dimension the run
/// fails, as [`MatchError::EmbeddingsPending`] if selected units are still
/// waiting for vectors, otherwise [`MatchError::NoUsableSignal`]. An empty
/// candidate set is a successful empty result, but candidates that cannot be
/// compared on any dimension (vectors from another model or of another
/// length) are [`MatchError::NoUsableSignal`] too, never a list of zeros.
pub fn rank(
    snapshot: &MatchSnapshot,
    filter: &CandidateFilter,
    policy: WeightingPolicy,
) -> Result<MatchComputation, MatchError> {
    let vectors = vectorize(&snapshot.session, &snapshot.questions, &snapshot.options);

    if !vectors.has_signal() {
        if vectors.pending_units > 0 {
            return Err(MatchError::EmbeddingsPending {
                pending: vectors.pending_units,
            });
        }
        return Err(MatchError::NoUsableSignal {
            missing: vectors.missing(),
        });
    }

    let candidates: Vec<&PhotographerRecord> = snapshot
        .photographers
        .iter()
        .filter(|p| p.is_eligible() && passes_filter(p, filter))
        .collect();

    let mut results: Vec<MatchingResult> = candidates
        .iter()
        .map(|p| {
            let (scores, total) = score_candidate(&vectors, p, policy);
            MatchingResult::new(p.photographer_id.clone(), scores, total)
        })
        .collect();

    if !results.is_empty() {
        let unscored: Vec<Dimension> = Dimension::ALL
            .into_iter()
            .filter(|d| results.iter().all(|r| r.score(*d).is_none()))
            .collect();
        if unscored.len() == Dimension::ALL.len() {
            tracing::warn!(
                session = %snapshot.session.id,
                candidates = results.len(),
                "no candidate comparable on any dimension (run `lensmatch reembed` after a model change)"
            );
            return Err(MatchError::NoUsableSignal { missing: unscored });
        }
    }

    assign_ranks(&mut results);

    tracing::info!(
        session = %snapshot.session.id,
        candidates = candidates.len(),
        missing = ?vectors.missing(),
        pending = vectors.pending_units,
        "match computed"
    );

    Ok(MatchComputation {
        session_id: snapshot.session.id.clone(),
        results,
        missing_dimensions: vectors.missing(),
        pending_units: vectors.pending_units,
        candidate_count: candidates.len(),
    })
}

/// Load a snapshot and rank it.
pub fn compute(
    conn: &mut Connection,
    session_id: &str,
    filter: &CandidateFilter,
    policy: WeightingPolicy,
) -> Result<MatchComputation, MatchError> {
    let snapshot = load_snapshot(conn, session_id)?;
    rank(&snapshot, filter, policy)
}

/// Ranked results for a session under the default policy.
pub fn compute_matches(
    conn: &mut Connection,
    session_id: &str,
    filter: Option<&CandidateFilter>,
) -> Result<Vec<MatchingResult>, MatchError> {
    let filter = filter.cloned().unwrap_or_default();
    compute(conn, session_id, &filter, WeightingPolicy::default()).map(|c| c.results)
}

fn passes_filter(p: &PhotographerRecord, filter: &CandidateFilter) -> bool {
    if let Some(ids) = &filter.photographer_ids {
        if !ids.iter().any(|id| *id == p.photographer_id) {
            return false;
        }
    }
    if let Some(region) = &filter.region {
        if !p.service_regions.iter().any(|r| r.eq_ignore_ascii_case(region)) {
            return false;
        }
    }
    if let Some(budget) = filter.budget {
        if p.price_min.is_some_and(|min| budget < min) || p.price_max.is_some_and(|max| budget > max) {
            return false;
        }
    }
    if let Some(companion) = &filter.companion_type {
        if !p.companion_types.iter().any(|c| c.eq_ignore_ascii_case(companion)) {
            return false;
        }
    }
    true
}

/// Per-dimension scores and the weighted composite for one candidate.
///
/// A dimension is scored only when both sides have a vector and, where the
/// session side came from text units, both were embedded by the same model.
pub fn score_candidate(
    session: &SessionVectors,
    photographer: &PhotographerRecord,
    policy: WeightingPolicy,
) -> (DimensionScores, f64) {
    let mut scores: DimensionScores = [None; 4];
    for dimension in Dimension::ALL {
        let (Some(ours), Some(unit)) = (session.get(dimension), photographer.dimensions.get(&dimension)) else {
            continue;
        };
        let Some(theirs) = unit.embedding.as_deref() else {
            continue;
        };
        if let (Some(expected), Some(model)) = (session.model(dimension), unit.embedding_model.as_deref()) {
            if expected != model {
                tracing::debug!(
                    photographer = %photographer.photographer_id,
                    dimension = %dimension,
                    expected,
                    model,
                    "embedding model differs, dimension not compared"
                );
                continue;
            }
        }
        scores[dimension.index()] = dimension_score(ours, theirs);
    }
    let total = composite(&scores, policy);
    (scores, total)
}

/// Weighted sum of the present scores. Under [`WeightingPolicy::Skip`] the
/// absent weights are simply lost.
pub fn composite(scores: &DimensionScores, policy: WeightingPolicy) -> f64 {
    let mut total = 0.0;
    let mut present_weight = 0.0;
    for dimension in Dimension::ALL {
        if let Some(score) = scores[dimension.index()] {
            let weight = DIMENSION_WEIGHTS.get(dimension);
            total += score * weight;
            present_weight += weight;
        }
    }

    match policy {
        WeightingPolicy::Skip => total,
        WeightingPolicy::Renormalize if present_weight > 0.0 => total / present_weight,
        WeightingPolicy::Renormalize => 0.0,
    }
}

/// Sort by total descending, ties by photographer id, and number 1..=n.
pub fn assign_ranks(results: &mut [MatchingResult]) {
    results.sort_by(|a, b| {
        b.total_score
            .total_cmp(&a.total_score)
            .then_with(|| a.photographer_id.cmp(&b.photographer_id))
    });
    for (i, r) in results.iter_mut().enumerate() {
        r.rank_position = (i + 1) as u32;
    }
}
