//! CLI `match` and `results` commands.

use anyhow::Result;

use lensmatch::catalog::types::Dimension;
use lensmatch::config::LensmatchConfig;
use lensmatch::matching::results;
use lensmatch::matching::{CandidateFilter, MatchError, WeightingPolicy};
use lensmatch::orchestrator::{self, MatchOutcome};

pub fn run_match(
    config: &LensmatchConfig,
    session_id: &str,
    filter: CandidateFilter,
    policy: Option<WeightingPolicy>,
    json: bool,
) -> Result<()> {
    let policy = policy.unwrap_or(config.matching.missing_dimension_policy);
    let mut conn = super::open_db(config)?;

    let outcome = match orchestrator::match_session_blocking(&mut conn, session_id, &filter, policy) {
        Ok(outcome) => outcome,
        Err(MatchError::EmbeddingsPending { pending }) => {
            anyhow::bail!("{pending} selected answers have no embedding yet; run `lensmatch process` and retry")
        }
        Err(MatchError::NoUsableSignal { missing }) => {
            anyhow::bail!("session {session_id} has no usable answers (missing: {})", join(&missing))
        }
        Err(e) => return Err(e.into()),
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

pub fn latest(config: &LensmatchConfig, session_id: &str, json: bool) -> Result<()> {
    let conn = super::open_db(config)?;
    let Some(run) = results::latest_run(&conn, session_id)? else {
        println!("No match runs stored for session {session_id}.");
        return Ok(());
    };
    let outcome = MatchOutcome::from(run);
    if json {
        println!("{}", serde_json::to_string_pretty(&outcome)?);
    } else {
        print_outcome(&outcome);
    }
    Ok(())
}

fn print_outcome(outcome: &MatchOutcome) {
    println!("Matches for session {}", outcome.session_id);
    println!("{}", "=".repeat(40));
    println!("  Run:             {}", outcome.run_id);
    println!("  Computed at:     {}", outcome.created_at);
    println!("  Policy:          {}", outcome.weighting_policy.as_str());
    if !outcome.missing_dimensions.is_empty() {
        println!("  No signal for:   {}", join(&outcome.missing_dimensions));
    }
    if outcome.pending_units > 0 {
        println!("  Still embedding: {} selected answers (ignored)", outcome.pending_units);
    }
    println!();

    if outcome.results.is_empty() {
        println!("No eligible photographers.");
        return;
    }

    println!("{:>4}  {:<24}  {:>7}  {:>7}  {:>7}  {:>7}  {:>7}", "RANK", "PHOTOGRAPHER", "TOTAL", "STYLE", "COMM", "STORY", "COMP");
    for r in &outcome.results {
        let cell = |d: Dimension| r.score(d).map(|s| format!("{s:.1}")).unwrap_or_else(|| "-".into());
        println!(
            "{:>4}  {:<24}  {:>7.1}  {:>7}  {:>7}  {:>7}  {:>7}",
            r.rank_position,
            r.photographer_id,
            r.total_score,
            cell(Dimension::StyleEmotion),
            cell(Dimension::CommunicationPsychology),
            cell(Dimension::PurposeStory),
            cell(Dimension::Companion),
        );
    }
}

fn join(dimensions: &[Dimension]) -> String {
    dimensions
        .iter()
        .map(|d| d.as_str())
        .collect::<Vec<_>>()
        .join(", ")
}
