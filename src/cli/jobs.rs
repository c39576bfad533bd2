//! Queue maintenance commands: stats, listing, retry, recovery, backfill and
//! full re-embedding after a model change.

use anyhow::Result;

use lensmatch::config::LensmatchConfig;
use lensmatch::db::migrations;
use lensmatch::embedding::store;
use lensmatch::jobs::queue;
use lensmatch::jobs::types::JobStatus;

pub fn stats(config: &LensmatchConfig) -> Result<()> {
    let conn = super::open_db(config)?;
    let counts = queue::job_counts(&conn)?;
    let missing = store::count_missing(&conn)?;

    println!("Embedding Queue");
    println!("{}", "=".repeat(40));
    println!("  Pending:             {}", counts.pending);
    println!("  Processing:          {}", counts.processing);
    println!("  Completed:           {}", counts.completed);
    println!("  Failed:              {}", counts.failed);
    println!("  Total:               {}", counts.total());
    println!();
    println!("Units without vectors: {missing}");
    println!(
        "Embedding model:       {}",
        migrations::get_embedding_model(&conn)?.as_deref().unwrap_or("(not set)")
    );
    Ok(())
}

pub fn list(config: &LensmatchConfig, status: Option<&str>, limit: usize) -> Result<()> {
    let status = status
        .map(str::parse::<JobStatus>)
        .transpose()
        .map_err(anyhow::Error::msg)?;
    let conn = super::open_db(config)?;
    let jobs = queue::list_jobs(&conn, status, limit)?;

    if jobs.is_empty() {
        println!("No jobs.");
        return Ok(());
    }
    println!("{:>6}  {:<10}  {:<8}  {:>3}  {:<36}  ERROR", "ID", "STATUS", "TYPE", "TRY", "TARGET");
    for job in jobs {
        println!(
            "{:>6}  {:<10}  {:<8}  {:>3}  {:<36}  {}",
            job.id,
            job.status.as_str(),
            job.job_type.as_str(),
            job.attempts,
            job.target_id,
            job.error_message.as_deref().unwrap_or("")
        );
    }
    Ok(())
}

pub fn retry_failed(config: &LensmatchConfig) -> Result<()> {
    let conn = super::open_db(config)?;
    let count = queue::reset_failed(&conn)?;
    println!("Re-queued {count} failed jobs.");
    Ok(())
}

pub fn recover(config: &LensmatchConfig, older_than_secs: Option<u64>) -> Result<()> {
    let secs = older_than_secs.unwrap_or(config.pipeline.stuck_timeout_secs);
    let older_than = chrono::Duration::try_seconds(secs as i64)
        .ok_or_else(|| anyhow::anyhow!("--older-than-secs out of range"))?;
    let conn = super::open_db(config)?;
    let count = queue::recover_stuck(&conn, older_than)?;
    println!("Returned {count} stuck jobs to pending.");
    Ok(())
}

pub fn backfill(config: &LensmatchConfig) -> Result<()> {
    let conn = super::open_db(config)?;
    let count = queue::enqueue_missing(&conn)?;
    println!("Queued {count} units that had no vector and no open job.");
    Ok(())
}

/// Drop every stored vector, queue all units again and record the configured
/// model as current.
pub fn reembed(config: &LensmatchConfig) -> Result<()> {
    let mut conn = super::open_db(config)?;
    let tx = conn.transaction()?;
    let cleared = store::invalidate_all(&tx)?;
    let queued = queue::enqueue_missing(&tx)?;
    migrations::set_embedding_model(&tx, &config.embedding.model)?;
    tx.commit()?;

    println!("Cleared {cleared} vectors and queued {queued} jobs for {}.", config.embedding.model);
    println!("Run `lensmatch process` to regenerate them.");
    Ok(())
}
