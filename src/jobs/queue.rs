//! Durable embedding job queue on the `embedding_jobs` table.
//!
//! Jobs move pending → processing → {completed | failed}. Failed jobs return
//! to pending only through [`reset_failed`]; abandoned processing jobs return
//! through [`recover_stuck`]. Claiming is a single IMMEDIATE transaction, so two
//! concurrent runs never lose a job, though a recovered job may be processed twice.

use anyhow::{bail, Result};
use chrono::Duration;
use rusqlite::{params, Connection, OptionalExtension, Row, TransactionBehavior};

use super::types::{EmbeddingJob, JobCounts, JobStatus};
use crate::catalog::types::ContentKind;
use crate::db::{format_timestamp, now_timestamp};

const JOB_COLUMNS: &str =
    "id, job_type, target_id, status, error_message, attempts, created_at, started_at, processed_at";

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<EmbeddingJob> {
    let job_type: String = row.get(1)?;
    let status: String = row.get(3)?;
    Ok(EmbeddingJob {
        id: row.get(0)?,
        job_type: job_type.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(1, rusqlite::types::Type::Text, e.into())
        })?,
        target_id: row.get(2)?,
        status: status.parse().map_err(|e: String| {
            rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, e.into())
        })?,
        error_message: row.get(4)?,
        attempts: row.get(5)?,
        created_at: row.get(6)?,
        started_at: row.get(7)?,
        processed_at: row.get(8)?,
    })
}

/// Queue a unit for (re)embedding.
///
/// Repeated edits before processing collapse onto the existing pending job,
/// whose id is returned. A job already being processed does not absorb a new
/// edit, so a fresh pending job is created in that case.
pub fn enqueue(conn: &Connection, job_type: ContentKind, target_id: &str) -> Result<i64> {
    enqueue_with_status(conn, job_type, target_id).map(|(id, _)| id)
}

/// Like [`enqueue`], also reporting whether a new row was inserted.
fn enqueue_with_status(conn: &Connection, job_type: ContentKind, target_id: &str) -> Result<(i64, bool)> {
    let existing: Option<i64> = conn
        .query_row(
            "SELECT id FROM embedding_jobs WHERE target_id = ?1 AND status = 'pending' \
             ORDER BY id LIMIT 1",
            params![target_id],
            |row| row.get(0),
        )
        .optional()?;

    if let Some(id) = existing {
        tracing::debug!(job_id = id, target = %target_id, "pending job already queued");
        return Ok((id, false));
    }

    conn.execute(
        "INSERT INTO embedding_jobs (job_type, target_id, status, created_at) VALUES (?1, ?2, 'pending', ?3)",
        params![job_type.as_str(), target_id, now_timestamp()],
    )?;
    let id = conn.last_insert_rowid();
    tracing::debug!(job_id = id, job_type = %job_type, target = %target_id, "embedding job enqueued");
    Ok((id, true))
}

pub fn get_job(conn: &Connection, job_id: i64) -> Result<Option<EmbeddingJob>> {
    let job = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM embedding_jobs WHERE id = ?1"),
            params![job_id],
            job_from_row,
        )
        .optional()?;
    Ok(job)
}

/// Jobs, newest first, optionally filtered by status.
pub fn list_jobs(conn: &Connection, status: Option<JobStatus>, limit: usize) -> Result<Vec<EmbeddingJob>> {
    let limit = limit as i64;
    let jobs = match status {
        Some(status) => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM embedding_jobs WHERE status = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![status.as_str(), limit], job_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
        None => {
            let mut stmt = conn.prepare(&format!(
                "SELECT {JOB_COLUMNS} FROM embedding_jobs ORDER BY id DESC LIMIT ?1"
            ))?;
            let rows = stmt
                .query_map(params![limit], job_from_row)?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        }
    };
    Ok(jobs)
}

/// Move one pending job to processing. Returns `false` if it was not pending.
pub fn mark_processing(conn: &Connection, job_id: i64) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE embedding_jobs SET status = 'processing', started_at = ?1, attempts = attempts + 1 \
         WHERE id = ?2 AND status = 'pending'",
        params![now_timestamp(), job_id],
    )?;
    finish_transition(conn, job_id, rows)
}

/// Mark a claimed job completed.
///
/// `attempt` is the job's `attempts` value as returned by the claim. Returns
/// `false` when that claim no longer holds: the job was recovered to pending
/// (and maybe claimed again) while this attempt was running, so it stays
/// queued for whoever holds it now.
pub fn mark_completed(conn: &Connection, job_id: i64, attempt: u32) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE embedding_jobs SET status = 'completed', error_message = NULL, processed_at = ?1 \
         WHERE id = ?2 AND status = 'processing' AND attempts = ?3",
        params![now_timestamp(), job_id, attempt],
    )?;
    finish_transition(conn, job_id, rows)
}

/// Mark a claimed job failed. Same claim rule as [`mark_completed`].
pub fn mark_failed(conn: &Connection, job_id: i64, attempt: u32, error: &str) -> Result<bool> {
    let rows = conn.execute(
        "UPDATE embedding_jobs SET status = 'failed', error_message = ?1, processed_at = ?2 \
         WHERE id = ?3 AND status = 'processing' AND attempts = ?4",
        params![error, now_timestamp(), job_id, attempt],
    )?;
    finish_transition(conn, job_id, rows)
}

fn finish_transition(conn: &Connection, job_id: i64, rows: usize) -> Result<bool> {
    if rows > 0 {
        return Ok(true);
    }
    if get_job(conn, job_id)?.is_none() {
        bail!("embedding job not found: {job_id}");
    }
    Ok(false)
}

/// Atomically claim up to `limit` of the oldest pending jobs.
pub fn claim_pending(conn: &mut Connection, limit: usize) -> Result<Vec<EmbeddingJob>> {
    let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;

    let ids: Vec<i64> = {
        let mut stmt = tx.prepare(
            "SELECT id FROM embedding_jobs WHERE status = 'pending' ORDER BY id LIMIT ?1",
        )?;
        let rows = stmt
            .query_map(params![limit as i64], |row| row.get(0))?
            .collect::<Result<Vec<_>, _>>()?;
        rows
    };

    let now = now_timestamp();
    let mut claimed = Vec::with_capacity(ids.len());
    for id in ids {
        tx.execute(
            "UPDATE embedding_jobs SET status = 'processing', started_at = ?1, attempts = attempts + 1 \
             WHERE id = ?2",
            params![now, id],
        )?;
        let job = tx.query_row(
            &format!("SELECT {JOB_COLUMNS} FROM embedding_jobs WHERE id = ?1"),
            params![id],
            job_from_row,
        )?;
        claimed.push(job);
    }

    tx.commit()?;
    Ok(claimed)
}

/// Bulk-return every failed job to pending, clearing its error message.
pub fn reset_failed(conn: &Connection) -> Result<usize> {
    let rows = conn.execute(
        "UPDATE embedding_jobs SET status = 'pending', error_message = NULL, started_at = NULL, processed_at = NULL \
         WHERE status = 'failed'",
        [],
    )?;
    if rows > 0 {
        tracing::info!(count = rows, "failed embedding jobs reset to pending");
    }
    Ok(rows)
}

/// Return processing jobs that started more than `older_than` ago to pending.
pub fn recover_stuck(conn: &Connection, older_than: Duration) -> Result<usize> {
    let cutoff = format_timestamp(chrono::Utc::now() - older_than);
    let rows = conn.execute(
        "UPDATE embedding_jobs SET status = 'pending', started_at = NULL \
         WHERE status = 'processing' AND (started_at IS NULL OR started_at < ?1)",
        params![cutoff],
    )?;
    if rows > 0 {
        tracing::warn!(count = rows, cutoff = %cutoff, "recovered stuck embedding jobs");
    }
    Ok(rows)
}

pub fn job_counts(conn: &Connection) -> Result<JobCounts> {
    let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM embedding_jobs GROUP BY status")?;
    let rows = stmt
        .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
        .collect::<Result<Vec<_>, _>>()?;

    let mut counts = JobCounts::default();
    for (status, n) in rows {
        let n = n as u64;
        match status.parse::<JobStatus>() {
            Ok(JobStatus::Pending) => counts.pending = n,
            Ok(JobStatus::Processing) => counts.processing = n,
            Ok(JobStatus::Completed) => counts.completed = n,
            Ok(JobStatus::Failed) => counts.failed = n,
            Err(e) => tracing::warn!(error = %e, "unexpected job status in queue"),
        }
    }
    Ok(counts)
}

/// Queue every unit that lacks a current embedding. Units that already have a
/// pending job are left alone. Returns the number of jobs created.
pub fn enqueue_missing(conn: &Connection) -> Result<usize> {
    let missing = crate::embedding::store::units_missing_embeddings(conn)?;
    let mut created = 0;
    for (unit_id, kind) in missing {
        if enqueue_with_status(conn, kind, &unit_id)?.1 {
            created += 1;
        }
    }
    Ok(created)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;

    #[test]
    fn enqueue_collapses_onto_pending_job() {
        let conn = db::open_memory_database().unwrap();
        let a = enqueue(&conn, ContentKind::Choice, "unit-1").unwrap();
        let b = enqueue(&conn, ContentKind::Choice, "unit-1").unwrap();
        assert_eq!(a, b);
        assert_eq!(job_counts(&conn).unwrap().pending, 1);
    }

    #[test]
    fn enqueue_while_processing_creates_new_job() {
        let conn = db::open_memory_database().unwrap();
        let a = enqueue(&conn, ContentKind::Choice, "unit-1").unwrap();
        assert!(mark_processing(&conn, a).unwrap());

        let b = enqueue(&conn, ContentKind::Choice, "unit-1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn lifecycle_transitions() {
        let conn = db::open_memory_database().unwrap();
        let id = enqueue(&conn, ContentKind::Image, "img-1").unwrap();

        assert!(mark_processing(&conn, id).unwrap());
        assert!(!mark_processing(&conn, id).unwrap(), "already processing");

        assert!(mark_failed(&conn, id, 1, "model returned 500").unwrap());
        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Failed);
        assert_eq!(job.error_message.as_deref(), Some("model returned 500"));
        assert_eq!(job.attempts, 1);
        assert!(job.processed_at.is_some());

        assert!(!mark_completed(&conn, id, 1).unwrap(), "failed is terminal");
    }

    #[test]
    fn recovered_claim_cannot_finish_the_job() {
        let mut conn = db::open_memory_database().unwrap();
        let id = enqueue(&conn, ContentKind::Choice, "a").unwrap();
        let first = claim_pending(&mut conn, 1).unwrap().remove(0);
        assert_eq!(first.attempts, 1);

        conn.execute(
            "UPDATE embedding_jobs SET started_at = '2000-01-01T00:00:00.000000Z'",
            [],
        )
        .unwrap();
        assert_eq!(recover_stuck(&conn, Duration::minutes(10)).unwrap(), 1);
        // An edit now collapses onto the recovered job.
        assert_eq!(enqueue(&conn, ContentKind::Choice, "a").unwrap(), id);

        assert!(!mark_completed(&conn, id, first.attempts).unwrap());
        assert!(!mark_failed(&conn, id, first.attempts, "late").unwrap());
        assert_eq!(get_job(&conn, id).unwrap().unwrap().status, JobStatus::Pending);

        let second = claim_pending(&mut conn, 1).unwrap().remove(0);
        assert_eq!(second.attempts, 2);
        assert!(!mark_completed(&conn, id, first.attempts).unwrap(), "stale attempt");
        assert!(mark_completed(&conn, id, second.attempts).unwrap());
        assert_eq!(get_job(&conn, id).unwrap().unwrap().status, JobStatus::Completed);
    }

    #[test]
    fn transition_on_unknown_job_errors() {
        let conn = db::open_memory_database().unwrap();
        assert!(mark_completed(&conn, 999, 1).is_err());
    }

    #[test]
    fn claim_takes_oldest_first() {
        let mut conn = db::open_memory_database().unwrap();
        let first = enqueue(&conn, ContentKind::Choice, "a").unwrap();
        let second = enqueue(&conn, ContentKind::Choice, "b").unwrap();
        enqueue(&conn, ContentKind::Choice, "c").unwrap();

        let claimed = claim_pending(&mut conn, 2).unwrap();
        let ids: Vec<i64> = claimed.iter().map(|j| j.id).collect();
        assert_eq!(ids, vec![first, second]);
        assert!(claimed.iter().all(|j| j.status == JobStatus::Processing));

        let counts = job_counts(&conn).unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.processing, 2);
    }

    #[test]
    fn reset_failed_clears_errors() {
        let conn = db::open_memory_database().unwrap();
        let id = enqueue(&conn, ContentKind::Choice, "a").unwrap();
        mark_processing(&conn, id).unwrap();
        mark_failed(&conn, id, 1, "boom").unwrap();

        assert_eq!(reset_failed(&conn).unwrap(), 1);
        let job = get_job(&conn, id).unwrap().unwrap();
        assert_eq!(job.status, JobStatus::Pending);
        assert!(job.error_message.is_none());
        assert_eq!(reset_failed(&conn).unwrap(), 0);
    }

    #[test]
    fn recover_stuck_respects_timeout() {
        let conn = db::open_memory_database().unwrap();
        let old = enqueue(&conn, ContentKind::Choice, "old").unwrap();
        let fresh = enqueue(&conn, ContentKind::Choice, "fresh").unwrap();
        mark_processing(&conn, old).unwrap();
        mark_processing(&conn, fresh).unwrap();

        let an_hour_ago = format_timestamp(chrono::Utc::now() - Duration::hours(1));
        conn.execute(
            "UPDATE embedding_jobs SET started_at = ?1 WHERE id = ?2",
            params![an_hour_ago, old],
        )
        .unwrap();

        assert_eq!(recover_stuck(&conn, Duration::minutes(10)).unwrap(), 1);
        assert_eq!(get_job(&conn, old).unwrap().unwrap().status, JobStatus::Pending);
        assert_eq!(
            get_job(&conn, fresh).unwrap().unwrap().status,
            JobStatus::Processing
        );
    }

    #[test]
    fn list_jobs_filters_by_status() {
        let conn = db::open_memory_database().unwrap();
        let a = enqueue(&conn, ContentKind::Choice, "a").unwrap();
        enqueue(&conn, ContentKind::Choice, "b").unwrap();
        mark_processing(&conn, a).unwrap();
        mark_failed(&conn, a, 1, "bad input").unwrap();

        let failed = list_jobs(&conn, Some(JobStatus::Failed), 10).unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].target_id, "a");

        let all = list_jobs(&conn, None, 10).unwrap();
        assert_eq!(all.len(), 2);
        assert_eq!(all[0].target_id, "b", "newest first");
    }
}
