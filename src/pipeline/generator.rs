//! Drains the embedding job queue.
//!
//! A run recovers stuck jobs, fixes its target as the number of pending jobs
//! (optionally capped), then claims batches. Each batch is split by model and
//! into request groups; groups run concurrently under a semaphore, with model
//! calls and SQLite work on the blocking pool. A failed batched call is
//! retried item by item so one bad input fails only its own job.

use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::{JoinHandle, JoinSet};

use super::progress::{ProgressEvent, ProgressSink, RunSummary};
use crate::catalog::types::ContentKind;
use crate::config::PipelineConfig;
use crate::db::{self, SharedDb};
use crate::embedding::{store, EmbeddingModels, EmbeddingProvider};
use crate::jobs::queue;
use crate::jobs::types::EmbeddingJob;

const PROGRESS_BUFFER: usize = 64;

#[derive(Debug, Clone)]
pub struct ProcessOptions {
    pub batch_size: usize,
    pub request_batch_size: usize,
    pub max_concurrency: usize,
    /// Upper bound on jobs handled by this run.
    pub max_jobs: Option<usize>,
    pub stuck_timeout: Duration,
}

impl ProcessOptions {
    pub fn from_config(config: &PipelineConfig) -> Self {
        Self {
            batch_size: config.batch_size.max(1),
            request_batch_size: config.request_batch_size.max(1),
            max_concurrency: config.max_concurrency.max(1),
            max_jobs: None,
            stuck_timeout: Duration::from_secs(config.stuck_timeout_secs),
        }
    }

    pub fn with_max_jobs(mut self, max_jobs: Option<usize>) -> Self {
        self.max_jobs = max_jobs;
        self
    }
}

impl Default for ProcessOptions {
    fn default() -> Self {
        Self::from_config(&PipelineConfig::default())
    }
}

/// A claimed job whose unit text is ready to embed.
#[derive(Debug, Clone)]
struct WorkItem {
    job_id: i64,
    /// Claim the run holds on the job; see [`queue::mark_completed`].
    attempt: u32,
    unit_id: String,
    source: String,
}

#[derive(Debug, Default)]
struct Tally {
    completed: usize,
    failed: usize,
    superseded: usize,
    released: usize,
}

impl Tally {
    fn add(&mut self, other: Tally) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.superseded += other.superseded;
        self.released += other.released;
    }

    fn finished(&self) -> usize {
        self.completed + self.failed + self.released
    }
}

/// Start a run in its own task. The receiver may be dropped at any time
/// without affecting the run. A run that errors out ends the stream with
/// [`ProgressEvent::Failed`].
pub fn spawn_processing(
    db: SharedDb,
    models: EmbeddingModels,
    options: ProcessOptions,
) -> (JoinHandle<Result<RunSummary>>, mpsc::Receiver<ProgressEvent>) {
    let (tx, rx) = mpsc::channel(PROGRESS_BUFFER);
    let sink = ProgressSink::new(tx);
    let handle = tokio::spawn(async move {
        let result = process_pending(db, models, options, sink.clone()).await;
        if let Err(e) = &result {
            tracing::error!(error = %e, "embedding run aborted");
            sink.emit(ProgressEvent::Failed {
                message: format!("{e:#}"),
            });
        }
        result
    });
    (handle, rx)
}

/// Process pending jobs until the run's target is reached or the queue is empty.
pub async fn process_pending(
    db: SharedDb,
    models: EmbeddingModels,
    options: ProcessOptions,
    progress: ProgressSink,
) -> Result<RunSummary> {
    let started = Instant::now();
    let stuck_timeout = chrono::Duration::from_std(options.stuck_timeout)
        .context("stuck timeout out of range")?;

    let (recovered, pending) = with_db(&db, move |conn| {
        let recovered = queue::recover_stuck(conn, stuck_timeout)?;
        let pending = queue::job_counts(conn)?.pending as usize;
        Ok((recovered, pending))
    })
    .await?;

    let total = options.max_jobs.map_or(pending, |cap| pending.min(cap));
    tracing::info!(total, recovered, "embedding run started");
    progress.emit(ProgressEvent::Started { total });

    let semaphore = Arc::new(Semaphore::new(options.max_concurrency.max(1)));
    let mut tally = Tally::default();
    let mut processed = 0usize;

    while processed < total {
        let limit = options.batch_size.max(1).min(total - processed);
        let jobs = with_db(&db, move |conn| queue::claim_pending(conn, limit)).await?;
        if jobs.is_empty() {
            break;
        }
        tracing::debug!(claimed = jobs.len(), "batch claimed");

        let (text_items, image_items, rejected) = prepare_batch(&db, &models, jobs).await?;
        if rejected.finished() > 0 {
            processed += rejected.finished();
            tally.add(rejected);
            emit_progress(&progress, processed, total, &tally);
        }

        let mut groups = JoinSet::new();
        for (model, items) in [(Some(models.text.clone()), text_items), (models.image.clone(), image_items)] {
            let Some(model) = model else { continue };
            for chunk in items.chunks(options.request_batch_size.max(1)) {
                let permit = semaphore.clone().acquire_owned().await?;
                let db = db.clone();
                let model = model.clone();
                let chunk = chunk.to_vec();
                groups.spawn(async move {
                    let size = chunk.len();
                    let result = run_group(db, model, chunk).await;
                    drop(permit);
                    (size, result)
                });
            }
        }

        while let Some(joined) = groups.join_next().await {
            let (size, result) = joined.context("embedding task panicked")?;
            tally.add(result?);
            processed += size;
            emit_progress(&progress, processed, total, &tally);
        }
    }

    let summary = RunSummary {
        total,
        processed,
        completed: tally.completed,
        failed: tally.failed,
        superseded: tally.superseded,
        released: tally.released,
        recovered,
        elapsed_ms: started.elapsed().as_millis() as u64,
    };
    tracing::info!(
        processed = summary.processed,
        completed = summary.completed,
        failed = summary.failed,
        superseded = summary.superseded,
        released = summary.released,
        elapsed_ms = summary.elapsed_ms,
        "embedding run finished"
    );
    progress.emit(ProgressEvent::Finished(summary.clone()));
    Ok(summary)
}

fn emit_progress(progress: &ProgressSink, processed: usize, total: usize, tally: &Tally) {
    progress.emit(ProgressEvent::Progress {
        processed,
        total,
        completed: tally.completed,
        failed: tally.failed,
    });
}

/// Run a closure against the shared connection on the blocking pool.
async fn with_db<T, F>(db: &SharedDb, f: F) -> Result<T>
where
    T: Send + 'static,
    F: FnOnce(&mut rusqlite::Connection) -> Result<T> + Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || {
        let mut conn = db::lock(&db)?;
        f(&mut conn)
    })
    .await?
}

/// Resolve each job to its unit text and split by model. Jobs that cannot be
/// embedded at all are failed here and counted in the returned tally.
async fn prepare_batch(
    db: &SharedDb,
    models: &EmbeddingModels,
    jobs: Vec<EmbeddingJob>,
) -> Result<(Vec<WorkItem>, Vec<WorkItem>, Tally)> {
    let has_image_model = models.image.is_some();
    with_db(db, move |conn| {
        let mut text = Vec::new();
        let mut image = Vec::new();
        let mut rejected = Tally::default();

        for job in jobs {
            let failure = match store::get_unit(conn, &job.target_id)? {
                None => Some(format!("content unit not found: {}", job.target_id)),
                Some(unit) if unit.kind != job.job_type => Some(format!(
                    "job type {} does not match unit kind {}",
                    job.job_type, unit.kind
                )),
                Some(unit) if unit.source.trim().is_empty() => {
                    Some("content unit has empty source".to_string())
                }
                Some(_) if job.job_type == ContentKind::Image && !has_image_model => {
                    Some("no image embedding model configured (embedding.image_provider = \"none\")".to_string())
                }
                Some(unit) => {
                    let item = WorkItem {
                        job_id: job.id,
                        attempt: job.attempts,
                        unit_id: unit.id,
                        source: unit.source,
                    };
                    if job.job_type.is_image() {
                        image.push(item);
                    } else {
                        text.push(item);
                    }
                    None
                }
            };

            if let Some(message) = failure {
                tracing::warn!(job_id = job.id, target = %job.target_id, error = %message, "embedding job rejected");
                if queue::mark_failed(conn, job.id, job.attempts, &message)? {
                    rejected.failed += 1;
                } else {
                    rejected.released += 1;
                }
            }
        }
        Ok((text, image, rejected))
    })
    .await
}

/// Embed one request group and record every outcome.
async fn run_group(db: SharedDb, model: Arc<dyn EmbeddingProvider>, items: Vec<WorkItem>) -> Result<Tally> {
    let (items, outcomes, model_name) = tokio::task::spawn_blocking(move || {
        let outcomes = embed_group(model.as_ref(), &items);
        (items, outcomes, model.model_name().to_string())
    })
    .await?;

    with_db(&db, move |conn| record_outcomes(conn, &model_name, &items, outcomes)).await
}

/// One vector (or error message) per item, in order.
fn embed_group(model: &dyn EmbeddingProvider, items: &[WorkItem]) -> Vec<Result<Vec<f32>, String>> {
    let inputs: Vec<&str> = items.iter().map(|i| i.source.as_str()).collect();

    match model.embed_batch(&inputs) {
        Ok(vectors) if vectors.len() == items.len() => vectors.into_iter().map(check_vector).collect(),
        Ok(vectors) => {
            tracing::warn!(
                expected = items.len(),
                got = vectors.len(),
                "batched call returned wrong count, retrying items individually"
            );
            embed_individually(model, &inputs)
        }
        Err(e) if items.len() == 1 => vec![Err(format!("{e:#}"))],
        Err(e) => {
            tracing::warn!(error = %e, size = items.len(), "batched call failed, retrying items individually");
            embed_individually(model, &inputs)
        }
    }
}

fn embed_individually(model: &dyn EmbeddingProvider, inputs: &[&str]) -> Vec<Result<Vec<f32>, String>> {
    inputs
        .iter()
        .map(|input| {
            model
                .embed(input)
                .map_err(|e| format!("{e:#}"))
                .and_then(check_vector)
        })
        .collect()
}

fn check_vector(v: Vec<f32>) -> Result<Vec<f32>, String> {
    if v.is_empty() {
        return Err("model returned an empty vector".into());
    }
    if v.iter().any(|x| !x.is_finite()) {
        return Err("model returned non-finite values".into());
    }
    Ok(v)
}

fn record_outcomes(
    conn: &rusqlite::Connection,
    model_name: &str,
    items: &[WorkItem],
    outcomes: Vec<Result<Vec<f32>, String>>,
) -> Result<Tally> {
    let mut tally = Tally::default();
    for (item, outcome) in items.iter().zip(outcomes) {
        match outcome {
            Ok(vector) => {
                let written =
                    store::set_embedding_if_current(conn, &item.unit_id, &item.source, &vector, model_name)?;
                if !queue::mark_completed(conn, item.job_id, item.attempt)? {
                    release(item, &mut tally);
                    continue;
                }
                if !written {
                    tracing::debug!(unit = %item.unit_id, "unit changed while embedding, vector discarded");
                    tally.superseded += 1;
                }
                tally.completed += 1;
            }
            Err(message) => {
                if !queue::mark_failed(conn, item.job_id, item.attempt, &message)? {
                    release(item, &mut tally);
                    continue;
                }
                tracing::warn!(job_id = item.job_id, unit = %item.unit_id, error = %message, "embedding failed");
                tally.failed += 1;
            }
        }
    }
    Ok(tally)
}

/// The job was recovered from this run while it was embedding. It is still
/// queued, so the outcome is dropped and the job left to its current holder.
fn release(item: &WorkItem, tally: &mut Tally) {
    tracing::warn!(job_id = item.job_id, unit = %item.unit_id, "claim lost to stuck recovery, job left queued");
    tally.released += 1;
}
