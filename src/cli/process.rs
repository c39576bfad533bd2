//! CLI `process` command: drain the embedding queue with a progress bar.

use anyhow::{Context, Result};
use indicatif::ProgressBar;

use lensmatch::config::LensmatchConfig;
use lensmatch::db;
use lensmatch::embedding;
use lensmatch::pipeline::{spawn_processing, ProcessOptions, ProgressEvent};

pub async fn process(config: &LensmatchConfig, max_jobs: Option<usize>) -> Result<()> {
    let conn = super::open_db(config)?;
    lensmatch::server::check_embedding_model(&conn, config)?;
    let db = db::shared(conn);

    let models = embedding::create_models(&config.embedding).context("failed to load embedding models")?;
    let options = ProcessOptions::from_config(&config.pipeline).with_max_jobs(max_jobs);
    let (handle, mut rx) = spawn_processing(db, models, options);

    let pb = ProgressBar::hidden();
    while let Some(event) = rx.recv().await {
        match event {
            ProgressEvent::Started { total } => {
                if total == 0 {
                    println!("No pending embedding jobs.");
                } else {
                    println!("Processing {total} embedding jobs...");
                    pb.set_length(total as u64);
                    pb.set_style(super::bar_style());
                    pb.set_draw_target(indicatif::ProgressDrawTarget::stderr());
                }
            }
            ProgressEvent::Progress { processed, .. } => pb.set_position(processed as u64),
            ProgressEvent::Finished(_) | ProgressEvent::Failed { .. } => break,
        }
    }
    pb.finish_and_clear();

    let summary = handle.await.context("processing task panicked")??;
    if summary.total == 0 {
        return Ok(());
    }

    println!();
    println!("Embedding Run");
    println!("=============");
    println!("  Processed:       {}", summary.processed);
    println!("  Completed:       {}", summary.completed);
    println!("  Failed:          {}", summary.failed);
    if summary.superseded > 0 {
        println!("  Superseded:      {} (content changed mid-run, re-queued)", summary.superseded);
    }
    if summary.released > 0 {
        println!("  Released:        {} (recovered mid-run, still queued)", summary.released);
    }
    if summary.recovered > 0 {
        println!("  Recovered:       {} stuck jobs", summary.recovered);
    }
    println!("  Elapsed:         {:.1}s", summary.elapsed_ms as f64 / 1000.0);
    if summary.failed > 0 {
        println!();
        println!("Inspect failures with `lensmatch jobs --status failed`,");
        println!("then re-queue them with `lensmatch retry-failed`.");
    }
    Ok(())
}
