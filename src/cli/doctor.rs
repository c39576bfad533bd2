//! CLI `doctor` command: database diagnostics and queue health in one report.

use anyhow::{Context, Result};

use lensmatch::config::LensmatchConfig;
use lensmatch::db;
use lensmatch::embedding::{local, store};
use lensmatch::jobs::queue;

pub fn doctor(config: &LensmatchConfig) -> Result<()> {
    let db_path = config.resolved_db_path();

    if !db_path.exists() {
        println!("Database: not found at {}", db_path.display());
        println!("Run `lensmatch import <file>` or `lensmatch serve` to initialize.");
        return Ok(());
    }

    let file_size = std::fs::metadata(&db_path).map(|m| m.len()).unwrap_or(0);
    let conn = db::open_database(&db_path).context("failed to open database (may be corrupt)")?;
    let report = db::check_database_health(&conn).context("failed to run health check")?;
    let counts = queue::job_counts(&conn)?;
    let missing = store::count_missing(&conn)?;

    println!("Lensmatch Health Report");
    println!("=======================");
    println!();
    println!("Database:          {}", db_path.display());
    println!("File size:         {}", format_bytes(file_size));
    println!("Schema version:    {}", report.schema_version);
    println!();
    println!("Embedding model:");
    println!("  Provider:        {}", config.embedding.provider);
    println!("  Stored:          {}", report.embedding_model.as_deref().unwrap_or("(not set)"));
    println!("  Configured:      {}", config.embedding.model);
    match &report.embedding_model {
        Some(stored) if stored != &config.embedding.model => {
            println!("  WARNING: model mismatch! Run `lensmatch reembed` to update vectors.");
        }
        Some(_) => println!("  Status:          OK (match)"),
        None => {}
    }
    if config.embedding.provider == "local" {
        let (model_path, tokenizer_path) = local::model_files(&config.embedding);
        if !model_path.exists() || !tokenizer_path.exists() {
            println!("  WARNING: local model files missing. Run `lensmatch model download`.");
        }
    }
    println!("  Image provider:  {}", config.embedding.image_provider);
    println!();
    println!("Row counts:");
    println!("  Questions:       {}", report.question_count);
    println!("  Content units:   {}", report.content_unit_count);
    println!("  Photographers:   {}", report.photographer_count);
    println!("  Quiz sessions:   {}", report.session_count);
    println!();
    println!("Embedding queue:");
    println!("  Pending:         {}", counts.pending);
    println!("  Processing:      {}", counts.processing);
    println!("  Failed:          {}", counts.failed);
    println!("  Missing vectors: {missing}");
    println!();
    if report.integrity_ok {
        println!("Integrity check:   PASSED");
    } else {
        println!("Integrity check:   FAILED ({})", report.integrity_details);
        println!();
        println!("Recovery steps:");
        println!("  1. Restore from a backup: cp backup.db {}", db_path.display());
        println!("  2. Or re-import the catalogue into a fresh database and run `lensmatch process`.");
    }

    if counts.failed > 0 {
        println!();
        println!("{} jobs failed. See `lensmatch jobs --status failed`, then `lensmatch retry-failed`.", counts.failed);
    }
    if counts.processing > 0 {
        println!("Jobs stuck in processing can be released with `lensmatch recover`.");
    }

    Ok(())
}

fn format_bytes(bytes: u64) -> String {
    match bytes {
        b if b < 1024 => format!("{b} B"),
        b if b < 1024 * 1024 => format!("{:.1} KB", b as f64 / 1024.0),
        b => format!("{:.1} MB", b as f64 / (1024.0 * 1024.0)),
    }
}
