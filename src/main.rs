mod cli;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use lensmatch::catalog::types::Dimension;
use lensmatch::config::LensmatchConfig;
use lensmatch::matching::{CandidateFilter, WeightingPolicy};

#[derive(Parser)]
#[command(name = "lensmatch", version, about = "Quiz-driven photographer matching engine")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Start the HTTP API
    Serve,
    /// Generate embeddings for pending jobs
    Process {
        /// Stop after this many jobs
        #[arg(long)]
        max_jobs: Option<usize>,
    },
    /// Show embedding queue totals
    Stats,
    /// List embedding jobs, newest first
    Jobs {
        /// pending, processing, completed or failed
        #[arg(long)]
        status: Option<String>,
        #[arg(long, default_value_t = 50)]
        limit: usize,
    },
    /// Return every failed job to pending
    RetryFailed,
    /// Return jobs stuck in processing to pending
    Recover {
        /// Defaults to pipeline.stuck_timeout_secs
        #[arg(long)]
        older_than_secs: Option<u64>,
    },
    /// Queue every content unit that has no vector
    Backfill,
    /// Drop all vectors and queue everything for the configured model
    Reembed,
    /// Match a quiz session against eligible photographers and store the run
    Match {
        session_id: String,
        /// Only consider photographers serving this region
        #[arg(long)]
        region: Option<String>,
        /// Only consider photographers whose price range covers this amount
        #[arg(long)]
        budget: Option<i64>,
        /// Only consider photographers accepting this companion type
        #[arg(long)]
        companion: Option<String>,
        /// Restrict to these photographer ids
        #[arg(long = "candidate", value_name = "ID")]
        candidates: Vec<String>,
        /// skip or renormalize; defaults to matching.missing_dimension_policy
        #[arg(long)]
        policy: Option<WeightingPolicy>,
        #[arg(long)]
        json: bool,
    },
    /// Show the latest stored match run for a session
    Results {
        session_id: String,
        #[arg(long)]
        json: bool,
    },
    /// Import questions, photographers and sessions from a JSON file
    Import { file: PathBuf },
    /// Replace one dimension description of a photographer profile
    Describe {
        photographer_id: String,
        dimension: Dimension,
        /// New text; an empty string removes the description
        text: String,
    },
    /// Run database diagnostics
    Doctor,
    /// Manage the local embedding model
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Download all-MiniLM-L6-v2 to ~/.lensmatch/models/
    Download,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = LensmatchConfig::load()?;

    // stdout is reserved for command output.
    let filter = EnvFilter::try_new(&config.server.log_level).unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Command::Serve => lensmatch::server::serve(config).await?,
        Command::Process { max_jobs } => cli::process::process(&config, max_jobs).await?,
        Command::Stats => cli::jobs::stats(&config)?,
        Command::Jobs { status, limit } => cli::jobs::list(&config, status.as_deref(), limit)?,
        Command::RetryFailed => cli::jobs::retry_failed(&config)?,
        Command::Recover { older_than_secs } => cli::jobs::recover(&config, older_than_secs)?,
        Command::Backfill => cli::jobs::backfill(&config)?,
        Command::Reembed => cli::jobs::reembed(&config)?,
        Command::Match {
            session_id,
            region,
            budget,
            companion,
            candidates,
            policy,
            json,
        } => {
            let filter = CandidateFilter {
                photographer_ids: (!candidates.is_empty()).then_some(candidates),
                region,
                budget,
                companion_type: companion,
            };
            cli::matching::run_match(&config, &session_id, filter, policy, json)?;
        }
        Command::Results { session_id, json } => cli::matching::latest(&config, &session_id, json)?,
        Command::Import { file } => cli::catalog::import(&config, &file)?,
        Command::Describe {
            photographer_id,
            dimension,
            text,
        } => cli::catalog::set_description(&config, &photographer_id, dimension, &text)?,
        Command::Doctor => cli::doctor::doctor(&config)?,
        Command::Model { action } => match action {
            ModelAction::Download => cli::model_download(&config.embedding).await?,
        },
    }

    Ok(())
}
