//! HTTP API for the results UI and the embedding dashboard.
//!
//! [`create_router`] wires the routes onto an [`AppState`]; [`serve`] opens
//! the database, loads the embedding models and listens until ctrl-c.

pub mod error;
mod routes;

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::{
    routing::{get, post},
    Router,
};

use crate::config::LensmatchConfig;
use crate::db::{self, SharedDb};
use crate::embedding::{self, EmbeddingModels};
use crate::matching::WeightingPolicy;

pub use error::ApiError;

#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub models: EmbeddingModels,
    pub config: Arc<LensmatchConfig>,
    pub policy: WeightingPolicy,
}

impl AppState {
    pub fn new(db: SharedDb, models: EmbeddingModels, config: LensmatchConfig) -> Self {
        let policy = config.matching.missing_dimension_policy;
        Self {
            db,
            models,
            config: Arc::new(config),
            policy,
        }
    }
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/healthz", get(routes::healthz))
        .route("/match", post(routes::match_session))
        .route("/sessions", post(routes::create_session))
        .route("/sessions/{id}/matches", get(routes::latest_matches))
        .route("/embeddings/process", post(routes::process_embeddings))
        .route("/embeddings/retry-failed", post(routes::retry_failed))
        .route("/embeddings/recover-stuck", post(routes::recover_stuck))
        .route("/embeddings/jobs", get(routes::list_jobs))
        .route("/embeddings/stats", get(routes::embedding_stats))
        .with_state(state)
}

/// Open the database and load the embedding models.
pub fn setup_state(config: LensmatchConfig) -> Result<AppState> {
    let db_path = config.resolved_db_path();
    let conn = db::open_database(&db_path)?;
    check_embedding_model(&conn, &config)?;

    let models = embedding::create_models(&config.embedding).context("failed to load embedding models")?;
    Ok(AppState::new(db::shared(conn), models, config))
}

/// Record the configured model on a fresh database; warn when stored vectors
/// came from a different one.
pub fn check_embedding_model(conn: &rusqlite::Connection, config: &LensmatchConfig) -> Result<()> {
    match db::migrations::get_embedding_model(conn)? {
        None => db::migrations::set_embedding_model(conn, &config.embedding.model)?,
        Some(stored) if stored != config.embedding.model => {
            tracing::warn!(
                stored = %stored,
                configured = %config.embedding.model,
                "embedding model changed, run `lensmatch reembed` to regenerate all vectors"
            );
        }
        Some(_) => {}
    }
    Ok(())
}

pub async fn serve(config: LensmatchConfig) -> Result<()> {
    let bind_addr = format!("{}:{}", config.server.host, config.server.port);
    let state = setup_state(config)?;
    let router = create_router(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr)
        .await
        .with_context(|| format!("failed to bind {bind_addr}"))?;
    tracing::info!(addr = %bind_addr, "lensmatch API listening");

    axum::serve(listener, router)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for ctrl-c");
            }
            tracing::info!("shutting down");
        })
        .await?;

    Ok(())
}
