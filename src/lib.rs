//! Quiz-driven photographer matching with a managed embedding lifecycle.
//!
//! Respondents answer a style quiz; photographers describe themselves in four
//! dimensions. Every quiz option and every profile description is a content
//! unit with its own embedding. Matching averages the vectors of a session's
//! selected answers per dimension, compares them with each photographer's
//! description vectors by cosine similarity, and ranks photographers by a
//! weighted composite:
//!
//! | Dimension | Weight |
//! |-----------|--------|
//! | **style_emotion** | 0.40 |
//! | **communication_psychology** | 0.30 |
//! | **purpose_story** | 0.20 |
//! | **companion** | 0.10 |
//!
//! # Architecture
//!
//! - **Storage**: SQLite; vectors are little-endian `f32` blobs next to the
//!   content they describe
//! - **Embeddings**: local ONNX Runtime (all-MiniLM-L6-v2) or an
//!   OpenAI-compatible HTTP endpoint; images need an HTTP image model
//! - **Jobs**: every content change invalidates the stored vector and queues a
//!   job; the pipeline drains the queue in concurrent batches
//! - **Transport**: JSON over HTTP with SSE progress for embedding runs
//!
//! # Modules
//!
//! - [`config`]: TOML file plus environment overrides
//! - [`db`]: connection setup, schema, migrations and health checks
//! - [`catalog`]: questions, options, photographer profiles, quiz sessions
//! - [`embedding`]: providers and the per-unit vector store
//! - [`jobs`]: the embedding job queue
//! - [`pipeline`]: batch generation with progress reporting
//! - [`matching`]: vectorizer, similarity, scoring and stored runs
//! - [`orchestrator`]: match a session and persist the result set
//! - [`server`]: axum routes and error mapping

pub mod catalog;
pub mod config;
pub mod db;
pub mod embedding;
pub mod jobs;
pub mod matching;
pub mod orchestrator;
pub mod pipeline;
pub mod server;
