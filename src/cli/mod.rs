pub mod catalog;
pub mod doctor;
pub mod jobs;
pub mod matching;
pub mod process;

use std::path::Path;

use anyhow::{Context, Result};
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::io::AsyncWriteExt;

use lensmatch::config::{EmbeddingConfig, LensmatchConfig};
use lensmatch::db;
use lensmatch::embedding::local;

const MODEL_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/onnx/model.onnx";
const TOKENIZER_URL: &str =
    "https://huggingface.co/sentence-transformers/all-MiniLM-L6-v2/resolve/main/tokenizer.json";

/// Open the configured database for a one-shot command.
pub(crate) fn open_db(config: &LensmatchConfig) -> Result<rusqlite::Connection> {
    let db_path = config.resolved_db_path();
    db::open_database(&db_path).with_context(|| format!("failed to open {}", db_path.display()))
}

pub(crate) fn bar_style() -> ProgressStyle {
    ProgressStyle::default_bar()
        .template("  {bar:40.cyan/blue} {pos}/{len} ({eta})")
        .expect("valid template")
        .progress_chars("##-")
}

/// Download the local text model and its tokenizer into the cache directory.
pub async fn model_download(config: &EmbeddingConfig) -> Result<()> {
    let (model_path, tokenizer_path) = local::model_files(config);
    if let Some(dir) = model_path.parent() {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create cache dir: {}", dir.display()))?;
    }

    for (url, path, label) in [
        (MODEL_URL, &model_path, "model.onnx (~90MB)"),
        (TOKENIZER_URL, &tokenizer_path, "tokenizer.json"),
    ] {
        if path.exists() {
            println!("Already present: {}", path.display());
            continue;
        }
        println!("Downloading {label}...");
        download_file(url, path).await?;
        println!("Saved to {}", path.display());
    }

    println!("Local model ready. Set embedding.provider = \"local\" to use it.");
    Ok(())
}

/// Stream a download to `dest.tmp`, then rename into place.
async fn download_file(url: &str, dest: &Path) -> Result<()> {
    let response = reqwest::get(url)
        .await
        .with_context(|| format!("HTTP request failed for {url}"))?;

    anyhow::ensure!(
        response.status().is_success(),
        "download failed with HTTP {}",
        response.status()
    );

    let pb = match response.content_length() {
        Some(size) => {
            let pb = ProgressBar::new(size);
            pb.set_style(
                ProgressStyle::default_bar()
                    .template("  {bar:40.cyan/blue} {bytes}/{total_bytes} ({eta})")
                    .expect("valid template")
                    .progress_chars("##-"),
            );
            pb
        }
        None => ProgressBar::new_spinner(),
    };

    let tmp_path = dest.with_extension("tmp");
    let mut file = tokio::fs::File::create(&tmp_path)
        .await
        .with_context(|| format!("failed to create temp file: {}", tmp_path.display()))?;

    let mut stream = response.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.context("error reading response")?;
        file.write_all(&chunk).await.context("error writing to file")?;
        pb.inc(chunk.len() as u64);
    }
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .context("failed to rename temp file")?;

    pb.finish_and_clear();
    Ok(())
}
