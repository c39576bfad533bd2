//! CLI catalogue commands: bulk import and single-dimension profile edits.

use std::path::Path;

use anyhow::{Context, Result};

use lensmatch::catalog::import;
use lensmatch::catalog::photographers;
use lensmatch::catalog::types::Dimension;
use lensmatch::config::LensmatchConfig;

/// Import questions, options, photographers and sessions from a JSON file.
pub fn import(config: &LensmatchConfig, file: &Path) -> Result<()> {
    let json = std::fs::read_to_string(file)
        .with_context(|| format!("failed to read {}", file.display()))?;
    let catalog = import::parse_catalog(&json)?;

    let mut conn = super::open_db(config)?;
    let summary = import::import_catalog(&mut conn, &catalog)?;

    println!("Imported from {}", file.display());
    println!("  Questions:       {}", summary.questions);
    println!("  Options:         {} added, {} updated", summary.options_added, summary.options_updated);
    println!("  Photographers:   {}", summary.photographers);
    println!("  Sessions:        {} added, {} already present", summary.sessions_added, summary.sessions_skipped);
    println!();
    println!("Run `lensmatch process` to embed new content.");
    Ok(())
}

/// Replace one dimension description of a photographer profile.
pub fn set_description(config: &LensmatchConfig, photographer_id: &str, dimension: Dimension, text: &str) -> Result<()> {
    let mut conn = super::open_db(config)?;
    if photographers::update_profile_dimension(&mut conn, photographer_id, dimension, text)? {
        println!("Updated {} for {photographer_id}; its vector will be regenerated.", dimension.as_str());
    } else {
        println!("No change.");
    }
    Ok(())
}
