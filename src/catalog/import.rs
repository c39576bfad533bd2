//! Bulk catalogue import from a JSON document.
//!
//! Re-importing the same file is safe: questions and photographers are
//! upserted, options with an id are updated in place (only changed text is
//! re-queued), and sessions that already exist are skipped.

use std::collections::BTreeMap;

use anyhow::{Context, Result};
use rusqlite::Connection;
use serde::{Deserialize, Serialize};

use super::types::{Answer, PhotographerProfile, SurveyQuestion};
use super::{photographers, questions, replace_source, sessions};
use crate::embedding::store;

#[derive(Debug, Default, Deserialize)]
pub struct CatalogFile {
    #[serde(default)]
    pub questions: Vec<QuestionEntry>,
    #[serde(default)]
    pub photographers: Vec<PhotographerProfile>,
    #[serde(default)]
    pub sessions: Vec<SessionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct QuestionEntry {
    #[serde(flatten)]
    pub question: SurveyQuestion,
    /// Choice texts, or image references for image questions.
    #[serde(default)]
    pub options: Vec<OptionEntry>,
}

#[derive(Debug, Deserialize)]
pub struct OptionEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub struct SessionEntry {
    #[serde(default)]
    pub id: Option<String>,
    pub responses: BTreeMap<String, Answer>,
}

#[derive(Debug, Default, Serialize)]
pub struct ImportSummary {
    pub questions: usize,
    pub options_added: usize,
    pub options_updated: usize,
    pub photographers: usize,
    pub sessions_added: usize,
    pub sessions_skipped: usize,
}

pub fn parse_catalog(json: &str) -> Result<CatalogFile> {
    serde_json::from_str(json).context("failed to parse catalogue JSON")
}

/// Import a catalogue in one transaction.
pub fn import_catalog(conn: &mut Connection, catalog: &CatalogFile) -> Result<ImportSummary> {
    let mut summary = ImportSummary::default();

    {
        let tx = conn.transaction()?;
        for entry in &catalog.questions {
            let key = &entry.question.question_key;
            questions::upsert_question(&tx, &entry.question)
                .with_context(|| format!("question {key}"))?;
            summary.questions += 1;

            for option in &entry.options {
                let existing = match &option.id {
                    Some(id) => store::get_unit(&tx, id)?,
                    None => None,
                };
                match existing {
                    Some(unit) => {
                        anyhow::ensure!(
                            unit.owner_id == *key,
                            "option {} already belongs to {}",
                            unit.id,
                            unit.owner_id
                        );
                        if replace_source(&tx, &unit, &option.content)? {
                            summary.options_updated += 1;
                        }
                    }
                    None => {
                        questions::add_option(&tx, key, option.id.as_deref(), &option.content)
                            .with_context(|| format!("option of question {key}"))?;
                        summary.options_added += 1;
                    }
                }
            }
        }
        tx.commit()?;
    }

    for profile in &catalog.photographers {
        photographers::upsert_photographer(conn, profile)
            .with_context(|| format!("photographer {}", profile.photographer_id))?;
        summary.photographers += 1;
    }

    let tx = conn.transaction()?;
    for entry in &catalog.sessions {
        let exists = match &entry.id {
            Some(id) => sessions::get_session(&tx, id)?.is_some(),
            None => false,
        };
        if exists {
            summary.sessions_skipped += 1;
            continue;
        }
        sessions::insert_session(&tx, entry.id.as_deref(), &entry.responses)?;
        summary.sessions_added += 1;
    }
    tx.commit()?;

    tracing::info!(
        questions = summary.questions,
        options_added = summary.options_added,
        options_updated = summary.options_updated,
        photographers = summary.photographers,
        sessions = summary.sessions_added,
        "catalogue imported"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db;
    use crate::jobs::queue;

    const CATALOG: &str = r#"{
        "questions": [{
            "question_key": "mood",
            "question_text": "Pick a mood",
            "question_type": "single_choice",
            "weight_category": "style_emotion",
            "options": [{"id": "mood-warm", "content": "Warm and cozy"}]
        }],
        "photographers": [{
            "photographer_id": "p1",
            "display_name": "Jun",
            "profile_completed": true,
            "style_emotion_description": "Soft natural light"
        }],
        "sessions": [{"id": "s1", "responses": {"mood": "mood-warm"}}]
    }"#;

    #[test]
    fn import_creates_units_and_jobs() {
        let mut conn = db::open_memory_database().unwrap();
        let summary = import_catalog(&mut conn, &parse_catalog(CATALOG).unwrap()).unwrap();
        assert_eq!(summary.questions, 1);
        assert_eq!(summary.options_added, 1);
        assert_eq!(summary.photographers, 1);
        assert_eq!(summary.sessions_added, 1);
        assert_eq!(queue::job_counts(&conn).unwrap().pending, 2);
    }

    #[test]
    fn reimport_is_idempotent() {
        let mut conn = db::open_memory_database().unwrap();
        let catalog = parse_catalog(CATALOG).unwrap();
        import_catalog(&mut conn, &catalog).unwrap();

        let again = import_catalog(&mut conn, &catalog).unwrap();
        assert_eq!(again.options_added, 0);
        assert_eq!(again.options_updated, 0);
        assert_eq!(again.sessions_skipped, 1);
        assert_eq!(queue::job_counts(&conn).unwrap().pending, 2);
    }

    #[test]
    fn base_weight_and_order_default() {
        let catalog = parse_catalog(CATALOG).unwrap();
        let q = &catalog.questions[0].question;
        assert_eq!(q.base_weight, 1.0);
        assert!(q.is_active);
    }
}
