#![allow(dead_code)]

use std::collections::BTreeMap;
use std::sync::Arc;

use anyhow::Result;
use lensmatch::catalog::types::{Answer, Dimension, PhotographerProfile, QuestionType, SurveyQuestion};
use lensmatch::catalog::{photographers, questions, sessions};
use lensmatch::db::{self, SharedDb};
use lensmatch::embedding::{store, EmbeddingModels, EmbeddingProvider};
use rusqlite::Connection;

/// Open a fresh in-memory database with schema and migrations applied.
pub fn test_db() -> Connection {
    db::open_memory_database().unwrap()
}

pub fn shared_db() -> SharedDb {
    db::shared(test_db())
}

/// Unit vector along `axis` in a 4-dim space. Distinct axes are orthogonal.
pub fn axis(axis: usize) -> Vec<f32> {
    let mut v = vec![0.0f32; 4];
    v[axis % 4] = 1.0;
    v
}

/// Embeds text by keyword: "warm" → axis 0, "calm" → axis 1, "story" → axis 2,
/// anything else → axis 3. Inputs containing "reject" fail.
pub struct KeywordProvider;

impl EmbeddingProvider for KeywordProvider {
    fn model_name(&self) -> &str {
        "keyword-test"
    }

    fn embed(&self, input: &str) -> Result<Vec<f32>> {
        anyhow::ensure!(!input.contains("reject"), "model rejected input");
        let lower = input.to_lowercase();
        let a = if lower.contains("warm") {
            0
        } else if lower.contains("calm") {
            1
        } else if lower.contains("story") {
            2
        } else {
            3
        };
        Ok(axis(a))
    }
}

pub fn text_models() -> EmbeddingModels {
    EmbeddingModels::new(Arc::new(KeywordProvider), None)
}

pub fn question(conn: &Connection, key: &str, dimension: Dimension, question_type: QuestionType) {
    questions::upsert_question(
        conn,
        &SurveyQuestion {
            question_key: key.into(),
            question_text: format!("Question {key}"),
            question_type,
            weight_category: dimension,
            base_weight: 1.0,
            display_order: 0,
            is_active: true,
        },
    )
    .unwrap();
}

/// Add an option with a fixed id; embed it with `vector` when given.
pub fn option(conn: &Connection, question_key: &str, id: &str, vector: Option<&[f32]>) {
    questions::add_option(conn, question_key, Some(id), &format!("option {id}")).unwrap();
    if let Some(v) = vector {
        store::set_embedding(conn, id, v, "test").unwrap();
    }
}

/// Store a photographer with a description for each dimension that has a
/// vector, embedding those descriptions directly.
pub fn photographer(conn: &mut Connection, id: &str, completed: bool, vectors: [Option<&[f32]>; 4]) {
    let text = |d: Dimension| vectors[d.index()].map(|_| format!("{id} {}", d.as_str()));
    let profile = PhotographerProfile {
        photographer_id: id.into(),
        display_name: id.to_uppercase(),
        profile_completed: completed,
        style_emotion_description: text(Dimension::StyleEmotion),
        communication_psychology_description: text(Dimension::CommunicationPsychology),
        purpose_story_description: text(Dimension::PurposeStory),
        companion_description: text(Dimension::Companion),
        ..Default::default()
    };
    photographers::upsert_photographer(conn, &profile).unwrap();

    let record = photographers::get_photographer(conn, id).unwrap().unwrap();
    for (dimension, unit) in &record.dimensions {
        if let Some(v) = vectors[dimension.index()] {
            store::set_embedding(conn, &unit.id, v, "test").unwrap();
        }
    }
}

pub fn session(conn: &Connection, id: &str, answers: &[(&str, Answer)]) {
    let responses: BTreeMap<String, Answer> =
        answers.iter().map(|(k, a)| (k.to_string(), a.clone())).collect();
    sessions::insert_session(conn, Some(id), &responses).unwrap();
}

pub fn one(id: &str) -> Answer {
    Answer::One(id.into())
}

pub fn many(ids: &[&str]) -> Answer {
    Answer::Many(ids.iter().map(|s| s.to_string()).collect())
}

/// One single-choice question per dimension (`q0`..`q3`), each with options
/// `q{n}-a` on axis 0 and `q{n}-b` on axis 1, all embedded.
pub fn four_dimension_quiz(conn: &Connection) {
    for d in Dimension::ALL {
        let key = format!("q{}", d.index());
        question(conn, &key, d, QuestionType::SingleChoice);
        option(conn, &key, &format!("{key}-a"), Some(axis(0).as_slice()));
        option(conn, &key, &format!("{key}-b"), Some(axis(1).as_slice()));
    }
}
