//! Survey questions and their selectable options (choices and images).

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};

use super::types::{ContentUnit, SurveyQuestion};
use super::{delete_unit, insert_unit, new_unit_id};
use crate::db::now_timestamp;
use crate::embedding::store::{unit_from_row, UNIT_COLUMNS};

/// Insert or update a question. Options are managed separately.
pub fn upsert_question(conn: &Connection, question: &SurveyQuestion) -> Result<()> {
    anyhow::ensure!(
        !question.question_key.trim().is_empty(),
        "question_key must not be empty"
    );

    let now = now_timestamp();
    conn.execute(
        "INSERT INTO survey_questions \
         (question_key, question_text, question_type, weight_category, base_weight, display_order, is_active, created_at, updated_at) \
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8) \
         ON CONFLICT(question_key) DO UPDATE SET \
           question_text = excluded.question_text, \
           question_type = excluded.question_type, \
           weight_category = excluded.weight_category, \
           base_weight = excluded.base_weight, \
           display_order = excluded.display_order, \
           is_active = excluded.is_active, \
           updated_at = excluded.updated_at",
        params![
            question.question_key,
            question.question_text,
            question.question_type.as_str(),
            question.weight_category.as_str(),
            question.base_weight,
            question.display_order,
            question.is_active,
            now,
        ],
    )?;
    Ok(())
}

pub fn get_question(conn: &Connection, question_key: &str) -> Result<Option<SurveyQuestion>> {
    let row = conn
        .query_row(
            "SELECT question_key, question_text, question_type, weight_category, base_weight, display_order, is_active \
             FROM survey_questions WHERE question_key = ?1",
            params![question_key],
            question_row,
        )
        .optional()?;
    row.map(parse_question).transpose()
}

/// All questions in display order.
pub fn list_questions(conn: &Connection, active_only: bool) -> Result<Vec<SurveyQuestion>> {
    let sql = if active_only {
        "SELECT question_key, question_text, question_type, weight_category, base_weight, display_order, is_active \
         FROM survey_questions WHERE is_active = 1 ORDER BY display_order, question_key"
    } else {
        "SELECT question_key, question_text, question_type, weight_category, base_weight, display_order, is_active \
         FROM survey_questions ORDER BY display_order, question_key"
    };
    let mut stmt = conn.prepare(sql)?;
    let rows = stmt
        .query_map([], question_row)?
        .collect::<Result<Vec<_>, _>>()?;
    rows.into_iter().map(parse_question).collect()
}

type QuestionRow = (String, String, String, String, f64, i64, bool);

fn question_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuestionRow> {
    Ok((
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        row.get(3)?,
        row.get(4)?,
        row.get(5)?,
        row.get(6)?,
    ))
}

fn parse_question(row: QuestionRow) -> Result<SurveyQuestion> {
    let (question_key, question_text, question_type, weight_category, base_weight, display_order, is_active) =
        row;
    Ok(SurveyQuestion {
        question_key,
        question_text,
        question_type: question_type.parse().map_err(anyhow::Error::msg)?,
        weight_category: weight_category.parse().map_err(anyhow::Error::msg)?,
        base_weight,
        display_order,
        is_active,
    })
}

/// Add a choice (or image, for image questions) to a question and queue it.
///
/// `option_id` keeps ids stable across imports; a fresh UUID is used otherwise.
pub fn add_option(
    conn: &Connection,
    question_key: &str,
    option_id: Option<&str>,
    source: &str,
) -> Result<String> {
    anyhow::ensure!(!source.trim().is_empty(), "option content must not be empty");

    let question = get_question(conn, question_key)?
        .ok_or_else(|| anyhow::anyhow!("question not found: {question_key}"))?;
    let Some(kind) = question.question_type.option_kind() else {
        bail!("question {question_key} is freeform and has no options");
    };

    let id = option_id.map(str::to_string).unwrap_or_else(new_unit_id);
    insert_unit(conn, &id, kind, question_key, None, source)?;
    Ok(id)
}

pub fn remove_option(conn: &Connection, unit_id: &str) -> Result<bool> {
    delete_unit(conn, unit_id)
}

/// The options of one question, in creation order.
pub fn options_for_question(conn: &Connection, question_key: &str) -> Result<Vec<ContentUnit>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {UNIT_COLUMNS} FROM content_units \
         WHERE owner_id = ?1 AND kind IN ('choice','image') ORDER BY created_at, id"
    ))?;
    let units = stmt
        .query_map(params![question_key], unit_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(units)
}
