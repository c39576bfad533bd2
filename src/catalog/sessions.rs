//! Quiz sessions. Responses are editable until the first match run stamps
//! `matched_at`.

use anyhow::{bail, Result};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::BTreeMap;

use super::types::{Answer, QuizSession};
use crate::db::now_timestamp;

/// Store a new session. A caller-supplied id is kept (imports); otherwise a
/// UUID v7 is generated.
pub fn insert_session(
    conn: &Connection,
    id: Option<&str>,
    responses: &BTreeMap<String, Answer>,
) -> Result<QuizSession> {
    let id = id.map(str::to_string).unwrap_or_else(super::new_unit_id);
    anyhow::ensure!(!id.trim().is_empty(), "session id must not be empty");

    let created_at = now_timestamp();
    conn.execute(
        "INSERT INTO quiz_sessions (id, responses, created_at) VALUES (?1, ?2, ?3)",
        params![id, serde_json::to_string(responses)?, created_at],
    )?;

    tracing::debug!(session = %id, answers = responses.len(), "quiz session stored");
    Ok(QuizSession {
        id,
        responses: responses.clone(),
        created_at,
        matched_at: None,
    })
}

pub fn get_session(conn: &Connection, session_id: &str) -> Result<Option<QuizSession>> {
    let row = conn
        .query_row(
            "SELECT id, responses, created_at, matched_at FROM quiz_sessions WHERE id = ?1",
            params![session_id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, Option<String>>(3)?,
                ))
            },
        )
        .optional()?;

    let Some((id, responses, created_at, matched_at)) = row else {
        return Ok(None);
    };
    Ok(Some(QuizSession {
        id,
        responses: serde_json::from_str(&responses)?,
        created_at,
        matched_at,
    }))
}

/// Replace a session's responses. Fails once the session has been matched.
pub fn update_responses(
    conn: &Connection,
    session_id: &str,
    responses: &BTreeMap<String, Answer>,
) -> Result<()> {
    let Some(session) = get_session(conn, session_id)? else {
        bail!("quiz session not found: {session_id}");
    };
    if session.matched_at.is_some() {
        bail!("quiz session {session_id} has already been matched; start a new session");
    }

    conn.execute(
        "UPDATE quiz_sessions SET responses = ?1 WHERE id = ?2 AND matched_at IS NULL",
        params![serde_json::to_string(responses)?, session_id],
    )?;
    Ok(())
}

/// Stamp `matched_at`. Later runs keep the first stamp.
pub fn mark_matched(conn: &Connection, session_id: &str) -> Result<()> {
    conn.execute(
        "UPDATE quiz_sessions SET matched_at = COALESCE(matched_at, ?1) WHERE id = ?2",
        params![now_timestamp(), session_id],
    )?;
    Ok(())
}
