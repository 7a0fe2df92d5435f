use std::str::FromStr;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ts_from_sql, ts_to_sql, uuid_from_sql};
use crate::db::DatabaseError;
use crate::models::{Ownership, Quiz, QuizStatus};

const QUIZ_COLUMNS: &str =
    "id, title, owner_id, created_at, updated_at, last_message_at, status, synced";

/// Create-or-replace by id. `created_at` is immutable once the row exists.
pub fn upsert_quiz(conn: &Connection, quiz: &Quiz) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO quizzes (id, title, owner_id, created_at, updated_at, last_message_at, status, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
         ON CONFLICT(id) DO UPDATE SET
             title = excluded.title,
             owner_id = excluded.owner_id,
             updated_at = MAX(updated_at, excluded.updated_at),
             last_message_at = MAX(last_message_at, excluded.last_message_at),
             status = excluded.status,
             synced = excluded.synced",
        params![
            quiz.id.to_string(),
            quiz.title,
            quiz.owner.as_column(),
            ts_to_sql(&quiz.created_at),
            ts_to_sql(&quiz.updated_at),
            ts_to_sql(&quiz.last_message_at),
            quiz.status.as_str(),
            quiz.synced,
        ],
    )?;
    Ok(())
}

pub fn get_quiz(conn: &Connection, id: &Uuid) -> Result<Option<Quiz>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {QUIZ_COLUMNS} FROM quizzes WHERE id = ?1"),
            params![id.to_string()],
            quiz_row,
        )
        .optional()?;
    row.map(quiz_from_row).transpose()
}

/// All quizzes, most recently active first.
pub fn list_quizzes(conn: &Connection) -> Result<Vec<Quiz>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUIZ_COLUMNS} FROM quizzes ORDER BY last_message_at DESC, id ASC"
    ))?;
    let rows = stmt.query_map([], quiz_row)?;

    let mut quizzes = Vec::new();
    for row in rows {
        quizzes.push(quiz_from_row(row?)?);
    }
    Ok(quizzes)
}

pub fn unsynced_quizzes(conn: &Connection) -> Result<Vec<Quiz>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {QUIZ_COLUMNS} FROM quizzes WHERE synced = 0 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([], quiz_row)?;

    let mut quizzes = Vec::new();
    for row in rows {
        quizzes.push(quiz_from_row(row?)?);
    }
    Ok(quizzes)
}

/// Mirror a generation transition onto the parent quiz. The activity
/// timestamps never move backwards. Returns false when the quiz is gone.
pub fn update_quiz_status(
    conn: &Connection,
    id: &Uuid,
    status: QuizStatus,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE quizzes SET
             status = ?2,
             updated_at = MAX(updated_at, ?3),
             last_message_at = MAX(last_message_at, ?3),
             synced = 0
         WHERE id = ?1",
        params![id.to_string(), status.as_str(), ts_to_sql(&now)],
    )?;
    Ok(changed > 0)
}

/// Rename a quiz. Returns false when the quiz is gone.
pub fn update_quiz_title(
    conn: &Connection,
    id: &Uuid,
    title: &str,
    now: DateTime<Utc>,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE quizzes SET title = ?2, updated_at = MAX(updated_at, ?3), synced = 0
         WHERE id = ?1",
        params![id.to_string(), title, ts_to_sql(&now)],
    )?;
    Ok(changed > 0)
}

pub fn mark_quiz_synced(
    conn: &Connection,
    id: &Uuid,
    synced: bool,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE quizzes SET synced = ?2 WHERE id = ?1",
        params![id.to_string(), synced],
    )?;
    Ok(changed > 0)
}

/// Attach an owner to every quiz that does not have one yet. The owner of
/// a quiz is set exactly once; already-owned rows are left untouched.
pub fn claim_anonymous_quizzes(
    conn: &Connection,
    owner_id: &str,
) -> Result<usize, DatabaseError> {
    let changed = conn.execute(
        "UPDATE quizzes SET owner_id = ?1, synced = 0 WHERE owner_id IS NULL",
        params![owner_id],
    )?;
    Ok(changed)
}

pub fn delete_quiz(conn: &Connection, id: &Uuid) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "DELETE FROM quizzes WHERE id = ?1",
        params![id.to_string()],
    )?;
    Ok(changed > 0)
}

// ── Row mapping ─────────────────────────────────────────────

struct QuizRow {
    id: String,
    title: String,
    owner_id: Option<String>,
    created_at: String,
    updated_at: String,
    last_message_at: String,
    status: String,
    synced: bool,
}

fn quiz_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<QuizRow> {
    Ok(QuizRow {
        id: row.get(0)?,
        title: row.get(1)?,
        owner_id: row.get(2)?,
        created_at: row.get(3)?,
        updated_at: row.get(4)?,
        last_message_at: row.get(5)?,
        status: row.get(6)?,
        synced: row.get(7)?,
    })
}

fn quiz_from_row(row: QuizRow) -> Result<Quiz, DatabaseError> {
    Ok(Quiz {
        id: uuid_from_sql("quizzes.id", &row.id)?,
        title: row.title,
        owner: Ownership::from_column(row.owner_id),
        created_at: ts_from_sql("quizzes.created_at", &row.created_at)?,
        updated_at: ts_from_sql("quizzes.updated_at", &row.updated_at)?,
        last_message_at: ts_from_sql("quizzes.last_message_at", &row.last_message_at)?,
        status: QuizStatus::from_str(&row.status)?,
        synced: row.synced,
    })
}
