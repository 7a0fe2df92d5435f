use std::str::FromStr;

use rusqlite::{params, Connection, OptionalExtension};
use uuid::Uuid;

use super::{ts_from_sql, ts_to_sql, uuid_from_sql};
use crate::db::DatabaseError;
use crate::models::{ChatMessage, MessageRole, MessageStatus};

const MESSAGE_COLUMNS: &str = "id, quiz_id, role, content, created_at, status, synced";

/// Create-or-replace by id. Parent, role and creation time are immutable;
/// only content, status and the synced flag ever change.
pub fn upsert_message(conn: &Connection, msg: &ChatMessage) -> Result<(), DatabaseError> {
    conn.execute(
        "INSERT INTO chat_messages (id, quiz_id, role, content, created_at, status, synced)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
         ON CONFLICT(id) DO UPDATE SET
             content = excluded.content,
             status = excluded.status,
             synced = excluded.synced",
        params![
            msg.id.to_string(),
            msg.quiz_id.to_string(),
            msg.role.as_str(),
            msg.content,
            ts_to_sql(&msg.created_at),
            msg.status.as_str(),
            msg.synced,
        ],
    )?;
    Ok(())
}

pub fn get_message(conn: &Connection, id: &Uuid) -> Result<Option<ChatMessage>, DatabaseError> {
    let row = conn
        .query_row(
            &format!("SELECT {MESSAGE_COLUMNS} FROM chat_messages WHERE id = ?1"),
            params![id.to_string()],
            message_row,
        )
        .optional()?;
    row.map(message_from_row).transpose()
}

/// Messages of one quiz in conversation order: `(created_at, id)`.
pub fn messages_for_quiz(
    conn: &Connection,
    quiz_id: &Uuid,
) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages
         WHERE quiz_id = ?1 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map(params![quiz_id.to_string()], message_row)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

pub fn all_messages(conn: &Connection) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([], message_row)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

pub fn unsynced_messages(conn: &Connection) -> Result<Vec<ChatMessage>, DatabaseError> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {MESSAGE_COLUMNS} FROM chat_messages
         WHERE synced = 0 ORDER BY created_at ASC, id ASC"
    ))?;
    let rows = stmt.query_map([], message_row)?;

    let mut messages = Vec::new();
    for row in rows {
        messages.push(message_from_row(row?)?);
    }
    Ok(messages)
}

/// Concatenate a streamed chunk onto the stored content, in call order.
/// Returns false when the message is gone (raced with a deletion).
pub fn append_message_content(
    conn: &Connection,
    id: &Uuid,
    chunk: &str,
    status: MessageStatus,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE chat_messages SET content = content || ?2, status = ?3, synced = 0
         WHERE id = ?1",
        params![id.to_string(), chunk, status.as_str()],
    )?;
    Ok(changed > 0)
}

/// Set a terminal status. When `replacement` is given the content is
/// replaced wholesale (error text) instead of keeping the partial stream.
pub fn finalize_message(
    conn: &Connection,
    id: &Uuid,
    status: MessageStatus,
    replacement: Option<&str>,
) -> Result<bool, DatabaseError> {
    let changed = match replacement {
        Some(content) => conn.execute(
            "UPDATE chat_messages SET content = ?2, status = ?3, synced = 0 WHERE id = ?1",
            params![id.to_string(), content, status.as_str()],
        )?,
        None => conn.execute(
            "UPDATE chat_messages SET status = ?2, synced = 0 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?,
    };
    Ok(changed > 0)
}

pub fn mark_message_synced(
    conn: &Connection,
    id: &Uuid,
    synced: bool,
) -> Result<bool, DatabaseError> {
    let changed = conn.execute(
        "UPDATE chat_messages SET synced = ?2 WHERE id = ?1",
        params![id.to_string(), synced],
    )?;
    Ok(changed > 0)
}

// ── Row mapping ─────────────────────────────────────────────

struct MessageRow {
    id: String,
    quiz_id: String,
    role: String,
    content: String,
    created_at: String,
    status: String,
    synced: bool,
}

fn message_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        quiz_id: row.get(1)?,
        role: row.get(2)?,
        content: row.get(3)?,
        created_at: row.get(4)?,
        status: row.get(5)?,
        synced: row.get(6)?,
    })
}

fn message_from_row(row: MessageRow) -> Result<ChatMessage, DatabaseError> {
    Ok(ChatMessage {
        id: uuid_from_sql("chat_messages.id", &row.id)?,
        quiz_id: uuid_from_sql("chat_messages.quiz_id", &row.quiz_id)?,
        role: MessageRole::from_str(&row.role)?,
        content: row.content,
        created_at: ts_from_sql("chat_messages.created_at", &row.created_at)?,
        status: MessageStatus::from_str(&row.status)?,
        synced: row.synced,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::quiz::upsert_quiz;
    use crate::db::sqlite::open_memory_database;
    use crate::models::Quiz;
    use chrono::Duration;

    fn quiz_in_db(conn: &Connection) -> Quiz {
        let quiz = Quiz::new("host quiz");
        upsert_quiz(conn, &quiz).unwrap();
        quiz
    }

    #[test]
    fn upsert_then_get_round_trips() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let msg = ChatMessage::user(quiz.id, "What is mitosis?");
        upsert_message(&conn, &msg).unwrap();

        let loaded = get_message(&conn, &msg.id).unwrap().unwrap();
        assert_eq!(loaded, msg);
    }

    #[test]
    fn message_requires_existing_parent() {
        let conn = open_memory_database().unwrap();
        let orphan = ChatMessage::user(Uuid::new_v4(), "no parent");
        let result = upsert_message(&conn, &orphan);
        assert!(matches!(result, Err(DatabaseError::Sqlite(_))));
    }

    #[test]
    fn messages_order_by_created_at_then_id() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);

        let base = chrono::Utc::now();
        let mut first = ChatMessage::user(quiz.id, "first");
        let mut second = ChatMessage::user(quiz.id, "second");
        first.created_at = base;
        second.created_at = base + Duration::seconds(1);

        // Two messages at the same instant: id breaks the tie deterministically.
        let mut tie_a = ChatMessage::user(quiz.id, "tie-a");
        let mut tie_b = ChatMessage::user(quiz.id, "tie-b");
        let tied_at = base + Duration::seconds(2);
        tie_a.created_at = tied_at;
        tie_b.created_at = tied_at;
        tie_a.id = Uuid::parse_str("00000000-0000-4000-8000-000000000001").unwrap();
        tie_b.id = Uuid::parse_str("00000000-0000-4000-8000-000000000002").unwrap();

        for msg in [&second, &tie_b, &first, &tie_a] {
            upsert_message(&conn, msg).unwrap();
        }

        let contents: Vec<String> = messages_for_quiz(&conn, &quiz.id)
            .unwrap()
            .into_iter()
            .map(|m| m.content)
            .collect();
        assert_eq!(contents, vec!["first", "second", "tie-a", "tie-b"]);
    }

    #[test]
    fn append_concatenates_in_call_order() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let msg = ChatMessage::placeholder(quiz.id);
        upsert_message(&conn, &msg).unwrap();

        for chunk in ["Mitosis", " is", " cell division."] {
            assert!(
                append_message_content(&conn, &msg.id, chunk, MessageStatus::Streaming).unwrap()
            );
        }

        let loaded = get_message(&conn, &msg.id).unwrap().unwrap();
        assert_eq!(loaded.content, "Mitosis is cell division.");
        assert_eq!(loaded.status, MessageStatus::Streaming);
    }

    #[test]
    fn append_to_missing_message_reports_false() {
        let conn = open_memory_database().unwrap();
        let changed =
            append_message_content(&conn, &Uuid::new_v4(), "x", MessageStatus::Streaming).unwrap();
        assert!(!changed);
    }

    #[test]
    fn finalize_keeps_streamed_content_by_default() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let msg = ChatMessage::placeholder(quiz.id);
        upsert_message(&conn, &msg).unwrap();
        append_message_content(&conn, &msg.id, "partial answer", MessageStatus::Streaming)
            .unwrap();

        finalize_message(&conn, &msg.id, MessageStatus::Done, None).unwrap();

        let loaded = get_message(&conn, &msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Done);
        assert_eq!(loaded.content, "partial answer");
    }

    #[test]
    fn finalize_with_replacement_overwrites_content() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let msg = ChatMessage::placeholder(quiz.id);
        upsert_message(&conn, &msg).unwrap();
        append_message_content(&conn, &msg.id, "half a sent", MessageStatus::Streaming).unwrap();

        finalize_message(&conn, &msg.id, MessageStatus::Error, Some("cancelled")).unwrap();

        let loaded = get_message(&conn, &msg.id).unwrap().unwrap();
        assert_eq!(loaded.status, MessageStatus::Error);
        assert_eq!(loaded.content, "cancelled");
    }

    #[test]
    fn deleting_quiz_cascades_to_messages() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let msg = ChatMessage::user(quiz.id, "soon gone");
        upsert_message(&conn, &msg).unwrap();

        crate::db::repository::quiz::delete_quiz(&conn, &quiz.id).unwrap();

        assert!(get_message(&conn, &msg.id).unwrap().is_none());
    }

    #[test]
    fn unsynced_filter_excludes_synced_rows() {
        let conn = open_memory_database().unwrap();
        let quiz = quiz_in_db(&conn);
        let pending = ChatMessage::user(quiz.id, "pending");
        let mut uploaded = ChatMessage::user(quiz.id, "uploaded");
        uploaded.synced = true;
        upsert_message(&conn, &pending).unwrap();
        upsert_message(&conn, &uploaded).unwrap();

        let unsynced = unsynced_messages(&conn).unwrap();
        assert_eq!(unsynced.len(), 1);
        assert_eq!(unsynced[0].id, pending.id);
    }
}
