use rusqlite::{params, Connection, OptionalExtension};

use super::{ts_from_sql, ts_to_sql};
use crate::db::DatabaseError;
use crate::models::UserProfile;

/// Replace the cached identity snapshot wholesale. The cache holds at most
/// one row; it is never mutated field by field.
pub fn replace_profile(conn: &Connection, profile: &UserProfile) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM user_cache", [])?;
    conn.execute(
        "INSERT INTO user_cache (id, display_name, email, synced_at) VALUES (?1, ?2, ?3, ?4)",
        params![
            profile.id,
            profile.display_name,
            profile.email,
            ts_to_sql(&profile.synced_at),
        ],
    )?;
    Ok(())
}

pub fn get_profile(conn: &Connection) -> Result<Option<UserProfile>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, display_name, email, synced_at FROM user_cache",
            [],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, Option<String>>(2)?,
                    row.get::<_, String>(3)?,
                ))
            },
        )
        .optional()?;

    row.map(|(id, display_name, email, synced_at)| {
        Ok(UserProfile {
            id,
            display_name,
            email,
            synced_at: ts_from_sql("user_cache.synced_at", &synced_at)?,
        })
    })
    .transpose()
}

pub fn clear_profile(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute("DELETE FROM user_cache", [])?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::sqlite::open_memory_database;
    use chrono::Utc;

    fn sample(id: &str) -> UserProfile {
        UserProfile {
            id: id.to_string(),
            display_name: "Sam".to_string(),
            email: Some("sam@example.com".to_string()),
            synced_at: Utc::now(),
        }
    }

    #[test]
    fn empty_cache_reads_none() {
        let conn = open_memory_database().unwrap();
        assert!(get_profile(&conn).unwrap().is_none());
    }

    #[test]
    fn replace_overwrites_previous_snapshot() {
        let conn = open_memory_database().unwrap();
        replace_profile(&conn, &sample("user-1")).unwrap();
        replace_profile(&conn, &sample("user-2")).unwrap();

        let count: i64 = conn
            .query_row("SELECT COUNT(*) FROM user_cache", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, 1);
        assert_eq!(get_profile(&conn).unwrap().unwrap().id, "user-2");
    }

    #[test]
    fn clear_removes_snapshot() {
        let conn = open_memory_database().unwrap();
        replace_profile(&conn, &sample("user-1")).unwrap();
        clear_profile(&conn).unwrap();
        assert!(get_profile(&conn).unwrap().is_none());
    }
}
