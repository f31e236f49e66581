use chrono::{DateTime, Local};
use rusqlite::{Connection, OptionalExtension};
use std::path::Path;

use crate::clock::format_day;

pub const DB_FILE_NAME: &str = "batchdesk.sqlite3";

pub fn open_db(workspace: &Path) -> anyhow::Result<Connection> {
    std::fs::create_dir_all(workspace)?;
    let db_path = workspace.join(DB_FILE_NAME);
    let conn = Connection::open(db_path)?;
    init_schema(&conn)?;
    Ok(conn)
}

pub fn init_schema(conn: &Connection) -> anyhow::Result<()> {
    conn.execute("PRAGMA foreign_keys = ON", [])?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS batches(
            id TEXT PRIMARY KEY,
            name TEXT NOT NULL,
            time_slot TEXT NOT NULL,
            category TEXT NOT NULL DEFAULT 'Existing'
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_batches_name ON batches(name)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS students(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            name TEXT NOT NULL,
            contact TEXT NOT NULL DEFAULT '',
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_students_batch ON students(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS topics(
            id TEXT PRIMARY KEY,
            batch_id TEXT NOT NULL,
            date TEXT NOT NULL,
            topic TEXT NOT NULL,
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_topics_batch ON topics(batch_id)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS attendance(
            id TEXT PRIMARY KEY,
            student_id TEXT NOT NULL,
            batch_id TEXT NOT NULL,
            timestamp TEXT NOT NULL,
            check_in_day TEXT NOT NULL,
            FOREIGN KEY(student_id) REFERENCES students(id),
            FOREIGN KEY(batch_id) REFERENCES batches(id)
        )",
        [],
    )?;
    // Workspaces created before check-in days were tracked need the column
    // (and its backfill) before the unique index can be built.
    ensure_attendance_check_in_day(conn)?;
    conn.execute(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_attendance_student_batch_day
         ON attendance(student_id, batch_id, check_in_day)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_batch ON attendance(batch_id)",
        [],
    )?;
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_attendance_timestamp ON attendance(timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS settings(
            key TEXT PRIMARY KEY,
            value_json TEXT NOT NULL
        )",
        [],
    )?;

    Ok(())
}

fn ensure_attendance_check_in_day(conn: &Connection) -> anyhow::Result<()> {
    let has_column = table_has_column(conn, "attendance", "check_in_day")?;
    if has_column && !has_blank_check_in_days(conn)? {
        return Ok(());
    }

    // Column, backfill and dedupe land together or not at all.
    let tx = conn.unchecked_transaction()?;
    if !has_column {
        tx.execute(
            "ALTER TABLE attendance ADD COLUMN check_in_day TEXT NOT NULL DEFAULT ''",
            [],
        )?;
    }

    let pending: Vec<(i64, String)> = {
        let mut stmt =
            tx.prepare("SELECT rowid, timestamp FROM attendance WHERE check_in_day = ''")?;
        let rows = stmt.query_map([], |r| Ok((r.get(0)?, r.get(1)?)))?;
        rows.collect::<Result<Vec<_>, _>>()?
    };
    for (rowid, timestamp) in &pending {
        tx.execute(
            "UPDATE attendance SET check_in_day = ? WHERE rowid = ?",
            (legacy_check_in_day(timestamp), rowid),
        )?;
    }

    // Older data may already hold same-day duplicates. Keep the earliest.
    tx.execute(
        "DELETE FROM attendance
         WHERE rowid NOT IN (
           SELECT MIN(rowid)
           FROM attendance
           GROUP BY student_id, batch_id, check_in_day
         )",
        [],
    )?;
    tx.commit()?;
    Ok(())
}

fn has_blank_check_in_days(conn: &Connection) -> anyhow::Result<bool> {
    let blank: i64 = conn.query_row(
        "SELECT EXISTS(SELECT 1 FROM attendance WHERE check_in_day = '')",
        [],
        |r| r.get(0),
    )?;
    Ok(blank != 0)
}

/// Calendar day for a stored timestamp. UTC (`Z`) stamps are moved to the
/// local offset; stamps that carry an offset keep their own date.
fn legacy_check_in_day(timestamp: &str) -> String {
    let raw = timestamp.trim();
    match DateTime::parse_from_rfc3339(raw) {
        Ok(at) if raw.ends_with('Z') || raw.ends_with('z') => {
            format_day(at.with_timezone(&Local).date_naive())
        }
        Ok(at) => format_day(at.date_naive()),
        Err(_) => raw.chars().take(10).collect(),
    }
}

fn table_has_column(conn: &Connection, table: &str, column: &str) -> anyhow::Result<bool> {
    let sql = format!("PRAGMA table_info({})", table);
    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([])?;
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        if name == column {
            return Ok(true);
        }
    }
    Ok(false)
}

pub fn settings_get_json(conn: &Connection, key: &str) -> anyhow::Result<Option<serde_json::Value>> {
    let raw: Option<String> = conn
        .query_row(
            "SELECT value_json FROM settings WHERE key = ?",
            [key],
            |r| r.get(0),
        )
        .optional()?;
    match raw {
        Some(s) => Ok(Some(serde_json::from_str(&s)?)),
        None => Ok(None),
    }
}

pub fn settings_set_json(
    conn: &Connection,
    key: &str,
    value: &serde_json::Value,
) -> anyhow::Result<()> {
    let raw = serde_json::to_string(value)?;
    conn.execute(
        "INSERT INTO settings(key, value_json) VALUES(?, ?)
         ON CONFLICT(key) DO UPDATE SET value_json = excluded.value_json",
        (key, &raw),
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schema_is_idempotent() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("first init");
        init_schema(&conn).expect("second init");
        assert!(table_has_column(&conn, "attendance", "check_in_day").expect("pragma"));
    }

    #[test]
    fn legacy_attendance_is_backfilled_and_deduplicated() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE attendance(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            INSERT INTO attendance VALUES('a1', 's1', 'b1', '2024-03-04T09:00:00+05:30');
            INSERT INTO attendance VALUES('a2', 's1', 'b1', '2024-03-04T18:00:00+05:30');
            INSERT INTO attendance VALUES('a3', 's1', 'b1', '2024-03-05T09:00:00+05:30');",
        )
        .expect("legacy table");

        init_schema(&conn).expect("migrate");

        let mut stmt = conn
            .prepare("SELECT id, check_in_day FROM attendance ORDER BY id")
            .expect("prepare");
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .expect("rows");
        assert_eq!(
            rows,
            vec![
                ("a1".to_string(), "2024-03-04".to_string()),
                ("a3".to_string(), "2024-03-05".to_string()),
            ]
        );
    }

    #[test]
    fn half_migrated_attendance_is_repaired() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE attendance(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            INSERT INTO attendance VALUES('a1', 's1', 'b1', '2024-03-04T09:00:00+05:30');
            INSERT INTO attendance VALUES('a2', 's1', 'b1', '2024-03-05T09:00:00+05:30');
            ALTER TABLE attendance ADD COLUMN check_in_day TEXT NOT NULL DEFAULT '';",
        )
        .expect("interrupted migration");

        init_schema(&conn).expect("reopen");
        init_schema(&conn).expect("reopen again");

        let mut stmt = conn
            .prepare("SELECT id, check_in_day FROM attendance ORDER BY id")
            .expect("prepare");
        let rows: Vec<(String, String)> = stmt
            .query_map([], |r| Ok((r.get(0)?, r.get(1)?)))
            .and_then(|it| it.collect::<Result<Vec<_>, _>>())
            .expect("rows");
        assert_eq!(
            rows,
            vec![
                ("a1".to_string(), "2024-03-04".to_string()),
                ("a2".to_string(), "2024-03-05".to_string()),
            ]
        );
    }

    #[test]
    fn failed_backfill_leaves_legacy_table_untouched() {
        let conn = Connection::open_in_memory().expect("open");
        conn.execute_batch(
            "CREATE TABLE attendance(
                id TEXT PRIMARY KEY,
                student_id TEXT NOT NULL,
                batch_id TEXT NOT NULL,
                timestamp TEXT NOT NULL
            );
            INSERT INTO attendance VALUES('a1', 's1', 'b1', '2024-03-04T09:00:00+05:30');
            CREATE TRIGGER no_backfill BEFORE UPDATE ON attendance
            BEGIN SELECT RAISE(ABORT, 'backfill refused'); END;",
        )
        .expect("legacy table");

        assert!(init_schema(&conn).is_err());
        assert!(!table_has_column(&conn, "attendance", "check_in_day").expect("pragma"));

        conn.execute_batch("DROP TRIGGER no_backfill").expect("drop trigger");
        init_schema(&conn).expect("migrate");
        let day: String = conn
            .query_row("SELECT check_in_day FROM attendance WHERE id = 'a1'", [], |r| r.get(0))
            .expect("day");
        assert_eq!(day, "2024-03-04");
    }

    #[test]
    fn utc_legacy_stamps_use_the_local_day() {
        let raw = "2024-03-04T22:30:00.000Z";
        let expected = DateTime::parse_from_rfc3339(raw)
            .expect("rfc3339")
            .with_timezone(&Local)
            .date_naive();
        assert_eq!(legacy_check_in_day(raw), format_day(expected));
        assert_eq!(legacy_check_in_day("2024-03-04T23:30:00-08:00"), "2024-03-04");
        assert_eq!(legacy_check_in_day("2024-03-04 garbage"), "2024-03-04");
    }

    #[test]
    fn settings_roundtrip_overwrites() {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("init");
        assert!(settings_get_json(&conn, "setup.checkIn").expect("get").is_none());
        settings_set_json(&conn, "setup.checkIn", &serde_json::json!({ "baseUrl": "a" }))
            .expect("set");
        settings_set_json(&conn, "setup.checkIn", &serde_json::json!({ "baseUrl": "b" }))
            .expect("overwrite");
        let v = settings_get_json(&conn, "setup.checkIn").expect("get").expect("some");
        assert_eq!(v["baseUrl"], "b");
    }
}
