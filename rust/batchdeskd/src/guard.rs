//! Idempotent attendance recording.
//!
//! The unique index on `(student_id, batch_id, check_in_day)` is what keeps a
//! student to one record per batch per day. Insertion goes through
//! `ON CONFLICT DO NOTHING`, so two racing check-ins resolve to the same row
//! instead of a read-then-write window.

use chrono::{DateTime, FixedOffset};
use rusqlite::{Connection, OptionalExtension};
use thiserror::Error;
use tracing::{debug, info};
use uuid::Uuid;

use crate::clock::{day_start, format_day, format_timestamp};
use crate::model::Attendance;

#[derive(Debug, Error)]
pub enum CheckInError {
    #[error("check-in storage failure: {0}")]
    Storage(#[from] rusqlite::Error),

    #[error("attendance record for {student_id} in {batch_id} disappeared after insert")]
    Vanished { student_id: String, batch_id: String },
}

#[derive(Debug, Clone)]
pub struct CheckIn {
    pub record: Attendance,
    pub already_existed: bool,
}

pub fn check_in(
    conn: &Connection,
    student_id: &str,
    batch_id: &str,
    now: DateTime<FixedOffset>,
) -> Result<CheckIn, CheckInError> {
    let check_in_day = format_day(day_start(now).date_naive());
    let attendance_id = Uuid::new_v4().to_string();

    let inserted = conn.execute(
        "INSERT INTO attendance(id, student_id, batch_id, timestamp, check_in_day)
         VALUES(?, ?, ?, ?, ?)
         ON CONFLICT(student_id, batch_id, check_in_day) DO NOTHING",
        (
            &attendance_id,
            student_id,
            batch_id,
            format_timestamp(now),
            &check_in_day,
        ),
    )?;

    let record = find_for_day(conn, student_id, batch_id, &check_in_day)?.ok_or_else(|| {
        CheckInError::Vanished {
            student_id: student_id.to_string(),
            batch_id: batch_id.to_string(),
        }
    })?;

    let already_existed = inserted == 0;
    if already_existed {
        debug!(student_id, batch_id, day = %check_in_day, "check-in already recorded");
    } else {
        info!(student_id, batch_id, attendance_id = %record.id, "check-in recorded");
    }
    Ok(CheckIn {
        record,
        already_existed,
    })
}

fn find_for_day(
    conn: &Connection,
    student_id: &str,
    batch_id: &str,
    check_in_day: &str,
) -> rusqlite::Result<Option<Attendance>> {
    let sql = format!(
        "SELECT {}
         FROM attendance a
         LEFT JOIN students s ON s.id = a.student_id
         LEFT JOIN batches b ON b.id = a.batch_id
         WHERE a.student_id = ? AND a.batch_id = ? AND a.check_in_day = ?",
        Attendance::COLUMNS
    );
    conn.query_row(&sql, (student_id, batch_id, check_in_day), Attendance::from_row)
        .optional()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::init_schema;

    fn at(raw: &str) -> DateTime<FixedOffset> {
        DateTime::parse_from_rfc3339(raw).expect("rfc3339")
    }

    fn seeded() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO batches(id, name, time_slot, category) VALUES('b1', 'Java Core', '9-11', 'Existing');
             INSERT INTO batches(id, name, time_slot, category) VALUES('b2', 'Web Project', '14-16', 'Project');
             INSERT INTO students(id, batch_id, name, contact) VALUES('s1', 'b1', 'Asha', '98765');",
        )
        .expect("seed");
        conn
    }

    fn attendance_rows(conn: &Connection) -> i64 {
        conn.query_row("SELECT COUNT(*) FROM attendance", [], |r| r.get(0))
            .expect("count")
    }

    #[test]
    fn first_check_in_of_the_day_creates_one_record() {
        let conn = seeded();
        let res = check_in(&conn, "s1", "b1", at("2024-03-04T09:00:00+05:30")).expect("check in");
        assert!(!res.already_existed);
        assert_eq!(res.record.student_id, "s1");
        assert_eq!(res.record.batch_id, "b1");
        assert_eq!(res.record.student_name.as_deref(), Some("Asha"));
        assert_eq!(res.record.timestamp, "2024-03-04T09:00:00.000+05:30");
        assert_eq!(attendance_rows(&conn), 1);
    }

    #[test]
    fn second_check_in_same_day_returns_the_first_record() {
        let conn = seeded();
        let first = check_in(&conn, "s1", "b1", at("2024-03-04T09:00:00+05:30")).expect("first");
        let second =
            check_in(&conn, "s1", "b1", at("2024-03-04T18:00:00+05:30")).expect("second");
        assert!(second.already_existed);
        assert_eq!(second.record, first.record);
        assert_eq!(second.record.timestamp, "2024-03-04T09:00:00.000+05:30");
        assert_eq!(attendance_rows(&conn), 1);
    }

    #[test]
    fn other_batch_same_day_is_independent() {
        let conn = seeded();
        check_in(&conn, "s1", "b1", at("2024-03-04T09:00:00+05:30")).expect("b1");
        let other = check_in(&conn, "s1", "b2", at("2024-03-04T14:05:00+05:30")).expect("b2");
        assert!(!other.already_existed);
        assert_eq!(attendance_rows(&conn), 2);
    }

    #[test]
    fn next_day_starts_fresh() {
        let conn = seeded();
        check_in(&conn, "s1", "b1", at("2024-03-04T23:59:59+05:30")).expect("late");
        let next = check_in(&conn, "s1", "b1", at("2024-03-05T00:00:00+05:30")).expect("next");
        assert!(!next.already_existed);
        assert_eq!(attendance_rows(&conn), 2);
    }

    #[test]
    fn unknown_student_is_a_storage_failure() {
        let conn = seeded();
        let res = check_in(&conn, "ghost", "b1", at("2024-03-04T09:00:00+05:30"));
        assert!(matches!(res, Err(CheckInError::Storage(_))));
        assert_eq!(attendance_rows(&conn), 0);
    }
}
