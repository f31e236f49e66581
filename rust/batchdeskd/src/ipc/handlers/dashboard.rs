use crate::clock::{format_day, Clock};
use crate::ipc::handlers::attendance::list_attendance;
use crate::ipc::handlers::topics::list_topics;
use crate::ipc::helpers::{with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Attendance;
use rusqlite::Connection;
use serde_json::json;

const RECENT_LIMIT: i64 = 5;

fn count(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> Result<i64, HandlerErr> {
    conn.query_row(sql, params, |r| r.get(0))
        .map_err(HandlerErr::query)
}

fn dashboard_summary(conn: &Connection, clock: &Clock) -> Result<serde_json::Value, HandlerErr> {
    let today = format_day(clock.today());

    let batch_count = count(conn, "SELECT COUNT(*) FROM batches", [])?;
    let student_count = count(conn, "SELECT COUNT(*) FROM students", [])?;
    let topic_count = count(conn, "SELECT COUNT(*) FROM topics", [])?;
    let today_attendance = count(
        conn,
        "SELECT COUNT(*) FROM attendance WHERE check_in_day = ?",
        [&today],
    )?;

    let recent_attendance: Vec<Attendance> = list_attendance(conn, None, Some(RECENT_LIMIT))?
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    let recent_topics = list_topics(conn, None, Some(RECENT_LIMIT))?;

    Ok(json!({
        "today": today,
        "batchCount": batch_count,
        "studentCount": student_count,
        "topicCount": topic_count,
        "todayAttendanceCount": today_attendance,
        "recentAttendance": recent_attendance,
        "recentTopics": recent_topics
    }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "dashboard.summary" => {
            let clock = state.clock.clone();
            Some(with_db(state, req, |c| dashboard_summary(c, &clock)))
        }
        _ => None,
    }
}
