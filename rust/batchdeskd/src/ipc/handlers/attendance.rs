use crate::ipc::helpers::{get_optional_str, require_batch, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::Attendance;
use rusqlite::Connection;
use serde_json::json;

/// Attendance log rows, newest first, each paired with its check-in day.
/// Stamps may carry different offsets, so they are compared as instants.
pub fn list_attendance(
    conn: &Connection,
    batch_id: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<(String, Attendance)>, HandlerErr> {
    let sql = format!(
        "SELECT {}, a.check_in_day
         FROM attendance a
         LEFT JOIN students s ON s.id = a.student_id
         LEFT JOIN batches b ON b.id = a.batch_id
         WHERE (?1 IS NULL OR a.batch_id = ?1)
         ORDER BY julianday(a.timestamp) DESC, a.rowid DESC
         LIMIT ?2",
        Attendance::COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(rusqlite::params![batch_id, limit.unwrap_or(-1)], |row| {
        let record = Attendance::from_row(row)?;
        let day: String = row.get(6)?;
        Ok((day, record))
    })
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

/// Groups rows by check-in day. Days come out newest first and rows keep
/// their order within a day.
pub fn group_by_day(rows: Vec<(String, Attendance)>) -> Vec<(String, Vec<Attendance>)> {
    let mut days: Vec<(String, Vec<Attendance>)> = Vec::new();
    for (day, record) in rows {
        match days.iter_mut().find(|(d, _)| *d == day) {
            Some((_, records)) => records.push(record),
            None => days.push((day, vec![record])),
        }
    }
    days.sort_by(|a, b| b.0.cmp(&a.0));
    days
}

fn batch_filter(conn: &Connection, params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    let batch_id = get_optional_str(params, "batchId").filter(|id| id != "all");
    if let Some(id) = batch_id.as_deref() {
        require_batch(conn, id)?;
    }
    Ok(batch_id)
}

fn attendance_list(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = batch_filter(conn, params)?;
    let records: Vec<Attendance> = list_attendance(conn, batch_id.as_deref(), None)?
        .into_iter()
        .map(|(_, r)| r)
        .collect();
    Ok(json!({ "attendance": records }))
}

fn attendance_by_day(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = batch_filter(conn, params)?;
    let rows = list_attendance(conn, batch_id.as_deref(), None)?;
    let days: Vec<serde_json::Value> = group_by_day(rows)
        .into_iter()
        .map(|(date, records)| {
            json!({
                "date": date,
                "count": records.len(),
                "records": records
            })
        })
        .collect();
    Ok(json!({ "days": days }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let params = &req.params;
    match req.method.as_str() {
        "attendance.list" => Some(with_db(state, req, |c| attendance_list(c, params))),
        "attendance.byDay" => Some(with_db(state, req, |c| attendance_by_day(c, params))),
        _ => None,
    }
}
