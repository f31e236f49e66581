use crate::clock::{format_day, Clock};
use crate::code::{check_in_path, check_in_url, derive_code, parse_check_in_path};
use crate::flow::{CheckInFlow, CheckInStatus, SubmitError};
use crate::ipc::handlers::batches::get_batch;
use crate::ipc::handlers::setup::check_in_base_url;
use crate::ipc::handlers::students::{get_student, list_students};
use crate::ipc::helpers::{get_optional_str, get_required_str, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use rusqlite::Connection;
use serde_json::json;
use tracing::info;

/// `{ batchId, code }`, or a scanned `{ path }` that carries both.
fn entry_params(params: &serde_json::Value) -> (Option<String>, Option<String>) {
    if let Some(path) = get_optional_str(params, "path") {
        return match parse_check_in_path(&path) {
            Some((batch_id, code)) => (Some(batch_id), Some(code)),
            None => (None, None),
        };
    }
    (
        get_optional_str(params, "batchId"),
        get_optional_str(params, "code"),
    )
}

fn enter(clock: &Clock, params: &serde_json::Value) -> Result<CheckInFlow, HandlerErr> {
    let (batch_id, code) = entry_params(params);
    CheckInFlow::enter(batch_id.as_deref(), code.as_deref(), clock.today()).map_err(|rejection| {
        info!(reason = rejection.code(), "check-in link rejected");
        HandlerErr::new(rejection.code(), rejection.to_string())
            .with_details(json!({ "redirect": "/" }))
    })
}

fn checkin_code(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let batch = get_batch(conn, &batch_id)?;
    let base_url = check_in_base_url(conn).map_err(HandlerErr::query)?;

    let today = clock.today();
    let code = derive_code(&batch.id, today);
    Ok(json!({
        "batch": batch,
        "code": code,
        "path": check_in_path(&batch.id, &code),
        "url": check_in_url(&base_url, &batch.id, &code),
        "validFor": format_day(today)
    }))
}

fn checkin_open(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let flow = enter(clock, params)?;
    let batch = get_batch(conn, flow.batch_id())?;
    let students: Vec<serde_json::Value> = list_students(conn, Some(&batch.id))?
        .into_iter()
        .map(|s| json!({ "id": s.id, "name": s.name }))
        .collect();
    Ok(json!({
        "batch": batch,
        "students": students,
        "status": flow.status().as_str(),
        "date": format_day(clock.today())
    }))
}

/// Storage failures during a submit answer `checkin_failed`; other errors
/// (not found, bad params) pass through.
fn checkin_failed(e: HandlerErr) -> HandlerErr {
    if e.code != "db_query_failed" {
        return e;
    }
    HandlerErr::new("checkin_failed", SubmitError::FAILED_MESSAGE).with_details(json!({
        "retryable": true,
        "status": CheckInStatus::Error.as_str(),
        "cause": e.message
    }))
}

fn checkin_submit(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let mut flow = enter(clock, params)?;
    let batch = get_batch(conn, flow.batch_id()).map_err(checkin_failed)?;

    let student_id = get_optional_str(params, "studentId");
    if let Some(id) = student_id.as_deref() {
        let student = get_student(conn, id).map_err(checkin_failed)?;
        if student.batch_id != batch.id {
            return Err(HandlerErr::not_found("student is not enrolled in this batch"));
        }
    }

    match flow.submit(conn, student_id.as_deref(), clock.now()) {
        Ok(res) => Ok(json!({
            "status": flow.status().as_str(),
            "terminal": flow.status().is_terminal(),
            "alreadyExisted": res.already_existed,
            "record": res.record
        })),
        Err(e @ SubmitError::StudentRequired) => {
            Err(HandlerErr::new("student_required", e.to_string()))
        }
        Err(e @ SubmitError::Failed(_)) => Err(HandlerErr::new("checkin_failed", e.to_string())
            .with_details(json!({
                "retryable": true,
                "status": flow.status().as_str()
            }))),
        Err(e @ SubmitError::NotIdle(_)) => Err(HandlerErr::new("bad_state", e.to_string())),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let params = &req.params;
    let clock = state.clock.clone();
    match req.method.as_str() {
        "checkin.code" => Some(with_db(state, req, |c| checkin_code(c, &clock, params))),
        "checkin.open" => Some(with_db(state, req, |c| checkin_open(c, &clock, params))),
        "checkin.submit" => Some(with_db(state, req, |c| checkin_submit(c, &clock, params))),
        _ => None,
    }
}
