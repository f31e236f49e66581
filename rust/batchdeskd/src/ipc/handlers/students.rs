use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_text, require_batch, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Student;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

pub fn get_student(conn: &Connection, student_id: &str) -> Result<Student, HandlerErr> {
    let sql = format!(
        "SELECT {}
         FROM students s
         LEFT JOIN batches b ON b.id = s.batch_id
         WHERE s.id = ?",
        Student::COLUMNS
    );
    conn.query_row(&sql, [student_id], Student::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("student not found"))
}

pub fn list_students(conn: &Connection, batch_id: Option<&str>) -> Result<Vec<Student>, HandlerErr> {
    let sql = format!(
        "SELECT {}
         FROM students s
         LEFT JOIN batches b ON b.id = s.batch_id
         WHERE (?1 IS NULL OR s.batch_id = ?1)
         ORDER BY s.name, s.id",
        Student::COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map([batch_id], Student::from_row)
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)
}

fn students_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_optional_str(params, "batchId");
    if let Some(id) = batch_id.as_deref() {
        require_batch(conn, id)?;
    }
    let students = list_students(conn, batch_id.as_deref())?;
    Ok(json!({ "students": students }))
}

fn students_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    Ok(json!({ "student": get_student(conn, &student_id)? }))
}

fn students_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_text(params, "name")?;
    let batch_id = get_required_text(params, "batchId")?;
    let contact = get_optional_str(params, "contact").unwrap_or_default();
    require_batch(conn, &batch_id)?;

    let student_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, batch_id, name, contact) VALUES(?, ?, ?, ?)",
        (&student_id, &batch_id, &name, &contact),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "students", e))?;

    info!(student_id = %student_id, batch_id = %batch_id, "student created");
    Ok(json!({ "student": get_student(conn, &student_id)? }))
}

fn students_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut student = get_student(conn, &student_id)?;

    if patch.get("name").is_some() {
        student.name = get_required_text(patch, "name")?;
    }
    if patch.get("contact").is_some() {
        student.contact = get_required_str(patch, "contact")?.trim().to_string();
    }
    if patch.get("batchId").is_some() {
        let batch_id = get_required_text(patch, "batchId")?;
        require_batch(conn, &batch_id)?;
        student.batch_id = batch_id;
    }

    conn.execute(
        "UPDATE students SET name = ?, contact = ?, batch_id = ? WHERE id = ?",
        (&student.name, &student.contact, &student.batch_id, &student.id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "students", e))?;

    Ok(json!({ "student": get_student(conn, &student_id)? }))
}

fn students_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    get_student(conn, &student_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;
    let attendance_removed = tx
        .execute("DELETE FROM attendance WHERE student_id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "attendance", e))?;
    tx.execute("DELETE FROM students WHERE id = ?", [&student_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "students", e))?;
    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(student_id = %student_id, attendance_removed, "student deleted");
    Ok(json!({ "ok": true, "attendanceRemoved": attendance_removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let params = &req.params;
    match req.method.as_str() {
        "students.list" => Some(with_db(state, req, |c| students_list(c, params))),
        "students.get" => Some(with_db(state, req, |c| students_get(c, params))),
        "students.create" => Some(with_db(state, req, |c| students_create(c, params))),
        "students.update" => Some(with_db(state, req, |c| students_update(c, params))),
        "students.delete" => Some(with_db(state, req, |c| students_delete(c, params))),
        _ => None,
    }
}
