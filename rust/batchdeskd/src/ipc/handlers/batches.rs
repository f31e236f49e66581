use crate::ipc::helpers::{get_required_str, get_required_text, require_batch, with_db, HandlerErr};
use crate::ipc::types::{AppState, Request};
use crate::model::{Batch, BatchCategory};
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use tracing::info;
use uuid::Uuid;

fn parse_category(params: &serde_json::Value) -> Result<Option<BatchCategory>, HandlerErr> {
    match params.get("category") {
        None | Some(serde_json::Value::Null) => Ok(None),
        Some(v) => v
            .as_str()
            .and_then(BatchCategory::parse)
            .map(Some)
            .ok_or_else(|| {
                HandlerErr::bad_params("category must be one of Existing, New, Project")
            }),
    }
}

pub fn get_batch(conn: &Connection, batch_id: &str) -> Result<Batch, HandlerErr> {
    let sql = format!("SELECT {} FROM batches b WHERE b.id = ?", Batch::COLUMNS);
    conn.query_row(&sql, [batch_id], Batch::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("batch not found"))
}

fn batches_list(conn: &Connection) -> Result<serde_json::Value, HandlerErr> {
    let sql = format!(
        "SELECT {},
           (SELECT COUNT(*) FROM students s WHERE s.batch_id = b.id) AS student_count
         FROM batches b
         ORDER BY b.name",
        Batch::COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    let batches = stmt
        .query_map([], |row| {
            let batch = Batch::from_row(row)?;
            let student_count: i64 = row.get(4)?;
            Ok(json!({
                "id": batch.id,
                "name": batch.name,
                "timeSlot": batch.time_slot,
                "category": batch.category,
                "studentCount": student_count
            }))
        })
        .and_then(|it| it.collect::<Result<Vec<_>, _>>())
        .map_err(HandlerErr::query)?;
    Ok(json!({ "batches": batches }))
}

fn batches_get(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let batch = get_batch(conn, &batch_id)?;
    Ok(json!({ "batch": batch }))
}

fn batches_create(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let name = get_required_text(params, "name")?;
    let time_slot = get_required_text(params, "timeSlot")?;
    let category = parse_category(params)?.unwrap_or(BatchCategory::Existing);

    let batch = Batch {
        id: Uuid::new_v4().to_string(),
        name,
        time_slot,
        category,
    };
    conn.execute(
        "INSERT INTO batches(id, name, time_slot, category) VALUES(?, ?, ?, ?)",
        (&batch.id, &batch.name, &batch.time_slot, batch.category.as_str()),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "batches", e))?;

    info!(batch_id = %batch.id, name = %batch.name, "batch created");
    Ok(json!({ "batch": batch }))
}

fn batches_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut batch = get_batch(conn, &batch_id)?;

    if patch.get("name").is_some() {
        batch.name = get_required_text(patch, "name")?;
    }
    if patch.get("timeSlot").is_some() {
        batch.time_slot = get_required_text(patch, "timeSlot")?;
    }
    if let Some(category) = parse_category(patch)? {
        batch.category = category;
    }

    conn.execute(
        "UPDATE batches SET name = ?, time_slot = ?, category = ? WHERE id = ?",
        (&batch.name, &batch.time_slot, batch.category.as_str(), &batch.id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "batches", e))?;

    Ok(json!({ "batch": batch }))
}

fn batches_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_str(params, "batchId")?;
    require_batch(conn, &batch_id)?;

    let tx = conn
        .unchecked_transaction()
        .map_err(|e| HandlerErr::new("db_tx_failed", e.to_string()))?;

    // Dependency order; there is no ON DELETE CASCADE.
    // Students of this batch may hold attendance in other batches, so
    // attendance is cleared by both keys.
    let mut removed = serde_json::Map::new();
    for (table, sql) in [
        (
            "attendance",
            "DELETE FROM attendance
             WHERE batch_id = ?1
                OR student_id IN (SELECT id FROM students WHERE batch_id = ?1)",
        ),
        ("topics", "DELETE FROM topics WHERE batch_id = ?1"),
        ("students", "DELETE FROM students WHERE batch_id = ?1"),
        ("batches", "DELETE FROM batches WHERE id = ?1"),
    ] {
        let n = tx
            .execute(sql, [&batch_id])
            .map_err(|e| HandlerErr::write("db_delete_failed", table, e))?;
        removed.insert(table.to_string(), json!(n));
    }

    tx.commit()
        .map_err(|e| HandlerErr::new("db_commit_failed", e.to_string()))?;

    info!(batch_id = %batch_id, "batch deleted");
    Ok(json!({ "ok": true, "removed": removed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let params = &req.params;
    match req.method.as_str() {
        "batches.list" => Some(with_db(state, req, batches_list)),
        "batches.get" => Some(with_db(state, req, |c| batches_get(c, params))),
        "batches.create" => Some(with_db(state, req, |c| batches_create(c, params))),
        "batches.update" => Some(with_db(state, req, |c| batches_update(c, params))),
        "batches.delete" => Some(with_db(state, req, |c| batches_delete(c, params))),
        _ => None,
    }
}
