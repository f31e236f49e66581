use crate::clock::{format_day, parse_day, Clock};
use crate::ipc::helpers::{
    get_optional_str, get_required_str, get_required_text, require_batch, with_db, HandlerErr,
};
use crate::ipc::types::{AppState, Request};
use crate::model::Topic;
use rusqlite::{Connection, OptionalExtension};
use serde_json::json;
use uuid::Uuid;

fn parse_topic_date(params: &serde_json::Value) -> Result<Option<String>, HandlerErr> {
    match get_optional_str(params, "date") {
        None => Ok(None),
        Some(raw) => parse_day(&raw)
            .map(|d| Some(format_day(d)))
            .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD")),
    }
}

fn get_topic(conn: &Connection, topic_id: &str) -> Result<Topic, HandlerErr> {
    let sql = format!(
        "SELECT {}
         FROM topics t
         LEFT JOIN batches b ON b.id = t.batch_id
         WHERE t.id = ?",
        Topic::COLUMNS
    );
    conn.query_row(&sql, [topic_id], Topic::from_row)
        .optional()
        .map_err(HandlerErr::query)?
        .ok_or_else(|| HandlerErr::not_found("topic not found"))
}

pub fn list_topics(
    conn: &Connection,
    batch_id: Option<&str>,
    limit: Option<i64>,
) -> Result<Vec<Topic>, HandlerErr> {
    let sql = format!(
        "SELECT {}
         FROM topics t
         LEFT JOIN batches b ON b.id = t.batch_id
         WHERE (?1 IS NULL OR t.batch_id = ?1)
         ORDER BY t.date DESC, t.rowid DESC
         LIMIT ?2",
        Topic::COLUMNS
    );
    let mut stmt = conn.prepare(&sql).map_err(HandlerErr::query)?;
    stmt.query_map(
        rusqlite::params![batch_id, limit.unwrap_or(-1)],
        Topic::from_row,
    )
    .and_then(|it| it.collect::<Result<Vec<_>, _>>())
    .map_err(HandlerErr::query)
}

fn topics_list(conn: &Connection, params: &serde_json::Value) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_optional_str(params, "batchId");
    if let Some(id) = batch_id.as_deref() {
        require_batch(conn, id)?;
    }
    let topics = list_topics(conn, batch_id.as_deref(), None)?;
    Ok(json!({ "topics": topics }))
}

fn topics_create(
    conn: &Connection,
    clock: &Clock,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let batch_id = get_required_text(params, "batchId")?;
    let text = get_required_text(params, "topic")?;
    let date = parse_topic_date(params)?.unwrap_or_else(|| format_day(clock.today()));
    require_batch(conn, &batch_id)?;

    let topic_id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO topics(id, batch_id, date, topic) VALUES(?, ?, ?, ?)",
        (&topic_id, &batch_id, &date, &text),
    )
    .map_err(|e| HandlerErr::write("db_insert_failed", "topics", e))?;

    Ok(json!({ "topic": get_topic(conn, &topic_id)? }))
}

fn topics_update(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let topic_id = get_required_str(params, "topicId")?;
    let Some(patch) = params.get("patch").filter(|v| v.is_object()) else {
        return Err(HandlerErr::bad_params("patch must be an object"));
    };
    let mut topic = get_topic(conn, &topic_id)?;

    if patch.get("topic").is_some() {
        topic.topic = get_required_text(patch, "topic")?;
    }
    if patch.get("date").is_some() {
        topic.date = parse_topic_date(patch)?
            .ok_or_else(|| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    }
    if patch.get("batchId").is_some() {
        let batch_id = get_required_text(patch, "batchId")?;
        require_batch(conn, &batch_id)?;
        topic.batch_id = batch_id;
    }

    conn.execute(
        "UPDATE topics SET batch_id = ?, date = ?, topic = ? WHERE id = ?",
        (&topic.batch_id, &topic.date, &topic.topic, &topic.id),
    )
    .map_err(|e| HandlerErr::write("db_update_failed", "topics", e))?;

    Ok(json!({ "topic": get_topic(conn, &topic_id)? }))
}

fn topics_delete(
    conn: &Connection,
    params: &serde_json::Value,
) -> Result<serde_json::Value, HandlerErr> {
    let topic_id = get_required_str(params, "topicId")?;
    let n = conn
        .execute("DELETE FROM topics WHERE id = ?", [&topic_id])
        .map_err(|e| HandlerErr::write("db_delete_failed", "topics", e))?;
    if n == 0 {
        return Err(HandlerErr::not_found("topic not found"));
    }
    Ok(json!({ "ok": true }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    let params = &req.params;
    let clock = state.clock.clone();
    match req.method.as_str() {
        "topics.list" => Some(with_db(state, req, |c| topics_list(c, params))),
        "topics.create" => Some(with_db(state, req, |c| topics_create(c, &clock, params))),
        "topics.update" => Some(with_db(state, req, |c| topics_update(c, params))),
        "topics.delete" => Some(with_db(state, req, |c| topics_delete(c, params))),
        _ => None,
    }
}
