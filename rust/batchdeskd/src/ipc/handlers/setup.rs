use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use serde_json::{json, Map, Value};
use tracing::info;

pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

#[derive(Clone, Copy, Debug)]
enum SetupSection {
    Institute,
    CheckIn,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "institute" => Some(Self::Institute),
            "checkIn" => Some(Self::CheckIn),
            _ => None,
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Institute => "setup.institute",
            Self::CheckIn => "setup.checkIn",
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Institute => json!({
            "name": "Training Institute"
        }),
        SetupSection::CheckIn => json!({
            "baseUrl": DEFAULT_BASE_URL
        }),
    }
}

fn parse_string_max(v: &Value, key: &str, max: usize) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be a string", key))?
        .trim()
        .to_string();
    if s.chars().count() > max {
        return Err(format!("{} must be at most {} characters", key, max));
    }
    Ok(s)
}

fn parse_base_url(v: &Value) -> Result<String, String> {
    let s = parse_string_max(v, "baseUrl", 300)?;
    if !(s.starts_with("http://") || s.starts_with("https://")) {
        return Err("baseUrl must start with http:// or https://".to_string());
    }
    Ok(s.trim_end_matches('/').to_string())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    let obj = current
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())?;
    for (k, v) in patch {
        match section {
            SetupSection::Institute => match k.as_str() {
                "name" => {
                    let name = parse_string_max(v, k, 120)?;
                    if name.is_empty() {
                        return Err("name must not be empty".to_string());
                    }
                    obj.insert(k.clone(), Value::String(name));
                }
                _ => return Err(format!("unknown institute field: {}", k)),
            },
            SetupSection::CheckIn => match k.as_str() {
                "baseUrl" => {
                    obj.insert(k.clone(), Value::String(parse_base_url(v)?));
                }
                _ => return Err(format!("unknown checkIn field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &rusqlite::Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Malformed historical values fall back to defaults.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Public base URL that check-in links are built on.
pub fn check_in_base_url(conn: &rusqlite::Connection) -> anyhow::Result<String> {
    let section = load_section(conn, SetupSection::CheckIn)?;
    Ok(section
        .get("baseUrl")
        .and_then(|v| v.as_str())
        .unwrap_or(DEFAULT_BASE_URL)
        .to_string())
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let institute = match load_section(conn, SetupSection::Institute) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let check_in = match load_section(conn, SetupSection::CheckIn) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };

    ok(
        &req.id,
        json!({
            "institute": institute,
            "checkIn": check_in
        }),
    )
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db.as_ref() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let Some(section_raw) = req.params.get("section").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing section", None);
    };
    let Some(section) = SetupSection::parse(section_raw) else {
        return err(&req.id, "bad_params", "unknown section", None);
    };
    let Some(patch_obj) = req.params.get("patch").and_then(|v| v.as_object()) else {
        return err(&req.id, "bad_params", "patch must be an object", None);
    };

    let mut current = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    if let Err(msg) = merge_section_patch(section, &mut current, patch_obj) {
        return err(&req.id, "bad_params", msg, None);
    }
    if let Err(e) = db::settings_set_json(conn, section.key(), &current) {
        return err(&req.id, "db_update_failed", e.to_string(), None);
    }
    info!(section = section.key(), "settings updated");
    ok(&req.id, json!({ "ok": true, "section": current }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        _ => None,
    }
}
