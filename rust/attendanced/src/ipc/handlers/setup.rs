use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Request};
use crate::profile::{
    default_attendance_setup, normalize_key, resolve_profile, KeyAction, StatusProfile,
    PROFILE_NAMES, SETUP_ATTENDANCE_KEY,
};
use rusqlite::Connection;
use serde_json::{json, Map, Value};

#[derive(Clone, Copy)]
enum SetupSection {
    Attendance,
}

impl SetupSection {
    fn parse(s: &str) -> Option<Self> {
        match s {
            "attendance" => Some(Self::Attendance),
            _ => None,
        }
    }

    fn name(self) -> &'static str {
        match self {
            Self::Attendance => "attendance",
        }
    }

    fn key(self) -> &'static str {
        match self {
            Self::Attendance => SETUP_ATTENDANCE_KEY,
        }
    }
}

fn default_section(section: SetupSection) -> Value {
    match section {
        SetupSection::Attendance => default_attendance_setup(),
    }
}

fn as_object_mut(value: &mut Value) -> Result<&mut Map<String, Value>, String> {
    value
        .as_object_mut()
        .ok_or_else(|| "internal setup object must be a JSON object".to_string())
}

fn parse_profile_name(v: &Value, key: &str) -> Result<String, String> {
    let s = v
        .as_str()
        .ok_or_else(|| format!("{} must be string", key))?
        .trim()
        .to_ascii_lowercase();
    if !PROFILE_NAMES.contains(&s.as_str()) {
        return Err(format!(
            "{} must be one of: {}",
            key,
            PROFILE_NAMES.join(", ")
        ));
    }
    Ok(s)
}

/// `null` drops the override, `"none"` unbinds the key, anything else must be an
/// action the profile can perform.
fn parse_override(profile: &StatusProfile, key: &str, v: &Value) -> Result<Option<Value>, String> {
    if v.is_null() {
        return Ok(None);
    }
    let raw = v
        .as_str()
        .ok_or_else(|| format!("binding for {} must be string or null", key))?;
    if raw == "none" {
        return Ok(Some(Value::String(raw.to_string())));
    }
    match KeyAction::parse(raw) {
        Some(KeyAction::Mark(status)) if !profile.allows(status) => Err(format!(
            "status {} is not enabled in profile {}",
            status.as_str(),
            profile.name
        )),
        Some(action) => Ok(Some(Value::String(action.as_str().to_string()))),
        None => Err(format!("unknown action for {}: {}", key, raw)),
    }
}

fn merge_key_overrides(current: &mut Value, patch: &Value) -> Result<(), String> {
    let patch = patch
        .as_object()
        .ok_or_else(|| "keyOverrides must be an object".to_string())?;
    let obj = as_object_mut(current)?;
    let overrides = obj
        .entry("keyOverrides")
        .or_insert_with(|| json!({}));
    if !overrides.is_object() {
        *overrides = json!({});
    }
    for (profile_name, keys) in patch {
        let name = parse_profile_name(&Value::String(profile_name.clone()), "keyOverrides profile")?;
        let profile = StatusProfile::builtin(&name)
            .ok_or_else(|| format!("unknown profile: {}", name))?;
        let keys = keys
            .as_object()
            .ok_or_else(|| format!("keyOverrides.{} must be an object", name))?;
        let slot = as_object_mut(overrides)?
            .entry(name.clone())
            .or_insert_with(|| json!({}));
        if !slot.is_object() {
            *slot = json!({});
        }
        let slot = as_object_mut(slot)?;
        for (key, binding) in keys {
            let normalized = normalize_key(key)
                .ok_or_else(|| format!("unsupported key: {}", key))?;
            match parse_override(&profile, &normalized, binding)? {
                Some(v) => {
                    slot.insert(normalized, v);
                }
                None => {
                    slot.remove(&normalized);
                }
            }
        }
    }
    Ok(())
}

fn merge_section_patch(
    section: SetupSection,
    current: &mut Value,
    patch: &Map<String, Value>,
) -> Result<(), String> {
    for (k, v) in patch {
        match section {
            SetupSection::Attendance => match k.as_str() {
                "defaultProfile" => {
                    let name = parse_profile_name(v, k)?;
                    as_object_mut(current)?.insert(k.clone(), Value::String(name));
                }
                "keyOverrides" => merge_key_overrides(current, v)?,
                _ => return Err(format!("unknown attendance field: {}", k)),
            },
        }
    }
    Ok(())
}

fn load_section(conn: &Connection, section: SetupSection) -> anyhow::Result<Value> {
    let mut current = default_section(section);
    if let Some(saved) = db::settings_get_json(conn, section.key())? {
        if let Some(saved_obj) = saved.as_object() {
            // Best-effort apply: malformed historical values should not block setup UI.
            let _ = merge_section_patch(section, &mut current, saved_obj);
        }
    }
    Ok(current)
}

/// Attendance setup of the open workspace, or the defaults for a remote backend.
pub fn attendance_setup(state: &AppState) -> anyhow::Result<Value> {
    match state.db() {
        Some(conn) => load_section(conn, SetupSection::Attendance),
        None => Ok(default_attendance_setup()),
    }
}

fn handle_setup_get(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db() else {
        return err(&req.id, "no_workspace", "select a workspace first", None);
    };
    let section = match req.params.get("section").and_then(|v| v.as_str()) {
        None => SetupSection::Attendance,
        Some(raw) => match SetupSection::parse(raw) {
            Some(s) => s,
            None => return err(&req.id, "bad_params", "unknown section", None),
        },
    };
    let value = match load_section(conn, section) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    ok(&req.id, json!({ (section.name()): value }))
}

fn handle_setup_update(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(conn) = state.db() else {
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
    tracing::info!(section = section_raw, "setup updated");
    ok(&req.id, json!({ "ok": true }))
}

fn handle_attendance_profiles(state: &mut AppState, req: &Request) -> serde_json::Value {
    let setup = match attendance_setup(state) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let mut profiles = Vec::with_capacity(PROFILE_NAMES.len());
    for name in PROFILE_NAMES {
        match resolve_profile(&setup, Some(name)) {
            Ok(p) => profiles.push(p),
            Err(msg) => return err(&req.id, "bad_params", msg, None),
        }
    }
    ok(
        &req.id,
        json!({
            "defaultProfile": setup.get("defaultProfile").cloned().unwrap_or(Value::Null),
            "profiles": profiles
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "setup.get" => Some(handle_setup_get(state, req)),
        "setup.update" => Some(handle_setup_update(state, req)),
        "attendance.profiles" => Some(handle_attendance_profiles(state, req)),
        _ => None,
    }
}
