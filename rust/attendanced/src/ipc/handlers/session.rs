use crate::error::{BulkWriteError, LoadError, WriteError};
use crate::ipc::error::{err, ok};
use crate::ipc::handlers::setup::attendance_setup;
use crate::ipc::types::{AppState, Request};
use crate::profile::{resolve_profile, AttendanceStatus};
use crate::service::AttendanceService;
use crate::session::{
    BulkOutcome, KeyEvent, KeyOutcome, KeyTarget, MarkOutcome, RemarkSync, Scope, Session,
};
use chrono::NaiveDate;
use serde_json::{json, Value};

struct HandlerErr {
    code: &'static str,
    message: String,
    details: Option<Value>,
}

impl HandlerErr {
    fn response(self, id: &str) -> Value {
        err(id, self.code, self.message, self.details)
    }

    fn bad_params(message: impl Into<String>) -> Self {
        Self {
            code: "bad_params",
            message: message.into(),
            details: None,
        }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self {
            code: "not_found",
            message: message.into(),
            details: None,
        }
    }

    /// Failed writes still changed the roster (save state, notices); ship it along.
    fn with_session(mut self, session: &Session) -> Self {
        self.details = Some(json!({ "session": snapshot_json(session) }));
        self
    }
}

impl From<LoadError> for HandlerErr {
    fn from(e: LoadError) -> Self {
        Self {
            code: "load_failed",
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<WriteError> for HandlerErr {
    fn from(e: WriteError) -> Self {
        let code = match &e {
            WriteError::Busy(_) => "busy",
            WriteError::StatusNotEnabled { .. } => "status_not_enabled",
            WriteError::Service(_) => "write_failed",
        };
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

impl From<BulkWriteError> for HandlerErr {
    fn from(e: BulkWriteError) -> Self {
        let code = match &e {
            BulkWriteError::StatusNotEnabled { .. } => "status_not_enabled",
            BulkWriteError::Service(_) => "bulk_write_failed",
            BulkWriteError::Reload(_) => "load_failed",
        };
        Self {
            code,
            message: e.to_string(),
            details: None,
        }
    }
}

fn snapshot_json(session: &Session) -> Value {
    serde_json::to_value(session.snapshot()).unwrap_or(Value::Null)
}

fn get_required_str<'a>(params: &'a Value, key: &str) -> Result<&'a str, HandlerErr> {
    params
        .get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| HandlerErr::bad_params(format!("missing {}", key)))
}

fn get_status(params: &Value) -> Result<AttendanceStatus, HandlerErr> {
    let raw = get_required_str(params, "status")?;
    AttendanceStatus::parse(raw).ok_or_else(|| HandlerErr::bad_params(format!("unknown status: {}", raw)))
}

fn parse_scope(params: &Value) -> Result<Scope, HandlerErr> {
    let date_raw = get_required_str(params, "date")?;
    let date = NaiveDate::parse_from_str(date_raw, "%Y-%m-%d")
        .map_err(|_| HandlerErr::bad_params("date must be YYYY-MM-DD"))?;
    Ok(Scope {
        class_id: get_required_str(params, "classId")?.to_string(),
        date,
        period_id: get_required_str(params, "periodId")?.to_string(),
        session_year_id: get_required_str(params, "sessionYearId")?.to_string(),
    })
}

fn mark_outcome_json(outcome: &MarkOutcome) -> Value {
    match outcome {
        MarkOutcome::NotFound => json!({ "outcome": "notFound" }),
        MarkOutcome::Committed { index, record_id } => json!({
            "outcome": "committed",
            "index": index,
            "recordId": record_id
        }),
        MarkOutcome::Stale => json!({ "outcome": "stale" }),
    }
}

fn handle_session_open(state: &mut AppState, req: &Request) -> Value {
    let scope = match parse_scope(&req.params) {
        Ok(s) => s,
        Err(e) => return e.response(&req.id),
    };
    let setup = match attendance_setup(state) {
        Ok(v) => v,
        Err(e) => return err(&req.id, "db_query_failed", e.to_string(), None),
    };
    let requested = req.params.get("profile").and_then(|v| v.as_str());
    let profile = match resolve_profile(&setup, requested) {
        Ok(p) => p,
        Err(msg) => return err(&req.id, "bad_params", msg, None),
    };
    let Some(backend) = state.backend.as_ref() else {
        return err(&req.id, "no_backend", "select a workspace or remote service first", None);
    };
    let service = backend.service();

    // Same screen variant: keep the session and let the scope check decide on a reload.
    let reuse = state
        .session
        .as_ref()
        .map(|s| *s.profile() == profile)
        .unwrap_or(false);
    if !reuse {
        state.session = Some(Session::new(scope.clone(), profile));
    }
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    let result = if reuse {
        session.set_scope(service, scope).map(|_| ())
    } else {
        session.load(service)
    };
    match result {
        Ok(()) => ok(&req.id, json!({ "session": snapshot_json(session) })),
        Err(e) => HandlerErr::from(e).with_session(session).response(&req.id),
    }
}

fn with_session<F>(state: &mut AppState, req: &Request, op: F) -> Value
where
    F: FnOnce(&mut Session, &dyn AttendanceService, &Value) -> Result<Value, HandlerErr>,
{
    let Some(backend) = state.backend.as_ref() else {
        return err(&req.id, "no_backend", "select a workspace or remote service first", None);
    };
    let Some(session) = state.session.as_mut() else {
        return err(&req.id, "no_session", "open a session first", None);
    };
    match op(session, backend.service(), &req.params) {
        Ok(result) => ok(&req.id, result),
        Err(e) => e.response(&req.id),
    }
}

fn session_get(session: &mut Session, _: &dyn AttendanceService, _: &Value) -> Result<Value, HandlerErr> {
    Ok(json!({ "session": snapshot_json(session) }))
}

fn session_reload(
    session: &mut Session,
    service: &dyn AttendanceService,
    _: &Value,
) -> Result<Value, HandlerErr> {
    session
        .load(service)
        .map_err(|e| HandlerErr::from(e).with_session(session))?;
    Ok(json!({ "session": snapshot_json(session) }))
}

fn session_mark(
    session: &mut Session,
    service: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let status = get_status(params)?;
    let outcome = session
        .mark(service, student_id, status)
        .map_err(|e| HandlerErr::from(e).with_session(session))?;
    let mut result = mark_outcome_json(&outcome);
    result["session"] = snapshot_json(session);
    Ok(result)
}

fn session_mark_all_remaining(
    session: &mut Session,
    service: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let status = get_status(params)?;
    let outcome = session
        .mark_all_remaining(service, status)
        .map_err(|e| HandlerErr::from(e).with_session(session))?;
    let mut result = match outcome {
        BulkOutcome::NothingToMark => json!({ "outcome": "nothingToMark", "created": 0 }),
        BulkOutcome::Applied { created } => json!({ "outcome": "applied", "created": created }),
    };
    result["session"] = snapshot_json(session);
    Ok(result)
}

fn session_key(
    session: &mut Session,
    service: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let key = params
        .get("key")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("missing key"))?;
    let target = match params.get("target").and_then(|v| v.as_str()) {
        None => KeyTarget::Other,
        Some(raw) => KeyTarget::parse(raw)
            .ok_or_else(|| HandlerErr::bad_params("target must be textInput, textArea or other"))?,
    };
    let event = KeyEvent {
        key: key.to_string(),
        target,
    };
    let outcome = session
        .handle_key(service, &event)
        .map_err(|e| HandlerErr::from(e).with_session(session))?;
    let mut result = match &outcome {
        KeyOutcome::Ignored => json!({ "outcome": "ignored" }),
        KeyOutcome::CursorMoved { index } => json!({ "outcome": "cursorMoved", "index": index }),
        KeyOutcome::Marked(mark) => {
            let mut v = mark_outcome_json(mark);
            v["marked"] = Value::Bool(true);
            v
        }
    };
    result["session"] = snapshot_json(session);
    Ok(result)
}

fn session_focus(session: &mut Session, _: &dyn AttendanceService, params: &Value) -> Result<Value, HandlerErr> {
    let index = params
        .get("index")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("index must be a non-negative integer"))?;
    session.focus(usize::try_from(index).unwrap_or(usize::MAX));
    Ok(json!({ "cursor": session.cursor() }))
}

fn session_move_cursor(
    session: &mut Session,
    _: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let delta = params
        .get("delta")
        .and_then(|v| v.as_i64())
        .ok_or_else(|| HandlerErr::bad_params("delta must be an integer"))?;
    session.move_cursor(delta);
    Ok(json!({ "cursor": session.cursor() }))
}

fn session_set_remark(
    session: &mut Session,
    _: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let remark = params
        .get("remark")
        .and_then(|v| v.as_str())
        .ok_or_else(|| HandlerErr::bad_params("remark must be a string"))?;
    if !session.set_remark(student_id, remark) {
        return Err(HandlerErr::not_found("student not in roster"));
    }
    Ok(json!({ "ok": true }))
}

fn session_commit_remark(
    session: &mut Session,
    service: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let student_id = get_required_str(params, "studentId")?;
    let sync = match session.commit_remark(service, student_id) {
        RemarkSync::NotFound => return Err(HandlerErr::not_found("student not in roster")),
        RemarkSync::LocalOnly => "localOnly",
        RemarkSync::Sent => "sent",
        RemarkSync::Failed => "failed",
    };
    Ok(json!({ "sync": sync }))
}

fn session_dismiss_notice(
    session: &mut Session,
    _: &dyn AttendanceService,
    params: &Value,
) -> Result<Value, HandlerErr> {
    let id = params
        .get("noticeId")
        .and_then(|v| v.as_u64())
        .ok_or_else(|| HandlerErr::bad_params("missing noticeId"))?;
    Ok(json!({ "dismissed": session.dismiss_notice(id) }))
}

fn handle_session_close(state: &mut AppState, req: &Request) -> Value {
    let closed = state.session.take().is_some();
    ok(&req.id, json!({ "closed": closed }))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<Value> {
    let resp = match req.method.as_str() {
        "session.open" => handle_session_open(state, req),
        "session.close" => handle_session_close(state, req),
        "session.get" => with_session(state, req, session_get),
        "session.reload" => with_session(state, req, session_reload),
        "session.mark" => with_session(state, req, session_mark),
        "session.markAllRemaining" => with_session(state, req, session_mark_all_remaining),
        "session.key" => with_session(state, req, session_key),
        "session.focus" => with_session(state, req, session_focus),
        "session.moveCursor" => with_session(state, req, session_move_cursor),
        "session.setRemark" => with_session(state, req, session_set_remark),
        "session.commitRemark" => with_session(state, req, session_commit_remark),
        "session.dismissNotice" => with_session(state, req, session_dismiss_notice),
        _ => return None,
    };
    Some(resp)
}
