use crate::db;
use crate::ipc::error::{err, ok};
use crate::ipc::types::{AppState, Backend, Request};
use crate::service::{RemoteService, WorkspaceService};
use serde_json::json;
use std::path::PathBuf;

fn handle_health(state: &mut AppState, req: &Request) -> serde_json::Value {
    ok(
        &req.id,
        json!({
            "version": env!("CARGO_PKG_VERSION"),
            "workspacePath": state.workspace.as_ref().map(|p| p.to_string_lossy().to_string()),
            "backend": state.backend.as_ref().map(|b| b.service().kind()),
            "sessionOpen": state.session.is_some()
        }),
    )
}

fn handle_workspace_select(state: &mut AppState, req: &Request) -> serde_json::Value {
    let p = req
        .params
        .get("path")
        .and_then(|v| v.as_str())
        .map(PathBuf::from);
    let Some(path) = p else {
        return err(&req.id, "bad_params", "missing params.path", None);
    };

    match db::open_db(&path) {
        Ok(conn) => {
            tracing::info!(path = %path.display(), "workspace opened");
            state.workspace = Some(path.clone());
            state.backend = Some(Backend::Workspace(WorkspaceService::new(conn)));
            // A roster loaded from another backend must not receive writes here.
            state.session = None;
            ok(&req.id, json!({ "workspacePath": path.to_string_lossy() }))
        }
        Err(e) => err(&req.id, "db_open_failed", format!("{e:?}"), None),
    }
}

fn handle_backend_connect_remote(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(base_url) = req.params.get("baseUrl").and_then(|v| v.as_str()) else {
        return err(&req.id, "bad_params", "missing baseUrl", None);
    };
    let token = req
        .params
        .get("token")
        .and_then(|v| v.as_str())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty());

    match RemoteService::new(base_url, token) {
        Ok(svc) => {
            let url = svc.base_url().to_string();
            tracing::info!(base_url = %url, "remote attendance service selected");
            state.workspace = None;
            state.backend = Some(Backend::Remote(svc));
            state.session = None;
            ok(&req.id, json!({ "baseUrl": url }))
        }
        Err(e) => err(&req.id, "bad_params", format!("{e:#}"), None),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "health" => Some(handle_health(state, req)),
        "workspace.select" => Some(handle_workspace_select(state, req)),
        "backend.connectRemote" => Some(handle_backend_connect_remote(state, req)),
        _ => None,
    }
}
