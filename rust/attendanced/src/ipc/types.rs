use std::path::PathBuf;

use rusqlite::Connection;
use serde::Deserialize;

use crate::service::{AttendanceService, RemoteService, WorkspaceService};
use crate::session::Session;

#[derive(Debug, Deserialize, Clone)]
pub struct Request {
    pub id: String,
    pub method: String,
    #[serde(default)]
    pub params: serde_json::Value,
}

pub enum Backend {
    Workspace(WorkspaceService),
    Remote(RemoteService),
}

impl Backend {
    pub fn service(&self) -> &dyn AttendanceService {
        match self {
            Self::Workspace(svc) => svc,
            Self::Remote(svc) => svc,
        }
    }
}

#[derive(Default)]
pub struct AppState {
    pub workspace: Option<PathBuf>,
    pub backend: Option<Backend>,
    pub session: Option<Session>,
}

impl AppState {
    /// Workspace database, when the workspace service is the live backend.
    pub fn db(&self) -> Option<&Connection> {
        match &self.backend {
            Some(Backend::Workspace(svc)) => Some(svc.conn()),
            _ => None,
        }
    }
}
