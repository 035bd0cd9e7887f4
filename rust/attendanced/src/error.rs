use thiserror::Error;

use crate::profile::AttendanceStatus;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("transport error: {0}")]
    Transport(String),
    #[error("service rejected request ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("not found: {0}")]
    NotFound(String),
    #[error("malformed payload: {0}")]
    Malformed(String),
    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl From<reqwest::Error> for ServiceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            Self::Malformed(e.to_string())
        } else {
            Self::Transport(e.to_string())
        }
    }
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to load roster: {0}")]
    Service(#[from] ServiceError),
    #[error("roster payload rejected: {0}")]
    Malformed(String),
}

#[derive(Debug, Error)]
pub enum WriteError {
    #[error("a save is already in flight for student {0}")]
    Busy(String),
    #[error("status {status} is not enabled in profile {profile}")]
    StatusNotEnabled {
        status: &'static str,
        profile: String,
    },
    #[error("failed to save attendance: {0}")]
    Service(#[from] ServiceError),
}

impl WriteError {
    pub fn status_not_enabled(status: AttendanceStatus, profile: &str) -> Self {
        Self::StatusNotEnabled {
            status: status.as_str(),
            profile: profile.to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum BulkWriteError {
    #[error("status {status} is not enabled in profile {profile}")]
    StatusNotEnabled {
        status: &'static str,
        profile: String,
    },
    #[error("bulk save failed: {0}")]
    Service(#[from] ServiceError),
    #[error("bulk save stored but the roster could not be reloaded: {0}")]
    Reload(#[from] LoadError),
}
