//! Boundary to the attendance backend.
//!
//! Every payload crossing this boundary is an explicit typed schema; anything that
//! does not decode into one of these structs is reported as
//! [`ServiceError::Malformed`] by the implementation that received it.

mod remote;
mod workspace;

pub use remote::RemoteService;
pub use workspace::WorkspaceService;

use serde::{Deserialize, Serialize};

use crate::error::ServiceError;
use crate::profile::AttendanceStatus;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterQuery {
    pub class_id: String,
    pub date: String,
    pub session_year_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRow {
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub roll_number: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AttendanceRecord {
    pub id: String,
    pub student_id: String,
    pub period_id: String,
    pub status: AttendanceStatus,
    #[serde(default)]
    pub remark: String,
}

/// Students of a class plus every record stored for the date, across all periods.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClassAttendance {
    pub students: Vec<StudentRow>,
    #[serde(default)]
    pub records: Vec<AttendanceRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRecord {
    pub student_id: String,
    pub class_id: String,
    pub session_year_id: String,
    pub date: String,
    pub status: AttendanceStatus,
    pub period_id: String,
    pub remark: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordPatch {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<AttendanceStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remark: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkEntry {
    pub student_id: String,
    pub status: AttendanceStatus,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCreate {
    pub class_id: String,
    pub session_year_id: String,
    pub date: String,
    pub period_id: String,
    pub records: Vec<BulkEntry>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkResult {
    pub created: usize,
}

pub trait AttendanceService {
    fn kind(&self) -> &'static str;

    fn class_attendance(&self, query: &RosterQuery) -> Result<ClassAttendance, ServiceError>;

    fn create_record(&self, req: &CreateRecord) -> Result<AttendanceRecord, ServiceError>;

    fn update_record(
        &self,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<AttendanceRecord, ServiceError>;

    fn bulk_create(&self, req: &BulkCreate) -> Result<BulkResult, ServiceError>;
}
