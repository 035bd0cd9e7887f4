use std::collections::{HashMap, HashSet};

use serde::Serialize;

use crate::error::LoadError;
use crate::profile::AttendanceStatus;
use crate::service::ClassAttendance;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SaveState {
    Idle,
    Saving,
    Committed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RosterEntry {
    pub student_id: String,
    pub display_name: String,
    pub roll_number: String,
    pub status: Option<AttendanceStatus>,
    pub remark: String,
    pub record_id: Option<String>,
    pub save_state: SaveState,
}

impl RosterEntry {
    pub fn is_saving(&self) -> bool {
        self.save_state == SaveState::Saving
    }

    pub fn is_marked(&self) -> bool {
        self.status.is_some()
    }
}

/// Non-numeric roll numbers sort as 0.
pub fn roll_sort_key(roll: &str) -> i64 {
    roll.trim().parse::<i64>().unwrap_or(0)
}

/// Merges the class list with the period's stored records into a sorted roster.
/// Any inconsistency rejects the whole payload.
pub fn build_roster(
    payload: ClassAttendance,
    period_id: &str,
) -> Result<Vec<RosterEntry>, LoadError> {
    let mut seen: HashSet<&str> = HashSet::new();
    for s in &payload.students {
        if s.id.trim().is_empty() {
            return Err(LoadError::Malformed("student with empty id".into()));
        }
        if !seen.insert(s.id.as_str()) {
            return Err(LoadError::Malformed(format!(
                "duplicate student id: {}",
                s.id
            )));
        }
    }

    let mut by_student = HashMap::new();
    for rec in payload.records.iter().filter(|r| r.period_id == period_id) {
        if rec.id.trim().is_empty() {
            return Err(LoadError::Malformed("attendance record with empty id".into()));
        }
        if !seen.contains(rec.student_id.as_str()) {
            tracing::debug!(student_id = %rec.student_id, "ignoring record for student outside class");
            continue;
        }
        if by_student.insert(rec.student_id.as_str(), rec).is_some() {
            return Err(LoadError::Malformed(format!(
                "two records for student {} in period {}",
                rec.student_id, period_id
            )));
        }
    }

    let mut entries: Vec<RosterEntry> = payload
        .students
        .iter()
        .map(|s| {
            let rec = by_student.get(s.id.as_str());
            RosterEntry {
                student_id: s.id.clone(),
                display_name: s.display_name.clone(),
                roll_number: s.roll_number.clone(),
                status: rec.map(|r| r.status),
                remark: rec.map(|r| r.remark.clone()).unwrap_or_default(),
                record_id: rec.map(|r| r.id.clone()),
                save_state: SaveState::Idle,
            }
        })
        .collect();
    entries.sort_by_key(|e| roll_sort_key(&e.roll_number));
    Ok(entries)
}
