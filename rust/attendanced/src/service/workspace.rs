use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

use super::{
    AttendanceRecord, AttendanceService, BulkCreate, BulkResult, ClassAttendance, CreateRecord,
    RecordPatch, RosterQuery, StudentRow,
};
use crate::error::ServiceError;
use crate::profile::AttendanceStatus;

/// Attendance service backed by the workspace SQLite database.
pub struct WorkspaceService {
    conn: Connection,
}

fn parse_status(raw: &str) -> Result<AttendanceStatus, ServiceError> {
    AttendanceStatus::parse(raw)
        .ok_or_else(|| ServiceError::Malformed(format!("unknown stored status: {}", raw)))
}

fn is_unique_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _)
            if f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_UNIQUE
                || f.extended_code == rusqlite::ffi::SQLITE_CONSTRAINT_PRIMARYKEY
    )
}

fn conflict(student_id: &str) -> ServiceError {
    ServiceError::Rejected {
        status: 409,
        message: format!("attendance already recorded for student {}", student_id),
    }
}

impl WorkspaceService {
    pub fn new(conn: Connection) -> Self {
        Self { conn }
    }

    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    fn class_exists(&self, class_id: &str) -> Result<bool, ServiceError> {
        Ok(self
            .conn
            .query_row("SELECT 1 FROM classes WHERE id = ?", [class_id], |r| {
                r.get::<_, i64>(0)
            })
            .optional()?
            .is_some())
    }

    fn student_in_class(&self, class_id: &str, student_id: &str) -> Result<bool, ServiceError> {
        Ok(self
            .conn
            .query_row(
                "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                (class_id, student_id),
                |r| r.get::<_, i64>(0),
            )
            .optional()?
            .is_some())
    }

    fn record_by_id(&self, record_id: &str) -> Result<Option<AttendanceRecord>, ServiceError> {
        let row: Option<(String, String, String, String, String)> = self
            .conn
            .query_row(
                "SELECT id, student_id, period_id, status, remark
                 FROM attendance_records WHERE id = ?",
                [record_id],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?, r.get(3)?, r.get(4)?)),
            )
            .optional()?;
        row.map(|(id, student_id, period_id, status, remark)| {
            Ok(AttendanceRecord {
                id,
                student_id,
                period_id,
                status: parse_status(&status)?,
                remark,
            })
        })
        .transpose()
    }
}

impl AttendanceService for WorkspaceService {
    fn kind(&self) -> &'static str {
        "workspace"
    }

    fn class_attendance(&self, query: &RosterQuery) -> Result<ClassAttendance, ServiceError> {
        if !self.class_exists(&query.class_id)? {
            return Err(ServiceError::NotFound("class not found".into()));
        }

        let mut stmt = self.conn.prepare(
            "SELECT id, last_name, first_name, roll_number
             FROM students
             WHERE class_id = ? AND active = 1
             ORDER BY sort_order",
        )?;
        let students = stmt
            .query_map([&query.class_id], |r| {
                let last: String = r.get(1)?;
                let first: String = r.get(2)?;
                Ok(StudentRow {
                    id: r.get(0)?,
                    display_name: format!("{}, {}", last, first),
                    roll_number: r.get(3)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut stmt = self.conn.prepare(
            "SELECT id, student_id, period_id, status, remark
             FROM attendance_records
             WHERE class_id = ? AND date = ? AND session_year_id = ?",
        )?;
        let rows = stmt
            .query_map(
                (&query.class_id, &query.date, &query.session_year_id),
                |r| {
                    Ok((
                        r.get::<_, String>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )?
            .collect::<Result<Vec<_>, _>>()?;
        let mut records = Vec::with_capacity(rows.len());
        for (id, student_id, period_id, status, remark) in rows {
            records.push(AttendanceRecord {
                id,
                student_id,
                period_id,
                status: parse_status(&status)?,
                remark,
            });
        }

        Ok(ClassAttendance { students, records })
    }

    fn create_record(&self, req: &CreateRecord) -> Result<AttendanceRecord, ServiceError> {
        if !self.student_in_class(&req.class_id, &req.student_id)? {
            return Err(ServiceError::NotFound("student not found".into()));
        }
        let id = Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        self.conn
            .execute(
                "INSERT INTO attendance_records(
                   id, class_id, student_id, session_year_id, date, period_id, status, remark, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    &req.class_id,
                    &req.student_id,
                    &req.session_year_id,
                    &req.date,
                    &req.period_id,
                    req.status.as_str(),
                    &req.remark,
                    &now,
                ),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    conflict(&req.student_id)
                } else {
                    ServiceError::Storage(e)
                }
            })?;
        Ok(AttendanceRecord {
            id,
            student_id: req.student_id.clone(),
            period_id: req.period_id.clone(),
            status: req.status,
            remark: req.remark.clone(),
        })
    }

    fn update_record(
        &self,
        record_id: &str,
        patch: &RecordPatch,
    ) -> Result<AttendanceRecord, ServiceError> {
        let now = Utc::now().to_rfc3339();
        let changed = self.conn.execute(
            "UPDATE attendance_records
             SET status = COALESCE(?, status),
                 remark = COALESCE(?, remark),
                 updated_at = ?
             WHERE id = ?",
            (
                patch.status.map(AttendanceStatus::as_str),
                patch.remark.as_deref(),
                &now,
                record_id,
            ),
        )?;
        if changed == 0 {
            return Err(ServiceError::NotFound("attendance record not found".into()));
        }
        self.record_by_id(record_id)?
            .ok_or_else(|| ServiceError::NotFound("attendance record not found".into()))
    }

    fn bulk_create(&self, req: &BulkCreate) -> Result<BulkResult, ServiceError> {
        let now = Utc::now().to_rfc3339();
        let tx = self.conn.unchecked_transaction()?;
        for entry in &req.records {
            let exists = tx
                .query_row(
                    "SELECT 1 FROM students WHERE class_id = ? AND id = ?",
                    (&req.class_id, &entry.student_id),
                    |r| r.get::<_, i64>(0),
                )
                .optional()?
                .is_some();
            if !exists {
                return Err(ServiceError::NotFound(format!(
                    "student not found: {}",
                    entry.student_id
                )));
            }
            tx.execute(
                "INSERT INTO attendance_records(
                   id, class_id, student_id, session_year_id, date, period_id, status, remark, updated_at
                 ) VALUES(?, ?, ?, ?, ?, ?, ?, '', ?)",
                (
                    Uuid::new_v4().to_string(),
                    &req.class_id,
                    &entry.student_id,
                    &req.session_year_id,
                    &req.date,
                    &req.period_id,
                    entry.status.as_str(),
                    &now,
                ),
            )
            .map_err(|e| {
                if is_unique_violation(&e) {
                    conflict(&entry.student_id)
                } else {
                    ServiceError::Storage(e)
                }
            })?;
        }
        tx.commit()?;
        Ok(BulkResult {
            created: req.records.len(),
        })
    }
}
