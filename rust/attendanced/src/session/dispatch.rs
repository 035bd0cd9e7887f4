use super::roster::SaveState;
use super::{NoticeLevel, Session};
use crate::error::{BulkWriteError, ServiceError, WriteError};
use crate::profile::AttendanceStatus;
use crate::service::{
    AttendanceRecord, AttendanceService, BulkCreate, BulkEntry, CreateRecord, RecordPatch,
};

#[derive(Debug, Clone, PartialEq, Eq)]
enum WriteCall {
    Create(CreateRecord),
    Update { record_id: String, patch: RecordPatch },
}

/// A mark that has been applied optimistically and still awaits the backend.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingWrite {
    session_id: u64,
    generation: u64,
    student_id: String,
    call: WriteCall,
}

impl PendingWrite {
    #[cfg(test)]
    pub fn student_id(&self) -> &str {
        &self.student_id
    }

    #[cfg(test)]
    pub fn is_create(&self) -> bool {
        matches!(self.call, WriteCall::Create(_))
    }

    pub fn send(&self, service: &dyn AttendanceService) -> Result<AttendanceRecord, ServiceError> {
        match &self.call {
            WriteCall::Create(req) => service.create_record(req),
            WriteCall::Update { record_id, patch } => service.update_record(record_id, patch),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MarkOutcome {
    NotFound,
    Committed { index: usize, record_id: String },
    /// The roster was reloaded while the write was in flight; the response was dropped.
    Stale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BulkOutcome {
    NothingToMark,
    Applied { created: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemarkSync {
    NotFound,
    /// No stored record yet; the remark goes out with the first mark.
    LocalOnly,
    Sent,
    Failed,
}

impl Session {
    /// Validates the mark, flips the entry to `Saving` and returns the call to issue.
    /// `Ok(None)` means the student is not on the current roster.
    pub fn begin_mark(
        &mut self,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<Option<PendingWrite>, WriteError> {
        let Some(index) = self.position(student_id) else {
            return Ok(None);
        };
        if !self.profile.allows(status) {
            return Err(WriteError::status_not_enabled(status, &self.profile.name));
        }
        let scope = &self.scope;
        let entry = &mut self.entries[index];
        if entry.is_saving() {
            tracing::debug!(%student_id, "mark rejected while a save is in flight");
            return Err(WriteError::Busy(student_id.to_string()));
        }
        entry.save_state = SaveState::Saving;

        let call = match &entry.record_id {
            None => WriteCall::Create(CreateRecord {
                student_id: entry.student_id.clone(),
                class_id: scope.class_id.clone(),
                session_year_id: scope.session_year_id.clone(),
                date: scope.date_key(),
                status,
                period_id: scope.period_id.clone(),
                remark: entry.remark.clone(),
            }),
            Some(record_id) => WriteCall::Update {
                record_id: record_id.clone(),
                patch: RecordPatch {
                    status: Some(status),
                    remark: Some(entry.remark.clone()),
                },
            },
        };
        tracing::debug!(
            %student_id,
            status = status.as_str(),
            create = matches!(call, WriteCall::Create(_)),
            "dispatching mark"
        );
        Ok(Some(PendingWrite {
            session_id: self.id,
            generation: self.generation,
            student_id: student_id.to_string(),
            call,
        }))
    }

    /// Reconciles a backend response with the roster it was issued against.
    pub fn complete_mark(
        &mut self,
        pending: PendingWrite,
        result: Result<AttendanceRecord, ServiceError>,
    ) -> Result<MarkOutcome, WriteError> {
        if pending.session_id != self.id || pending.generation != self.generation {
            tracing::warn!(
                student_id = %pending.student_id,
                issued_session = pending.session_id,
                issued = pending.generation,
                current = self.generation,
                ok = result.is_ok(),
                "discarding response for a replaced roster"
            );
            return Ok(MarkOutcome::Stale);
        }
        let Some(index) = self.position(&pending.student_id) else {
            return Ok(MarkOutcome::NotFound);
        };

        let result = result.and_then(|rec| {
            if rec.student_id == pending.student_id {
                Ok(rec)
            } else {
                Err(ServiceError::Malformed(format!(
                    "record {} belongs to student {}, expected {}",
                    rec.id, rec.student_id, pending.student_id
                )))
            }
        });

        match result {
            Ok(rec) => {
                let entry = &mut self.entries[index];
                entry.status = Some(rec.status);
                if entry.record_id.is_none() {
                    entry.record_id = Some(rec.id.clone());
                }
                entry.save_state = SaveState::Committed;
                let record_id = entry.record_id.clone().unwrap_or(rec.id);
                self.cursor.advance_after_mark(index, &self.entries);
                Ok(MarkOutcome::Committed { index, record_id })
            }
            Err(e) => {
                tracing::warn!(student_id = %pending.student_id, error = %e, "mark failed");
                self.entries[index].save_state = SaveState::Failed;
                let name = self.entries[index].display_name.clone();
                self.push_notice(
                    NoticeLevel::Error,
                    format!("Could not save attendance for {}: {}", name, e),
                );
                Err(WriteError::Service(e))
            }
        }
    }

    pub fn mark(
        &mut self,
        service: &dyn AttendanceService,
        student_id: &str,
        status: AttendanceStatus,
    ) -> Result<MarkOutcome, WriteError> {
        let Some(pending) = self.begin_mark(student_id, status)? else {
            return Ok(MarkOutcome::NotFound);
        };
        let result = pending.send(service);
        self.complete_mark(pending, result)
    }

    pub fn set_remark(&mut self, student_id: &str, remark: &str) -> bool {
        match self.entries.iter_mut().find(|e| e.student_id == student_id) {
            Some(entry) => {
                entry.remark = remark.to_string();
                true
            }
            None => false,
        }
    }

    /// Sends the remark of an already stored record. Failures are logged, never surfaced.
    pub fn commit_remark(&self, service: &dyn AttendanceService, student_id: &str) -> RemarkSync {
        let Some(entry) = self.entry(student_id) else {
            return RemarkSync::NotFound;
        };
        let Some(record_id) = entry.record_id.clone() else {
            return RemarkSync::LocalOnly;
        };
        let patch = RecordPatch {
            status: None,
            remark: Some(entry.remark.clone()),
        };
        match service.update_record(&record_id, &patch) {
            Ok(_) => RemarkSync::Sent,
            Err(e) => {
                tracing::warn!(%student_id, %record_id, error = %e, "remark save failed");
                RemarkSync::Failed
            }
        }
    }

    /// Marks every unmarked, idle entry with one batched call, then reloads the roster
    /// to pick up the ids the backend assigned.
    pub fn mark_all_remaining(
        &mut self,
        service: &dyn AttendanceService,
        status: AttendanceStatus,
    ) -> Result<BulkOutcome, BulkWriteError> {
        if !self.profile.allows(status) {
            return Err(BulkWriteError::StatusNotEnabled {
                status: status.as_str(),
                profile: self.profile.name.clone(),
            });
        }
        let records: Vec<BulkEntry> = self
            .entries
            .iter()
            .filter(|e| !e.is_marked() && !e.is_saving())
            .map(|e| BulkEntry {
                student_id: e.student_id.clone(),
                status,
            })
            .collect();
        if records.is_empty() {
            self.push_notice(NoticeLevel::Info, "Every student is already marked.");
            return Ok(BulkOutcome::NothingToMark);
        }

        let req = BulkCreate {
            class_id: self.scope.class_id.clone(),
            session_year_id: self.scope.session_year_id.clone(),
            date: self.scope.date_key(),
            period_id: self.scope.period_id.clone(),
            records,
        };
        tracing::debug!(count = req.records.len(), status = status.as_str(), "bulk mark");
        let result = match service.bulk_create(&req) {
            Ok(result) => result,
            Err(e) => {
                tracing::warn!(error = %e, "bulk mark failed");
                self.push_notice(
                    NoticeLevel::Error,
                    format!("Could not mark the remaining students: {}", e),
                );
                return Err(BulkWriteError::Service(e));
            }
        };
        self.load(service)?;
        Ok(BulkOutcome::Applied {
            created: result.created,
        })
    }
}
