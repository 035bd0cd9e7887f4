//! Attendance marking session for one (class, date, period, session year).
//!
//! The session owns the roster, the focus cursor and the notice queue. It never owns
//! the attendance service: every operation that talks to the backend takes it as a
//! parameter, so the hosting process decides which backend is live.

mod cursor;
mod dispatch;
mod keys;
mod roster;

pub use cursor::FocusCursor;
pub use dispatch::{BulkOutcome, MarkOutcome, RemarkSync};
pub use keys::{KeyEvent, KeyOutcome, KeyTarget};
pub use roster::{RosterEntry, SaveState};

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use chrono::NaiveDate;
use serde::Serialize;

use crate::error::LoadError;
use crate::profile::StatusProfile;
use crate::service::{AttendanceService, RosterQuery};

const MAX_NOTICES: usize = 20;

static NEXT_SESSION_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    pub class_id: String,
    pub date: NaiveDate,
    pub period_id: String,
    pub session_year_id: String,
}

impl Scope {
    pub fn date_key(&self) -> String {
        self.date.format("%Y-%m-%d").to_string()
    }

    fn roster_query(&self) -> RosterQuery {
        RosterQuery {
            class_id: self.class_id.clone(),
            date: self.date_key(),
            session_year_id: self.session_year_id.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LoadState {
    Empty,
    Loaded,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum NoticeLevel {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Notice {
    pub id: u64,
    pub level: NoticeLevel,
    pub message: String,
}

pub struct Session {
    /// Process-unique; writes issued by a replaced session never match it.
    id: u64,
    scope: Scope,
    profile: StatusProfile,
    entries: Vec<RosterEntry>,
    cursor: FocusCursor,
    generation: u64,
    load_state: LoadState,
    notices: Vec<Notice>,
    next_notice_id: u64,
}

impl Session {
    pub fn new(scope: Scope, profile: StatusProfile) -> Self {
        Self {
            id: NEXT_SESSION_ID.fetch_add(1, Ordering::Relaxed),
            scope,
            profile,
            entries: Vec::new(),
            cursor: FocusCursor::default(),
            generation: 0,
            load_state: LoadState::Empty,
            notices: Vec::new(),
            next_notice_id: 1,
        }
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn profile(&self) -> &StatusProfile {
        &self.profile
    }

    #[cfg(test)]
    pub fn entries(&self) -> &[RosterEntry] {
        &self.entries
    }

    pub fn cursor(&self) -> usize {
        self.cursor.index()
    }

    #[cfg(test)]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    #[cfg(test)]
    pub fn load_state(&self) -> &LoadState {
        &self.load_state
    }

    #[cfg(test)]
    pub fn notices(&self) -> &[Notice] {
        &self.notices
    }

    pub fn entry(&self, student_id: &str) -> Option<&RosterEntry> {
        self.entries.iter().find(|e| e.student_id == student_id)
    }

    fn position(&self, student_id: &str) -> Option<usize> {
        self.entries.iter().position(|e| e.student_id == student_id)
    }

    /// Fetches the roster for the current scope, replacing the previous one whole.
    /// Writes issued before this call become stale.
    pub fn load(&mut self, service: &dyn AttendanceService) -> Result<(), LoadError> {
        self.generation += 1;
        let result = service
            .class_attendance(&self.scope.roster_query())
            .map_err(LoadError::from)
            .and_then(|payload| roster::build_roster(payload, &self.scope.period_id));
        match result {
            Ok(entries) => {
                tracing::info!(
                    class_id = %self.scope.class_id,
                    date = %self.scope.date,
                    period_id = %self.scope.period_id,
                    students = entries.len(),
                    generation = self.generation,
                    "roster loaded"
                );
                self.entries = entries;
                self.cursor.reset_to_first_unmarked(&self.entries);
                self.load_state = LoadState::Loaded;
                Ok(())
            }
            Err(e) => {
                tracing::warn!(class_id = %self.scope.class_id, error = %e, "roster load failed");
                self.entries.clear();
                self.cursor = FocusCursor::default();
                self.load_state = LoadState::Failed(e.to_string());
                self.push_notice(NoticeLevel::Error, e.to_string());
                Err(e)
            }
        }
    }

    /// Switches scope; the roster is reloaded only when the key actually changed.
    pub fn set_scope(
        &mut self,
        service: &dyn AttendanceService,
        scope: Scope,
    ) -> Result<bool, LoadError> {
        if scope == self.scope && self.load_state == LoadState::Loaded {
            return Ok(false);
        }
        self.scope = scope;
        self.load(service)?;
        Ok(true)
    }

    pub fn focus(&mut self, index: usize) {
        self.cursor.set(index, self.entries.len());
    }

    pub fn move_cursor(&mut self, delta: i64) {
        let step = usize::try_from(delta.unsigned_abs()).unwrap_or(usize::MAX);
        let target = if delta < 0 {
            self.cursor.index().saturating_sub(step)
        } else {
            self.cursor.index().saturating_add(step)
        };
        self.cursor.set(target, self.entries.len());
    }

    pub fn dismiss_notice(&mut self, id: u64) -> bool {
        let before = self.notices.len();
        self.notices.retain(|n| n.id != id);
        self.notices.len() != before
    }

    fn push_notice(&mut self, level: NoticeLevel, message: impl Into<String>) {
        let id = self.next_notice_id;
        self.next_notice_id += 1;
        self.notices.push(Notice {
            id,
            level,
            message: message.into(),
        });
        if self.notices.len() > MAX_NOTICES {
            let overflow = self.notices.len() - MAX_NOTICES;
            self.notices.drain(..overflow);
        }
    }

    pub fn summary(&self) -> Summary {
        let mut counts: BTreeMap<&'static str, usize> = self
            .profile
            .statuses
            .iter()
            .map(|s| (s.as_str(), 0))
            .collect();
        let mut unmarked = 0;
        for e in &self.entries {
            match e.status {
                Some(s) => *counts.entry(s.as_str()).or_insert(0) += 1,
                None => unmarked += 1,
            }
        }
        Summary {
            total: self.entries.len(),
            unmarked,
            counts,
        }
    }

    pub fn snapshot(&self) -> Snapshot<'_> {
        let (load_state, load_error) = match &self.load_state {
            LoadState::Empty => ("empty", None),
            LoadState::Loaded => ("loaded", None),
            LoadState::Failed(msg) => ("failed", Some(msg.as_str())),
        };
        Snapshot {
            class_id: &self.scope.class_id,
            date: self.scope.date_key(),
            period_id: &self.scope.period_id,
            session_year_id: &self.scope.session_year_id,
            profile: &self.profile.name,
            generation: self.generation,
            load_state,
            load_error,
            cursor: self.cursor.index(),
            entries: self.entries.iter().map(EntryView::from).collect(),
            summary: self.summary(),
            notices: &self.notices,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Summary {
    pub total: usize,
    pub unmarked: usize,
    pub counts: BTreeMap<&'static str, usize>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EntryView<'a> {
    student_id: &'a str,
    display_name: &'a str,
    roll_number: &'a str,
    status: Option<&'static str>,
    remark: &'a str,
    record_id: Option<&'a str>,
    save_state: SaveState,
    is_saving: bool,
}

impl<'a> From<&'a RosterEntry> for EntryView<'a> {
    fn from(e: &'a RosterEntry) -> Self {
        Self {
            student_id: &e.student_id,
            display_name: &e.display_name,
            roll_number: &e.roll_number,
            status: e.status.map(|s| s.as_str()),
            remark: &e.remark,
            record_id: e.record_id.as_deref(),
            save_state: e.save_state,
            is_saving: e.is_saving(),
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Snapshot<'a> {
    class_id: &'a str,
    date: String,
    period_id: &'a str,
    session_year_id: &'a str,
    profile: &'a str,
    generation: u64,
    load_state: &'static str,
    load_error: Option<&'a str>,
    cursor: usize,
    entries: Vec<EntryView<'a>>,
    summary: Summary,
    notices: &'a [Notice],
}
