use super::dispatch::MarkOutcome;
use super::Session;
use crate::error::WriteError;
use crate::profile::KeyAction;
use crate::service::AttendanceService;

/// Element that had focus when the key went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyTarget {
    TextInput,
    TextArea,
    Other,
}

impl KeyTarget {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "textInput" => Some(Self::TextInput),
            "textArea" => Some(Self::TextArea),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    fn is_text(self) -> bool {
        matches!(self, Self::TextInput | Self::TextArea)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyEvent {
    pub key: String,
    pub target: KeyTarget,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeyOutcome {
    Ignored,
    CursorMoved { index: usize },
    Marked(MarkOutcome),
}

impl Session {
    pub fn handle_key(
        &mut self,
        service: &dyn AttendanceService,
        event: &KeyEvent,
    ) -> Result<KeyOutcome, WriteError> {
        if event.target.is_text() {
            return Ok(KeyOutcome::Ignored);
        }
        let Some(action) = self.profile.action_for(&event.key) else {
            return Ok(KeyOutcome::Ignored);
        };
        match action {
            KeyAction::CursorDown => {
                self.cursor.down(self.entries.len());
                Ok(KeyOutcome::CursorMoved {
                    index: self.cursor.index(),
                })
            }
            KeyAction::CursorUp => {
                self.cursor.up();
                Ok(KeyOutcome::CursorMoved {
                    index: self.cursor.index(),
                })
            }
            KeyAction::Mark(status) => {
                let Some(entry) = self.entries.get(self.cursor.index()) else {
                    return Ok(KeyOutcome::Ignored);
                };
                let student_id = entry.student_id.clone();
                self.mark(service, &student_id, status).map(KeyOutcome::Marked)
            }
        }
    }
}
