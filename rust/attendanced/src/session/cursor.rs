use super::roster::RosterEntry;

/// Keyboard focus into the roster, always within `[0, len-1]` (0 when empty).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FocusCursor {
    index: usize,
}

fn last_index(len: usize) -> usize {
    len.saturating_sub(1)
}

impl FocusCursor {
    pub fn index(&self) -> usize {
        self.index
    }

    pub fn set(&mut self, index: usize, len: usize) {
        self.index = index.min(last_index(len));
    }

    pub fn down(&mut self, len: usize) {
        self.set(self.index + 1, len);
    }

    pub fn up(&mut self) {
        self.index = self.index.saturating_sub(1);
    }

    pub fn reset_to_first_unmarked(&mut self, entries: &[RosterEntry]) {
        self.index = entries.iter().position(|e| !e.is_marked()).unwrap_or(0);
    }

    pub fn advance_after_mark(&mut self, marked: usize, entries: &[RosterEntry]) {
        let next_unmarked = entries
            .iter()
            .enumerate()
            .skip(marked + 1)
            .find(|(_, e)| !e.is_marked())
            .map(|(i, _)| i);
        match next_unmarked {
            Some(i) => self.index = i,
            None => self.set(marked + 1, entries.len()),
        }
    }
}
