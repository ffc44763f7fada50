use chrono::{DateTime, Utc};

use crate::{
    models::{
        announcement::Announcement, display::DisplayMode, feed::RowChange, timer::Timer,
    },
    services::display::is_valid_timer,
};

/// What applying an announcement change did to the local projection.
#[derive(Debug, Clone, PartialEq)]
pub enum AnnouncementApplied {
    /// A row not seen before. Side effects (cue, notice) fire only on this.
    Added(Announcement),
    Replaced,
    Removed,
    Unchanged,
}

/// What applying a timer change did to the local projection.
#[derive(Debug, Clone, PartialEq)]
pub struct TimerApplied {
    pub changed: bool,
    /// Display mode the coordinator should move towards, if any.
    pub prefer: Option<DisplayMode>,
    /// Set when a new or updated active timer was adopted.
    pub adopted: Option<Timer>,
}

impl TimerApplied {
    fn unchanged() -> Self {
        Self {
            changed: false,
            prefer: None,
            adopted: None,
        }
    }
}

/// Session-local mirror of the record store, kept current from Change Feed
/// events. Every change is applied by id, so duplicate or late deliveries
/// converge on the same state.
#[derive(Debug, Clone, Default)]
pub struct BoardAggregate {
    announcements: Vec<Announcement>,
    timer: Option<Timer>,
}

impl BoardAggregate {
    pub fn new(mut announcements: Vec<Announcement>, timer: Option<Timer>) -> Self {
        announcements.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        announcements.dedup_by(|a, b| a.id == b.id);
        Self {
            announcements,
            timer: timer.filter(|t| t.active),
        }
    }

    pub fn announcements(&self) -> &[Announcement] {
        &self.announcements
    }

    pub fn timer(&self) -> Option<&Timer> {
        self.timer.as_ref()
    }

    pub fn apply_announcement(&mut self, change: RowChange<Announcement>) -> AnnouncementApplied {
        match change {
            RowChange::Insert { row } => {
                if self.announcements.iter().any(|a| a.id == row.id) {
                    return self.replace_announcement(row);
                }
                let at = self
                    .announcements
                    .iter()
                    .position(|a| a.created_at < row.created_at)
                    .unwrap_or(self.announcements.len());
                self.announcements.insert(at, row.clone());
                AnnouncementApplied::Added(row)
            }
            // An UPDATE never introduces a row: it may trail a DELETE of the same id.
            RowChange::Update { row } => self.replace_announcement(row),
            RowChange::Delete { id } => {
                let before = self.announcements.len();
                self.announcements.retain(|a| a.id != id);
                if self.announcements.len() == before {
                    AnnouncementApplied::Unchanged
                } else {
                    AnnouncementApplied::Removed
                }
            }
        }
    }

    fn replace_announcement(&mut self, row: Announcement) -> AnnouncementApplied {
        let Some(existing) = self.announcements.iter_mut().find(|a| a.id == row.id) else {
            return AnnouncementApplied::Unchanged;
        };
        // created_at is immutable; only the editable fields move.
        let replaced = Announcement {
            created_at: existing.created_at,
            ..row
        };
        if *existing == replaced {
            return AnnouncementApplied::Unchanged;
        }
        *existing = replaced;
        AnnouncementApplied::Replaced
    }

    pub fn apply_timer(&mut self, change: RowChange<Timer>, now: DateTime<Utc>) -> TimerApplied {
        match change {
            RowChange::Insert { row } | RowChange::Update { row } if row.active => {
                // Two admins racing can leave two active rows; the newest one wins everywhere.
                if let Some(held) = &self.timer {
                    if held.id != row.id && held.created_at > row.created_at {
                        return TimerApplied::unchanged();
                    }
                    if *held == row {
                        return TimerApplied::unchanged();
                    }
                }
                self.timer = Some(row.clone());
                let prefer = is_valid_timer(Some(&row), now).then_some(DisplayMode::Timer);
                TimerApplied {
                    changed: true,
                    prefer,
                    adopted: Some(row),
                }
            }
            RowChange::Insert { .. } => TimerApplied::unchanged(),
            RowChange::Update { row } => self.release_timer(row.id),
            RowChange::Delete { id } => self.release_timer(id),
        }
    }

    fn release_timer(&mut self, id: uuid::Uuid) -> TimerApplied {
        if self.timer.as_ref().is_some_and(|t| t.id == id) {
            self.timer = None;
            TimerApplied {
                changed: true,
                prefer: Some(DisplayMode::Announcements),
                adopted: None,
            }
        } else {
            TimerApplied::unchanged()
        }
    }

    /// Swaps in a freshly fetched snapshot and returns the timer held before.
    pub fn replace(&mut self, announcements: Vec<Announcement>, timer: Option<Timer>) -> Option<Timer> {
        let previous = self.timer.take();
        *self = Self::new(announcements, timer);
        previous
    }
}
