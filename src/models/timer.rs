use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

/// A countdown row. Only the most recently created row with `active = TRUE`
/// is authoritative; older rows stay in the table as history.
#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Timer {
    pub id: Uuid,
    pub title: String,
    pub description: Option<String>,
    pub end_time: DateTime<Utc>,
    pub active: bool,
    pub created_at: DateTime<Utc>,
}

impl Timer {
    /// Whole seconds left before `end_time`, never negative.
    pub fn remaining_secs(&self, now: DateTime<Utc>) -> i64 {
        (self.end_time - now).num_seconds().max(0)
    }
}

/// Body of `PUT /admin/timer`.
#[derive(Debug, Clone, Deserialize)]
pub struct SetTimerRequest {
    pub title: String,
    pub description: Option<String>,
    pub end_time: DateTime<Utc>,
}

impl SetTimerRequest {
    pub fn normalized(self, now: DateTime<Utc>) -> Result<Self, &'static str> {
        let title = self.title.trim().to_string();
        if title.is_empty() {
            return Err("title is required");
        }
        if self.end_time <= now {
            return Err("end_time must be in the future");
        }
        Ok(Self {
            title,
            description: self
                .description
                .map(|d| d.trim().to_string())
                .filter(|d| !d.is_empty()),
            end_time: self.end_time,
        })
    }
}
