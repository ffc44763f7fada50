use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Which view a screen renders.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum DisplayMode {
    #[default]
    Announcements,
    Timer,
}

impl DisplayMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            DisplayMode::Announcements => "announcements",
            DisplayMode::Timer => "timer",
        }
    }
}

impl std::fmt::Display for DisplayMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Payload published on the display broadcast channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DisplayChange {
    pub display: DisplayMode,
    pub timestamp: DateTime<Utc>,
}

impl DisplayChange {
    pub fn new(display: DisplayMode, timestamp: DateTime<Utc>) -> Self {
        Self { display, timestamp }
    }
}

/// Body of `PUT /admin/display`.
#[derive(Debug, Deserialize)]
pub struct SetDisplayRequest {
    pub display: DisplayMode,
}
