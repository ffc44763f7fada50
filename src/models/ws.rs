use serde::{Deserialize, Serialize};

use super::{announcement::Announcement, display::DisplayMode, timer::Timer};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum NoticeLevel {
    Info,
    Error,
}

/// Frames pushed from a viewer session to its screen.
#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerFrame {
    Snapshot {
        announcements: Vec<Announcement>,
        timer: Option<Timer>,
        display: DisplayMode,
    },
    Display {
        display: DisplayMode,
    },
    Announcements {
        announcements: Vec<Announcement>,
    },
    Timer {
        timer: Option<Timer>,
    },
    Countdown {
        remaining_secs: i64,
    },
    Cue {
        duration_secs: u64,
        title: String,
    },
    Notice {
        level: NoticeLevel,
        message: String,
        description: Option<String>,
    },
}

impl ServerFrame {
    pub fn info(message: impl Into<String>, description: Option<String>) -> Self {
        ServerFrame::Notice {
            level: NoticeLevel::Info,
            message: message.into(),
            description,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerFrame::Notice {
            level: NoticeLevel::Error,
            message: message.into(),
            description: None,
        }
    }
}

/// Frames a screen may send to its viewer session.
#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientFrame {
    RequestDisplay { display: DisplayMode },
    SoundSettings { enabled: bool, duration_secs: u64 },
}
