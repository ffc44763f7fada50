use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AnnouncementType {
    #[default]
    Regular,
    Emergency,
}

impl AnnouncementType {
    pub fn as_str(&self) -> &'static str {
        match self {
            AnnouncementType::Regular => "regular",
            AnnouncementType::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for AnnouncementType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[derive(Debug, thiserror::Error)]
#[error("Unknown announcement type: {0}")]
pub struct UnknownAnnouncementType(pub String);

impl std::str::FromStr for AnnouncementType {
    type Err = UnknownAnnouncementType;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "regular" => Ok(AnnouncementType::Regular),
            "emergency" => Ok(AnnouncementType::Emergency),
            _ => Err(UnknownAnnouncementType(s.to_string())),
        }
    }
}

/// Lets `FromRow` decode the TEXT `type` column.
impl TryFrom<String> for AnnouncementType {
    type Error = UnknownAnnouncementType;
    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, FromRow, PartialEq)]
pub struct Announcement {
    pub id: Uuid,
    pub title: String,
    pub content: String,
    #[serde(rename = "type")]
    #[sqlx(rename = "type", try_from = "String")]
    pub kind: AnnouncementType,
    pub created_at: DateTime<Utc>,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

/// Body of `POST /admin/announcements` and `PUT /admin/announcements/{id}`.
#[derive(Debug, Clone, Deserialize)]
pub struct AnnouncementRequest {
    pub title: String,
    pub content: String,
    #[serde(rename = "type", default)]
    pub kind: AnnouncementType,
    pub image_url: Option<String>,
    pub video_url: Option<String>,
}

impl AnnouncementRequest {
    /// Trims text fields, drops blank media references and rejects empty title/content.
    pub fn normalized(self) -> Result<Self, &'static str> {
        let title = self.title.trim().to_string();
        let content = self.content.trim().to_string();
        if title.is_empty() {
            return Err("title is required");
        }
        if content.is_empty() {
            return Err("content is required");
        }
        Ok(Self {
            title,
            content,
            kind: self.kind,
            image_url: non_blank(self.image_url),
            video_url: non_blank(self.video_url),
        })
    }
}

fn non_blank(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
