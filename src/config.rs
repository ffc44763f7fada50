use std::{env, time::Duration};

use crate::services::{display::BroadcastOrdering, viewer::SoundSettings};

#[derive(Debug, Clone)]
pub struct Config {
    pub database_url: String,
    pub redis_url: String,
    pub admin_password: String,
    pub host: String,
    pub port: u16,
    pub app_base_url: String,
    // Board synchronization
    pub board_channel: String,
    pub publish_timeout_ms: u64,
    pub tick_interval_ms: u64,
    pub resync_interval_secs: u64,
    pub reconnect_backoff_ms: u64,
    pub reject_stale_broadcasts: bool,
    // Default sound cue for new sessions
    pub play_sound: bool,
    pub sound_duration_secs: u64,
}

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let config = Self {
            database_url: required("DATABASE_URL")?,
            redis_url: env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into()),
            admin_password: required("ADMIN_PASSWORD")?,
            host: env::var("HOST").unwrap_or_else(|_| "0.0.0.0".into()),
            port: env::var("PORT")
                .unwrap_or_else(|_| "8080".into())
                .parse()?,
            app_base_url: env::var("APP_BASE_URL")
                .unwrap_or_else(|_| "http://localhost".into()),
            board_channel: env::var("BOARD_CHANNEL")
                .ok()
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| "board".into()),
            publish_timeout_ms: parsed("PUBLISH_TIMEOUT_MS", 5000)?,
            tick_interval_ms: parsed("TICK_INTERVAL_MS", 1000)?,
            resync_interval_secs: parsed("RESYNC_INTERVAL_SECS", 60)?,
            reconnect_backoff_ms: parsed("RECONNECT_BACKOFF_MS", 1000)?,
            reject_stale_broadcasts: parsed("REJECT_STALE_BROADCASTS", false)?,
            play_sound: parsed("PLAY_SOUND", false)?,
            sound_duration_secs: parsed("SOUND_DURATION_SECS", 5)?,
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if self.admin_password.trim().is_empty() {
            anyhow::bail!("ADMIN_PASSWORD must not be empty");
        }
        if self.tick_interval_ms == 0 || self.tick_interval_ms > 1000 {
            anyhow::bail!("TICK_INTERVAL_MS must be between 1 and 1000");
        }
        if self.publish_timeout_ms == 0 || self.resync_interval_secs == 0 || self.reconnect_backoff_ms == 0 {
            anyhow::bail!("PUBLISH_TIMEOUT_MS, RESYNC_INTERVAL_SECS and RECONNECT_BACKOFF_MS must be positive");
        }
        Ok(())
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn resync_interval(&self) -> Duration {
        Duration::from_secs(self.resync_interval_secs)
    }

    pub fn reconnect_backoff(&self) -> Duration {
        Duration::from_millis(self.reconnect_backoff_ms)
    }

    pub fn broadcast_ordering(&self) -> BroadcastOrdering {
        if self.reject_stale_broadcasts {
            BroadcastOrdering::RejectStale
        } else {
            BroadcastOrdering::Arrival
        }
    }

    pub fn default_sound(&self) -> SoundSettings {
        SoundSettings {
            enabled: self.play_sound,
            duration_secs: self.sound_duration_secs.max(1),
        }
    }
}

fn required(key: &str) -> anyhow::Result<String> {
    env::var(key).map_err(|_| anyhow::anyhow!("Missing required env var: {}", key))
}

fn parsed<T>(key: &str, default: T) -> anyhow::Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .trim()
            .parse()
            .map_err(|e| anyhow::anyhow!("Invalid value for {}: {}", key, e)),
        _ => Ok(default),
    }
}
