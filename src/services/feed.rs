use std::time::Duration;

use serde::Serialize;
use tracing::warn;

use crate::{
    models::{
        announcement::Announcement,
        display::DisplayChange,
        feed::{Channels, RowChange},
        timer::Timer,
    },
    services::{
        bus::{publish_bounded, Bus, BusError, BusMessage, BusStream},
        metrics,
    },
};

/// Anything a session can receive from the bus, already decoded.
#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    Announcement(RowChange<Announcement>),
    Timer(RowChange<Timer>),
    Display(DisplayChange),
}

/// Typed publishing and decoding on top of a [`Bus`]: the two Change Feed
/// tables plus the display broadcast channel.
#[derive(Clone)]
pub struct ChangeFeed<B: Bus> {
    bus: B,
    channels: Channels,
    publish_timeout: Duration,
}

impl<B: Bus> ChangeFeed<B> {
    pub fn new(bus: B, channels: Channels, publish_timeout: Duration) -> Self {
        Self {
            bus,
            channels,
            publish_timeout,
        }
    }

    pub fn bus(&self) -> &B {
        &self.bus
    }

    pub fn channels(&self) -> &Channels {
        &self.channels
    }

    pub async fn subscribe(&self) -> Result<BusStream, BusError> {
        self.bus.subscribe(&self.channels.all()).await
    }

    pub async fn publish_announcement(
        &self,
        change: &RowChange<Announcement>,
    ) -> Result<(), BusError> {
        self.publish("announcements", &self.channels.announcements, change)
            .await
    }

    pub async fn publish_timer(&self, change: &RowChange<Timer>) -> Result<(), BusError> {
        self.publish("timers", &self.channels.timers, change).await
    }

    pub async fn publish_display(&self, change: &DisplayChange) -> Result<(), BusError> {
        self.publish("display", &self.channels.display, change).await
    }

    async fn publish<T: Serialize>(
        &self,
        kind: &str,
        channel: &str,
        value: &T,
    ) -> Result<(), BusError> {
        let payload = serde_json::to_string(value).map_err(|e| BusError::Publish {
            channel: channel.to_string(),
            reason: e.to_string(),
        })?;
        let result = publish_bounded(&self.bus, channel, payload, self.publish_timeout).await;
        let label = if result.is_ok() { "ok" } else { "failed" };
        metrics::BROADCASTS_COUNTER
            .with_label_values(&[kind, label])
            .inc();
        result
    }

    /// Decodes a raw bus message. Unknown channels and malformed payloads are
    /// dropped with a warning; they never reach session state.
    pub fn decode(&self, msg: &BusMessage) -> Option<FeedEvent> {
        let decoded = if msg.channel == self.channels.announcements {
            serde_json::from_str(&msg.payload).map(FeedEvent::Announcement)
        } else if msg.channel == self.channels.timers {
            serde_json::from_str(&msg.payload).map(FeedEvent::Timer)
        } else if msg.channel == self.channels.display {
            serde_json::from_str(&msg.payload).map(FeedEvent::Display)
        } else {
            warn!("Ignoring message on unexpected channel {}", msg.channel);
            return None;
        };

        match decoded {
            Ok(event) => Some(event),
            Err(e) => {
                warn!("Dropping malformed payload on {}: {}", msg.channel, e);
                None
            }
        }
    }
}
