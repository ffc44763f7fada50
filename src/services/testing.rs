//! In-memory `RecordStore` and `Bus` used by the unit tests.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};
use tokio::sync::mpsc;
use tokio_stream::wrappers::UnboundedReceiverStream;
use uuid::Uuid;

use crate::{
    models::{
        announcement::{Announcement, AnnouncementRequest},
        timer::{SetTimerRequest, Timer},
    },
    services::{
        bus::{Bus, BusError, BusMessage, BusStream},
        store::RecordStore,
    },
};

#[derive(Default)]
struct StoreState {
    announcements: Vec<Announcement>,
    timers: Vec<Timer>,
    clock: Option<DateTime<Utc>>,
}

#[derive(Clone, Default)]
pub struct MemoryRecordStore {
    state: Arc<Mutex<StoreState>>,
    failing: Arc<AtomicBool>,
}

impl MemoryRecordStore {
    pub fn fail(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Pins `created_at` for subsequent inserts; each insert advances it by 1 ms.
    pub fn set_clock(&self, now: DateTime<Utc>) {
        self.state.lock().unwrap().clock = Some(now);
    }

    pub fn timers(&self) -> Vec<Timer> {
        self.state.lock().unwrap().timers.clone()
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.failing.load(Ordering::SeqCst) {
            anyhow::bail!("store unavailable");
        }
        Ok(())
    }
}

impl StoreState {
    fn tick(&mut self) -> DateTime<Utc> {
        match self.clock {
            Some(now) => {
                self.clock = Some(now + chrono::Duration::milliseconds(1));
                now
            }
            None => Utc::now(),
        }
    }
}

impl RecordStore for MemoryRecordStore {
    async fn list_announcements(&self) -> anyhow::Result<Vec<Announcement>> {
        self.check()?;
        let mut rows = self.state.lock().unwrap().announcements.clone();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows)
    }

    async fn insert_announcement(&self, req: &AnnouncementRequest) -> anyhow::Result<Announcement> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let row = Announcement {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            content: req.content.clone(),
            kind: req.kind,
            created_at: state.tick(),
            image_url: req.image_url.clone(),
            video_url: req.video_url.clone(),
        };
        state.announcements.push(row.clone());
        Ok(row)
    }

    async fn update_announcement(
        &self,
        id: Uuid,
        req: &AnnouncementRequest,
    ) -> anyhow::Result<Option<Announcement>> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state.announcements.iter_mut().find(|a| a.id == id).map(|a| {
            a.title = req.title.clone();
            a.content = req.content.clone();
            a.kind = req.kind;
            a.image_url = req.image_url.clone();
            a.video_url = req.video_url.clone();
            a.clone()
        }))
    }

    async fn delete_announcement(&self, id: Uuid) -> anyhow::Result<bool> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let before = state.announcements.len();
        state.announcements.retain(|a| a.id != id);
        Ok(state.announcements.len() != before)
    }

    async fn get_active_timer(&self) -> anyhow::Result<Option<Timer>> {
        self.check()?;
        let state = self.state.lock().unwrap();
        Ok(state
            .timers
            .iter()
            .filter(|t| t.active)
            .max_by_key(|t| t.created_at)
            .cloned())
    }

    async fn deactivate_all_timers(&self) -> anyhow::Result<Vec<Timer>> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        Ok(state
            .timers
            .iter_mut()
            .filter(|t| t.active)
            .map(|t| {
                t.active = false;
                t.clone()
            })
            .collect())
    }

    async fn insert_timer(&self, req: &SetTimerRequest) -> anyhow::Result<Timer> {
        self.check()?;
        let mut state = self.state.lock().unwrap();
        let row = Timer {
            id: Uuid::new_v4(),
            title: req.title.clone(),
            description: req.description.clone(),
            end_time: req.end_time,
            active: true,
            created_at: state.tick(),
        };
        state.timers.push(row.clone());
        Ok(row)
    }
}

struct Subscriber {
    channels: Vec<String>,
    tx: mpsc::UnboundedSender<BusMessage>,
}

#[derive(Clone, Default)]
pub struct MemoryBus {
    subscribers: Arc<Mutex<Vec<Subscriber>>>,
    published: Arc<Mutex<Vec<BusMessage>>>,
    failing: Arc<AtomicBool>,
    stalled: Arc<AtomicBool>,
    refusing: Arc<AtomicBool>,
}

impl MemoryBus {
    pub fn fail_publishes(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    /// Publishes hang forever, to exercise the publish timeout.
    pub fn stall_publishes(&self, stalled: bool) {
        self.stalled.store(stalled, Ordering::SeqCst);
    }

    /// New subscriptions fail, like a bus that is down.
    pub fn fail_subscribes(&self, refusing: bool) {
        self.refusing.store(refusing, Ordering::SeqCst);
    }

    /// Ends every live subscription stream, like a dropped connection.
    pub fn disconnect_all(&self) {
        self.subscribers.lock().unwrap().clear();
    }

    pub fn published(&self) -> Vec<BusMessage> {
        self.published.lock().unwrap().clone()
    }

    pub fn published_on(&self, channel: &str) -> Vec<String> {
        self.published()
            .into_iter()
            .filter(|m| m.channel == channel)
            .map(|m| m.payload)
            .collect()
    }
}

impl Bus for MemoryBus {
    async fn publish(&self, channel: &str, payload: String) -> Result<(), BusError> {
        if self.stalled.load(Ordering::SeqCst) {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        if self.failing.load(Ordering::SeqCst) {
            return Err(BusError::Publish {
                channel: channel.to_string(),
                reason: "bus offline".into(),
            });
        }
        let msg = BusMessage {
            channel: channel.to_string(),
            payload,
        };
        self.published.lock().unwrap().push(msg.clone());
        self.subscribers.lock().unwrap().retain(|sub| {
            !sub.channels.iter().any(|c| c == channel) || sub.tx.send(msg.clone()).is_ok()
        });
        Ok(())
    }

    async fn subscribe(&self, channels: &[&str]) -> Result<BusStream, BusError> {
        if self.refusing.load(Ordering::SeqCst) {
            return Err(BusError::Subscribe("bus offline".into()));
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers.lock().unwrap().push(Subscriber {
            channels: channels.iter().map(|c| c.to_string()).collect(),
            tx,
        });
        Ok(Box::pin(UnboundedReceiverStream::new(rx)))
    }
}
