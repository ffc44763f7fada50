use chrono::Utc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::{
    models::{
        announcement::{Announcement, AnnouncementRequest},
        display::{DisplayChange, DisplayMode},
        feed::RowChange,
        timer::{SetTimerRequest, Timer},
    },
    services::{
        bus::{Bus, BusError},
        feed::ChangeFeed,
        store::RecordStore,
    },
};

#[derive(Debug, thiserror::Error)]
pub enum BoardError {
    #[error("{0}")]
    Invalid(&'static str),
    #[error("not found")]
    NotFound,
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Result of a store write followed by its Change Feed / display broadcasts.
/// The write is durable even when `broadcast` failed; screens that missed it
/// catch up on their next resync.
#[derive(Debug)]
pub struct Written<T> {
    pub record: T,
    pub broadcast: Result<(), BusError>,
}

impl<T> Written<T> {
    fn new(record: T) -> Self {
        Self {
            record,
            broadcast: Ok(()),
        }
    }

    /// Keeps the first broadcast failure, later ones are only logged.
    fn note(&mut self, result: Result<(), BusError>) {
        if let Err(e) = result {
            warn!("Broadcast after write failed: {}", e);
            if self.broadcast.is_ok() {
                self.broadcast = Err(e);
            }
        }
    }
}

/// Admin-side writes: every mutation goes to the record store first and is
/// then announced on the Change Feed so every session's aggregate follows.
#[derive(Clone)]
pub struct BoardService<S: RecordStore, B: Bus> {
    store: S,
    feed: ChangeFeed<B>,
}

impl<S: RecordStore, B: Bus> BoardService<S, B> {
    pub fn new(store: S, feed: ChangeFeed<B>) -> Self {
        Self { store, feed }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn feed(&self) -> &ChangeFeed<B> {
        &self.feed
    }

    pub async fn list_announcements(&self) -> Result<Vec<Announcement>, BoardError> {
        Ok(self.store.list_announcements().await?)
    }

    pub async fn active_timer(&self) -> Result<Option<Timer>, BoardError> {
        Ok(self.store.get_active_timer().await?)
    }

    pub async fn post_announcement(
        &self,
        req: AnnouncementRequest,
    ) -> Result<Written<Announcement>, BoardError> {
        let req = req.normalized().map_err(BoardError::Invalid)?;
        let row = self.store.insert_announcement(&req).await?;
        info!("Announcement posted: {} ({})", row.id, row.kind);

        let mut written = Written::new(row.clone());
        written.note(self.feed.publish_announcement(&RowChange::Insert { row }).await);
        Ok(written)
    }

    pub async fn update_announcement(
        &self,
        id: Uuid,
        req: AnnouncementRequest,
    ) -> Result<Written<Announcement>, BoardError> {
        let req = req.normalized().map_err(BoardError::Invalid)?;
        let row = self
            .store
            .update_announcement(id, &req)
            .await?
            .ok_or(BoardError::NotFound)?;

        let mut written = Written::new(row.clone());
        written.note(self.feed.publish_announcement(&RowChange::Update { row }).await);
        Ok(written)
    }

    pub async fn delete_announcement(&self, id: Uuid) -> Result<Written<Uuid>, BoardError> {
        if !self.store.delete_announcement(id).await? {
            return Err(BoardError::NotFound);
        }
        info!("Announcement deleted: {}", id);

        let mut written = Written::new(id);
        written.note(self.feed.publish_announcement(&RowChange::Delete { id }).await);
        Ok(written)
    }

    /// Replaces the active timer and asks every screen to show it.
    pub async fn set_timer(&self, req: SetTimerRequest) -> Result<Written<Timer>, BoardError> {
        let req = req.normalized(Utc::now()).map_err(BoardError::Invalid)?;
        let (deactivated, timer) = self.store.replace_active_timer(&req).await?;
        info!(
            "Timer set: {} ends {} ({} previous deactivated)",
            timer.id,
            timer.end_time,
            deactivated.len()
        );

        let mut written = Written::new(timer.clone());
        for row in deactivated {
            written.note(self.feed.publish_timer(&RowChange::Update { row }).await);
        }
        written.note(self.feed.publish_timer(&RowChange::Insert { row: timer }).await);
        written.note(self.request_display(DisplayMode::Timer).await);
        Ok(written)
    }

    /// Deactivates every timer without replacement.
    pub async fn clear_timer(&self) -> Result<Written<Vec<Timer>>, BoardError> {
        let deactivated = self.store.deactivate_all_timers().await?;
        info!("Timer cleared ({} deactivated)", deactivated.len());

        let mut written = Written::new(deactivated.clone());
        for row in deactivated {
            written.note(self.feed.publish_timer(&RowChange::Update { row }).await);
        }
        written.note(self.request_display(DisplayMode::Announcements).await);
        Ok(written)
    }

    /// Broadcast-only display request; there is no local view to update here.
    pub async fn request_display(&self, display: DisplayMode) -> Result<(), BusError> {
        self.feed
            .publish_display(&DisplayChange::new(display, Utc::now()))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        models::{announcement::AnnouncementType, feed::Channels},
        services::{
            aggregate::BoardAggregate,
            testing::{MemoryBus, MemoryRecordStore},
        },
    };
    use chrono::Duration;
    use std::time::Duration as StdDuration;

    fn service() -> (BoardService<MemoryRecordStore, MemoryBus>, MemoryRecordStore, MemoryBus) {
        let store = MemoryRecordStore::default();
        let bus = MemoryBus::default();
        let feed = ChangeFeed::new(bus.clone(), Channels::new("board"), StdDuration::from_secs(5));
        (BoardService::new(store.clone(), feed), store, bus)
    }

    fn welcome() -> AnnouncementRequest {
        AnnouncementRequest {
            title: "Welcome".into(),
            content: "Hi".into(),
            kind: AnnouncementType::Regular,
            image_url: None,
            video_url: None,
        }
    }

    fn lunch(minutes: i64) -> SetTimerRequest {
        SetTimerRequest {
            title: "Lunch".into(),
            description: None,
            end_time: Utc::now() + Duration::minutes(minutes),
        }
    }

    #[tokio::test]
    async fn post_announcement_publishes_insert() {
        let (board, _, bus) = service();
        let written = board.post_announcement(welcome()).await.unwrap();
        assert!(written.broadcast.is_ok());

        let sent = bus.published_on("board:changes:announcements");
        let change: RowChange<Announcement> = serde_json::from_str(&sent[0]).unwrap();
        assert_eq!(change, RowChange::Insert { row: written.record });
    }

    #[tokio::test]
    async fn rejects_blank_announcement_without_writing() {
        let (board, store, bus) = service();
        let req = AnnouncementRequest {
            title: "  ".into(),
            ..welcome()
        };
        assert!(matches!(
            board.post_announcement(req).await,
            Err(BoardError::Invalid(_))
        ));
        assert!(store.list_announcements().await.unwrap().is_empty());
        assert!(bus.published().is_empty());
    }

    #[tokio::test]
    async fn delete_unknown_announcement_is_not_found() {
        let (board, _, _) = service();
        assert!(matches!(
            board.delete_announcement(Uuid::new_v4()).await,
            Err(BoardError::NotFound)
        ));
    }

    #[tokio::test]
    async fn write_survives_broadcast_failure() {
        let (board, store, bus) = service();
        bus.fail_publishes(true);
        let written = board.post_announcement(welcome()).await.unwrap();
        assert!(written.broadcast.is_err());
        assert_eq!(store.list_announcements().await.unwrap(), vec![written.record]);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_broadcast_times_out() {
        let (board, _, bus) = service();
        bus.stall_publishes(true);
        let result = board.request_display(DisplayMode::Timer).await;
        assert!(matches!(result, Err(BusError::Timeout { timeout_ms: 5000, .. })));
    }

    #[tokio::test]
    async fn set_timer_deactivates_previous_and_requests_timer_view() {
        let (board, store, bus) = service();
        let first = board.set_timer(lunch(5)).await.unwrap().record;
        let second = board.set_timer(lunch(10)).await.unwrap().record;

        let active: Vec<_> = store.timers().into_iter().filter(|t| t.active).collect();
        assert_eq!(active, vec![second.clone()]);
        assert_eq!(store.get_active_timer().await.unwrap(), Some(second));

        let timer_events: Vec<RowChange<Timer>> = bus
            .published_on("board:changes:timers")
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        assert!(timer_events.iter().any(|c| matches!(
            c,
            RowChange::Update { row } if row.id == first.id && !row.active
        )));

        let displays: Vec<DisplayChange> = bus
            .published_on("board:display")
            .iter()
            .map(|p| serde_json::from_str(p).unwrap())
            .collect();
        assert!(displays.iter().all(|d| d.display == DisplayMode::Timer));
    }

    #[tokio::test]
    async fn set_timer_rejects_past_end_time() {
        let (board, store, _) = service();
        assert!(matches!(
            board.set_timer(lunch(-1)).await,
            Err(BoardError::Invalid(_))
        ));
        assert!(store.timers().is_empty());
    }

    #[tokio::test]
    async fn clear_timer_requests_announcements() {
        let (board, store, bus) = service();
        board.set_timer(lunch(5)).await.unwrap();
        let cleared = board.clear_timer().await.unwrap();
        assert_eq!(cleared.record.len(), 1);
        assert_eq!(store.get_active_timer().await.unwrap(), None);

        let last: DisplayChange =
            serde_json::from_str(bus.published_on("board:display").last().unwrap()).unwrap();
        assert_eq!(last.display, DisplayMode::Announcements);
    }

    #[tokio::test]
    async fn racing_two_step_writes_resolve_to_newest_active_row() {
        let (_, store, _) = service();
        let now = Utc::now();
        store.set_clock(now);

        // Both admins deactivate before either inserts.
        store.deactivate_all_timers().await.unwrap();
        store.deactivate_all_timers().await.unwrap();
        let a = store.insert_timer(&lunch(5)).await.unwrap();
        let b = store.insert_timer(&lunch(9)).await.unwrap();

        assert_eq!(store.timers().iter().filter(|t| t.active).count(), 2);
        let authoritative = store.get_active_timer().await.unwrap().unwrap();
        assert_eq!(authoritative.id, b.id);

        // Sessions that saw the inserts in opposite orders agree with the read path.
        let mut one = BoardAggregate::default();
        one.apply_timer(RowChange::Insert { row: a.clone() }, now);
        one.apply_timer(RowChange::Insert { row: b.clone() }, now);
        let mut two = BoardAggregate::default();
        two.apply_timer(RowChange::Insert { row: b.clone() }, now);
        two.apply_timer(RowChange::Insert { row: a }, now);
        assert_eq!(one.timer().map(|t| t.id), Some(b.id));
        assert_eq!(two.timer().map(|t| t.id), Some(b.id));
    }
}
