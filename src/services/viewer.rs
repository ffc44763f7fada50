use std::{future::Future, pin::Pin, time::Duration};

use chrono::{DateTime, Utc};
use futures_util::{stream::FuturesUnordered, StreamExt};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use crate::{
    models::{
        announcement::Announcement,
        display::{DisplayChange, DisplayMode},
        feed::RowChange,
        timer::Timer,
        ws::{ClientFrame, ServerFrame},
    },
    services::{
        aggregate::{AnnouncementApplied, BoardAggregate},
        bus::{Bus, BusError, BusMessage, BusStream},
        display::{BroadcastOrdering, DisplayCoordinator, DisplayEvent, Transition},
        feed::{ChangeFeed, FeedEvent},
        metrics,
        store::RecordStore,
    },
};

const MAX_RECONNECT_BACKOFF: Duration = Duration::from_secs(30);

/// Network work the session loop waits on without blocking the tick.
type InFlight<T> = Pin<Box<dyn Future<Output = T> + Send>>;

/// What a session loads from the store at startup and on every resync.
#[derive(Debug, Clone, Default)]
pub struct BoardContents {
    pub announcements: Vec<Announcement>,
    pub timer: Option<Timer>,
}

pub async fn fetch_board<S: RecordStore>(store: &S) -> anyhow::Result<BoardContents> {
    let announcements = store.list_announcements().await?;
    let timer = store.get_active_timer().await?;
    Ok(BoardContents {
        announcements,
        timer,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SoundSettings {
    pub enabled: bool,
    pub duration_secs: u64,
}

#[derive(Debug, Clone)]
pub struct SessionOptions {
    pub ordering: BroadcastOrdering,
    pub sound: SoundSettings,
    pub is_admin: bool,
    pub tick_interval: Duration,
    pub resync_interval: Duration,
    pub reconnect_backoff: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResyncTrigger {
    Reconnect,
    Periodic,
}

impl ResyncTrigger {
    fn as_str(&self) -> &'static str {
        match self {
            ResyncTrigger::Reconnect => "reconnect",
            ResyncTrigger::Periodic => "periodic",
        }
    }
}

/// One connected screen: its own projection of the board, its own display
/// coordinator, and nothing shared with other screens except the bus.
pub struct ViewerSession<S: RecordStore, B: Bus> {
    store: S,
    feed: ChangeFeed<B>,
    aggregate: BoardAggregate,
    coordinator: DisplayCoordinator,
    sound: SoundSettings,
    is_admin: bool,
}

impl<S: RecordStore, B: Bus> ViewerSession<S, B> {
    /// Fetches the initial snapshot and derives the starting display mode from it.
    pub async fn start(
        store: S,
        feed: ChangeFeed<B>,
        options: &SessionOptions,
        now: DateTime<Utc>,
    ) -> anyhow::Result<(Self, ServerFrame)> {
        let board = fetch_board(&store).await?;
        Ok(Self::from_board(store, feed, options, board, now))
    }

    pub fn from_board(
        store: S,
        feed: ChangeFeed<B>,
        options: &SessionOptions,
        board: BoardContents,
        now: DateTime<Utc>,
    ) -> (Self, ServerFrame) {
        let aggregate = BoardAggregate::new(board.announcements, board.timer);
        let coordinator = DisplayCoordinator::new(aggregate.timer(), now, options.ordering);

        let session = Self {
            store,
            feed,
            aggregate,
            coordinator,
            sound: options.sound,
            is_admin: options.is_admin,
        };
        let snapshot = session.snapshot();
        (session, snapshot)
    }

    pub fn mode(&self) -> DisplayMode {
        self.coordinator.mode()
    }

    pub fn aggregate(&self) -> &BoardAggregate {
        &self.aggregate
    }

    pub fn snapshot(&self) -> ServerFrame {
        ServerFrame::Snapshot {
            announcements: self.aggregate.announcements().to_vec(),
            timer: self.aggregate.timer().cloned(),
            display: self.coordinator.mode(),
        }
    }

    fn drive(&mut self, event: DisplayEvent, now: DateTime<Utc>, frames: &mut Vec<ServerFrame>) {
        let transition = self.coordinator.apply(&event, self.aggregate.timer(), now);
        push_transition(transition, frames);
    }

    pub fn handle_bus_message(&mut self, msg: &BusMessage, now: DateTime<Utc>) -> Vec<ServerFrame> {
        match self.feed.decode(msg) {
            Some(event) => self.handle_event(event, now),
            None => Vec::new(),
        }
    }

    pub fn handle_event(&mut self, event: FeedEvent, now: DateTime<Utc>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        match event {
            FeedEvent::Announcement(change) => {
                metrics::FEED_EVENTS_COUNTER
                    .with_label_values(&["announcements", change.label()])
                    .inc();
                match self.aggregate.apply_announcement(change) {
                    AnnouncementApplied::Added(row) => {
                        frames.push(self.announcements_frame());
                        if self.sound.enabled {
                            frames.push(ServerFrame::Cue {
                                duration_secs: self.sound.duration_secs,
                                title: row.title.clone(),
                            });
                        }
                        frames.push(ServerFrame::info(
                            "New announcement received!",
                            Some(row.title),
                        ));
                    }
                    AnnouncementApplied::Replaced | AnnouncementApplied::Removed => {
                        frames.push(self.announcements_frame());
                    }
                    AnnouncementApplied::Unchanged => {}
                }
            }
            FeedEvent::Timer(change) => {
                metrics::FEED_EVENTS_COUNTER
                    .with_label_values(&["timers", change.label()])
                    .inc();
                self.handle_timer_change(change, now, &mut frames);
            }
            FeedEvent::Display(change) => self.handle_display_change(change, now, &mut frames),
        }
        frames
    }

    fn handle_timer_change(
        &mut self,
        change: RowChange<Timer>,
        now: DateTime<Utc>,
        frames: &mut Vec<ServerFrame>,
    ) {
        let applied = self.aggregate.apply_timer(change, now);
        if !applied.changed {
            return;
        }
        frames.push(ServerFrame::Timer {
            timer: self.aggregate.timer().cloned(),
        });
        if let Some(timer) = applied.adopted {
            frames.push(ServerFrame::info("Timer updated!", Some(timer.title)));
        }
        // A released timer must drop the view even if the prefer hint is absent.
        let event = match applied.prefer {
            Some(mode) => DisplayEvent::TimerChanged(mode),
            None => DisplayEvent::Tick,
        };
        self.drive(event, now, frames);
    }

    fn handle_display_change(
        &mut self,
        change: DisplayChange,
        now: DateTime<Utc>,
        frames: &mut Vec<ServerFrame>,
    ) {
        if self
            .coordinator
            .would_reject(&change, self.aggregate.timer(), now)
        {
            metrics::BROADCASTS_IGNORED_COUNTER.inc();
            info!("Ignoring timer display broadcast: no valid timer held");
        }
        self.drive(DisplayEvent::Broadcast(change), now, frames);
    }

    /// Runs the validity gate and, while the timer view is up, the countdown.
    pub fn tick(&mut self, now: DateTime<Utc>) -> Vec<ServerFrame> {
        let mut frames = Vec::new();
        self.drive(DisplayEvent::Tick, now, &mut frames);
        if self.coordinator.mode() == DisplayMode::Timer {
            if let Some(timer) = self.aggregate.timer() {
                frames.push(ServerFrame::Countdown {
                    remaining_secs: timer.remaining_secs(now),
                });
            }
        }
        frames
    }

    /// Re-fetches announcements and the active timer. A timer that appeared
    /// while we were not listening is treated like a live timer insert.
    pub async fn resync(&mut self, trigger: ResyncTrigger, now: DateTime<Utc>) -> Vec<ServerFrame> {
        let fetched = fetch_board(&self.store).await;
        self.apply_resync(trigger, fetched, now)
    }

    pub fn apply_resync(
        &mut self,
        trigger: ResyncTrigger,
        fetched: anyhow::Result<BoardContents>,
        now: DateTime<Utc>,
    ) -> Vec<ServerFrame> {
        let board = match fetched {
            Ok(board) => board,
            Err(e) => {
                metrics::RESYNCS_COUNTER
                    .with_label_values(&[trigger.as_str(), "failed"])
                    .inc();
                warn!("Resync ({}) failed: {}", trigger.as_str(), e);
                // Local expiry still applies even though the store is unreachable.
                let mut frames = self.tick(now);
                frames.push(ServerFrame::error("Failed to refresh the board"));
                return frames;
            }
        };
        metrics::RESYNCS_COUNTER
            .with_label_values(&[trigger.as_str(), "ok"])
            .inc();

        let previous = self.aggregate.replace(board.announcements, board.timer);
        let current = self.aggregate.timer();
        let prefer = match (previous.as_ref(), current) {
            (_, None) => Some(DisplayMode::Announcements),
            (Some(before), Some(after)) if before.id == after.id => None,
            (_, Some(_)) => Some(DisplayMode::Timer),
        };

        let mut frames = Vec::new();
        self.drive(DisplayEvent::Resynced { prefer }, now, &mut frames);
        frames.insert(0, self.snapshot());
        frames
    }

    /// Screen input. Display requests are applied locally first and then
    /// broadcast; a failed broadcast is reported but never rolled back.
    pub async fn handle_client_frame(
        &mut self,
        frame: ClientFrame,
        now: DateTime<Utc>,
    ) -> Vec<ServerFrame> {
        let (mut frames, change) = self.accept_client_frame(frame, now);
        if let Some(change) = change {
            let result = self.feed.publish_display(&change).await;
            frames.push(broadcast_outcome(change.display, result));
        }
        frames
    }

    /// Applies screen input locally. Returns the display change still to be
    /// broadcast, if any; the caller publishes it and reports the outcome
    /// with [`broadcast_outcome`].
    pub fn accept_client_frame(
        &mut self,
        frame: ClientFrame,
        now: DateTime<Utc>,
    ) -> (Vec<ServerFrame>, Option<DisplayChange>) {
        let mut frames = Vec::new();
        match frame {
            ClientFrame::RequestDisplay { display } => {
                if !self.is_admin {
                    warn!("Display request from non-admin session ignored");
                    frames.push(ServerFrame::error("Only admins can change the display"));
                    return (frames, None);
                }
                let Some(request) = self
                    .coordinator
                    .request(display, self.aggregate.timer(), now)
                else {
                    return (frames, None);
                };
                push_transition(request.transition, &mut frames);
                return (frames, Some(request.change));
            }
            ClientFrame::SoundSettings {
                enabled,
                duration_secs,
            } => {
                self.sound = SoundSettings {
                    enabled,
                    duration_secs: duration_secs.max(1),
                };
            }
        }
        (frames, None)
    }

    fn announcements_frame(&self) -> ServerFrame {
        ServerFrame::Announcements {
            announcements: self.aggregate.announcements().to_vec(),
        }
    }
}

fn push_transition(transition: Option<Transition>, frames: &mut Vec<ServerFrame>) {
    if let Some(t) = transition {
        info!("Display {} -> {} ({})", t.from, t.to, t.cause.as_str());
        metrics::DISPLAY_TRANSITIONS_COUNTER
            .with_label_values(&[t.cause.as_str(), t.to.as_str()])
            .inc();
        frames.push(ServerFrame::Display { display: t.to });
    }
}

pub fn broadcast_outcome(display: DisplayMode, result: Result<(), BusError>) -> ServerFrame {
    match result {
        Ok(()) => ServerFrame::info(format!("Display updated to {display}"), None),
        Err(e) => {
            warn!("Display broadcast failed: {}", e);
            ServerFrame::error("Failed to update display settings")
        }
    }
}

async fn send_all(out: &mpsc::Sender<ServerFrame>, frames: Vec<ServerFrame>) -> bool {
    for frame in frames {
        if out.send(frame).await.is_err() {
            return false;
        }
    }
    true
}

async fn subscribe_with_backoff<B: Bus>(feed: ChangeFeed<B>, initial: Duration) -> BusStream {
    let mut delay = initial;
    loop {
        match feed.subscribe().await {
            Ok(stream) => return stream,
            Err(e) => {
                warn!("Board subscription failed, retrying in {:?}: {}", delay, e);
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_BACKOFF);
            }
        }
    }
}

fn refetch<S: RecordStore>(
    store: S,
    trigger: ResyncTrigger,
) -> InFlight<(ResyncTrigger, anyhow::Result<BoardContents>)> {
    Box::pin(async move {
        let fetched = fetch_board(&store).await;
        (trigger, fetched)
    })
}

fn resubscribe<B: Bus>(feed: ChangeFeed<B>, initial: Duration) -> InFlight<BusStream> {
    Box::pin(subscribe_with_backoff(feed, initial))
}

fn broadcast<B: Bus>(
    feed: ChangeFeed<B>,
    change: DisplayChange,
) -> InFlight<(DisplayMode, Result<(), BusError>)> {
    Box::pin(async move {
        let result = feed.publish_display(&change).await;
        (change.display, result)
    })
}

/// Next message from the live subscription; pending forever while there is none.
async fn next_message(stream: &mut Option<BusStream>) -> Option<BusMessage> {
    match stream {
        Some(stream) => stream.next().await,
        None => std::future::pending().await,
    }
}

/// Completes with the work in `slot`; pending forever while the slot is empty.
async fn in_flight<T>(slot: &mut Option<InFlight<T>>) -> T {
    match slot {
        Some(work) => work.await,
        None => std::future::pending().await,
    }
}

/// Loads the board, retrying with backoff until the store answers. Every
/// failed attempt is reported to the screen.
async fn load_with_backoff<S: RecordStore>(
    store: &S,
    initial: Duration,
    out: &mpsc::Sender<ServerFrame>,
) -> Option<BoardContents> {
    let mut delay = initial;
    loop {
        match fetch_board(store).await {
            Ok(board) => return Some(board),
            Err(e) => {
                error!(
                    "Viewer session could not load the board, retrying in {:?}: {}",
                    delay, e
                );
                if out
                    .send(ServerFrame::error("Failed to load announcements"))
                    .await
                    .is_err()
                {
                    return None;
                }
                tokio::time::sleep(delay).await;
                delay = (delay * 2).min(MAX_RECONNECT_BACKOFF);
            }
        }
    }
}

/// Drives one screen until it goes away. Subscribes before the initial fetch
/// so nothing published in between is lost, and on every lost subscription
/// re-subscribes and resyncs from the store.
///
/// Network work runs next to the tick rather than in front of it: the
/// validity gate and countdown keep following the local clock however long
/// the bus or the store take to answer.
pub async fn run_viewer<S: RecordStore, B: Bus>(
    store: S,
    feed: ChangeFeed<B>,
    options: SessionOptions,
    out: mpsc::Sender<ServerFrame>,
    mut inbound: mpsc::Receiver<ClientFrame>,
) {
    let mut stream = Some(subscribe_with_backoff(feed.clone(), options.reconnect_backoff).await);

    let Some(board) = load_with_backoff(&store, options.reconnect_backoff, &out).await else {
        return;
    };
    let (mut session, snapshot) =
        ViewerSession::from_board(store.clone(), feed.clone(), &options, board, Utc::now());
    if !send_all(&out, vec![snapshot]).await {
        return;
    }

    let mut subscribing: Option<InFlight<BusStream>> = None;
    let mut resyncing: Option<InFlight<(ResyncTrigger, anyhow::Result<BoardContents>)>> = None;
    let mut broadcasts: FuturesUnordered<InFlight<(DisplayMode, Result<(), BusError>)>> =
        FuturesUnordered::new();

    let mut tick = tokio::time::interval(options.tick_interval);
    let mut resync = tokio::time::interval(options.resync_interval);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    resync.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    resync.reset();

    loop {
        let frames = tokio::select! {
            msg = next_message(&mut stream) => match msg {
                Some(msg) => session.handle_bus_message(&msg, Utc::now()),
                None => {
                    warn!("Board subscription lost, reconnecting");
                    stream = None;
                    subscribing = Some(resubscribe(feed.clone(), options.reconnect_backoff));
                    Vec::new()
                }
            },
            restored = in_flight(&mut subscribing) => {
                info!("Board subscription restored");
                subscribing = None;
                stream = Some(restored);
                resyncing = Some(refetch(store.clone(), ResyncTrigger::Reconnect));
                Vec::new()
            },
            (trigger, fetched) = in_flight(&mut resyncing) => {
                resyncing = None;
                session.apply_resync(trigger, fetched, Utc::now())
            },
            Some((display, result)) = broadcasts.next(), if !broadcasts.is_empty() => {
                vec![broadcast_outcome(display, result)]
            },
            _ = tick.tick() => session.tick(Utc::now()),
            _ = resync.tick() => {
                if resyncing.is_none() {
                    resyncing = Some(refetch(store.clone(), ResyncTrigger::Periodic));
                }
                Vec::new()
            },
            frame = inbound.recv() => match frame {
                Some(frame) => {
                    let (frames, change) = session.accept_client_frame(frame, Utc::now());
                    if let Some(change) = change {
                        broadcasts.push(broadcast(feed.clone(), change));
                    }
                    frames
                }
                None => return,
            },
        };

        if !send_all(&out, frames).await {
            return;
        }
    }
}
