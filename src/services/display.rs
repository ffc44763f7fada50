//! Display-mode synchronization.
//!
//! Every session keeps its own [`DisplayCoordinator`]. All inputs (local
//! requests, broadcasts from other sessions, timer changes, clock ticks and
//! resyncs) go through [`reduce_display_mode`], which is pure; effects such as
//! publishing or pushing frames happen in the caller, off the returned
//! [`Transition`].

use chrono::{DateTime, Utc};

use crate::models::{
    display::{DisplayChange, DisplayMode},
    timer::Timer,
};

/// A timer backs the timer view only while it exists and has not ended.
pub fn is_valid_timer(timer: Option<&Timer>, now: DateTime<Utc>) -> bool {
    timer.is_some_and(|t| t.end_time > now)
}

/// How concurrent broadcasts are ordered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum BroadcastOrdering {
    /// Last message to arrive wins; `timestamp` is ignored.
    #[default]
    Arrival,
    /// Messages older than the last applied one are dropped.
    RejectStale,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayState {
    pub mode: DisplayMode,
    pub last_applied: Option<DateTime<Utc>>,
}

impl DisplayState {
    pub fn new(mode: DisplayMode) -> Self {
        Self {
            mode,
            last_applied: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DisplayEvent {
    /// Local request, applied optimistically before it is broadcast.
    Requested(DisplayChange),
    /// A `display_change` received on the broadcast channel (possibly our own).
    Broadcast(DisplayChange),
    /// The aggregate adopted or released a timer.
    TimerChanged(DisplayMode),
    /// Periodic validity check.
    Tick,
    /// Authoritative state was re-fetched.
    Resynced { prefer: Option<DisplayMode> },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionCause {
    Request,
    Broadcast,
    TimerChange,
    Expiry,
    Resync,
}

impl TransitionCause {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransitionCause::Request => "request",
            TransitionCause::Broadcast => "broadcast",
            TransitionCause::TimerChange => "timer_change",
            TransitionCause::Expiry => "expiry",
            TransitionCause::Resync => "resync",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: DisplayMode,
    pub to: DisplayMode,
    pub cause: TransitionCause,
}

/// Forces the announcements view whenever no valid timer backs the timer view.
fn gate(mode: DisplayMode, timer: Option<&Timer>, now: DateTime<Utc>) -> DisplayMode {
    if mode == DisplayMode::Timer && !is_valid_timer(timer, now) {
        DisplayMode::Announcements
    } else {
        mode
    }
}

pub fn reduce_display_mode(
    state: DisplayState,
    event: &DisplayEvent,
    timer: Option<&Timer>,
    now: DateTime<Utc>,
    ordering: BroadcastOrdering,
) -> DisplayState {
    let next = match event {
        DisplayEvent::Requested(change) => DisplayState {
            mode: change.display,
            last_applied: Some(change.timestamp),
        },
        DisplayEvent::Broadcast(change) => {
            let stale = ordering == BroadcastOrdering::RejectStale
                && state.last_applied.is_some_and(|t| change.timestamp < t);
            let unbacked = change.display == DisplayMode::Timer && !is_valid_timer(timer, now);
            if stale || unbacked {
                state
            } else {
                DisplayState {
                    mode: change.display,
                    last_applied: Some(change.timestamp),
                }
            }
        }
        DisplayEvent::TimerChanged(mode) => DisplayState {
            mode: *mode,
            ..state
        },
        DisplayEvent::Tick => state,
        DisplayEvent::Resynced { prefer } => DisplayState {
            mode: prefer.unwrap_or(state.mode),
            ..state
        },
    };

    DisplayState {
        mode: gate(next.mode, timer, now),
        ..next
    }
}

/// Outcome of a local display request: the change to broadcast and the local
/// transition it already caused, if any.
#[derive(Debug, Clone, PartialEq)]
pub struct DisplayRequest {
    pub change: DisplayChange,
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone)]
pub struct DisplayCoordinator {
    state: DisplayState,
    ordering: BroadcastOrdering,
}

impl DisplayCoordinator {
    /// Starts in the timer view only if the startup fetch found a valid timer.
    pub fn new(timer: Option<&Timer>, now: DateTime<Utc>, ordering: BroadcastOrdering) -> Self {
        let mode = if is_valid_timer(timer, now) {
            DisplayMode::Timer
        } else {
            DisplayMode::Announcements
        };
        Self {
            state: DisplayState::new(mode),
            ordering,
        }
    }

    pub fn mode(&self) -> DisplayMode {
        self.state.mode
    }

    pub fn state(&self) -> DisplayState {
        self.state
    }

    /// Feeds one event through the reducer and reports the edge, if the mode moved.
    pub fn apply(
        &mut self,
        event: &DisplayEvent,
        timer: Option<&Timer>,
        now: DateTime<Utc>,
    ) -> Option<Transition> {
        let from = self.state.mode;
        self.state = reduce_display_mode(self.state, event, timer, now, self.ordering);
        let to = self.state.mode;
        if from == to {
            return None;
        }

        let cause = match event {
            DisplayEvent::Requested(_) => TransitionCause::Request,
            DisplayEvent::Broadcast(_) if to == DisplayMode::Announcements
                && !is_valid_timer(timer, now)
                && from == DisplayMode::Timer =>
            {
                TransitionCause::Expiry
            }
            DisplayEvent::Broadcast(_) => TransitionCause::Broadcast,
            DisplayEvent::TimerChanged(_) => TransitionCause::TimerChange,
            DisplayEvent::Tick => TransitionCause::Expiry,
            DisplayEvent::Resynced { .. } => TransitionCause::Resync,
        };
        Some(Transition { from, to, cause })
    }

    /// Whether a broadcast for the timer view would be refused by the validity guard.
    pub fn would_reject(&self, change: &DisplayChange, timer: Option<&Timer>, now: DateTime<Utc>) -> bool {
        change.display == DisplayMode::Timer && !is_valid_timer(timer, now)
    }

    /// Applies a local request immediately. Returns `None` when `mode` is
    /// already showing, in which case nothing needs to be broadcast.
    pub fn request(
        &mut self,
        mode: DisplayMode,
        timer: Option<&Timer>,
        now: DateTime<Utc>,
    ) -> Option<DisplayRequest> {
        if mode == self.state.mode {
            return None;
        }
        let change = DisplayChange::new(mode, now);
        let transition = self.apply(&DisplayEvent::Requested(change.clone()), timer, now);
        Some(DisplayRequest { change, transition })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use uuid::Uuid;

    fn timer(end_time: DateTime<Utc>) -> Timer {
        Timer {
            id: Uuid::new_v4(),
            title: "Lunch".into(),
            description: None,
            end_time,
            active: true,
            created_at: end_time - Duration::minutes(10),
        }
    }

    fn broadcast(mode: DisplayMode, at: DateTime<Utc>) -> DisplayEvent {
        DisplayEvent::Broadcast(DisplayChange::new(mode, at))
    }

    #[test]
    fn validity_round_trip() {
        let now = Utc::now();
        let t = timer(now + Duration::seconds(10));
        assert!(is_valid_timer(Some(&t), now));
        assert!(!is_valid_timer(Some(&t), now + Duration::seconds(11)));
        assert!(!is_valid_timer(Some(&t), now + Duration::seconds(10)));
        assert!(!is_valid_timer(None, now));
    }

    #[test]
    fn initial_mode_follows_startup_timer() {
        let now = Utc::now();
        let valid = timer(now + Duration::minutes(1));
        let expired = timer(now - Duration::minutes(1));
        let ord = BroadcastOrdering::Arrival;
        assert_eq!(DisplayCoordinator::new(Some(&valid), now, ord).mode(), DisplayMode::Timer);
        assert_eq!(
            DisplayCoordinator::new(Some(&expired), now, ord).mode(),
            DisplayMode::Announcements
        );
        assert_eq!(DisplayCoordinator::new(None, now, ord).mode(), DisplayMode::Announcements);
    }

    #[test]
    fn broadcast_is_applied_when_backed() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);
        let transition = coord.apply(&broadcast(DisplayMode::Timer, now), Some(&t), now);
        assert_eq!(
            transition,
            Some(Transition {
                from: DisplayMode::Announcements,
                to: DisplayMode::Timer,
                cause: TransitionCause::Broadcast,
            })
        );
    }

    #[test]
    fn timer_broadcast_without_valid_timer_is_ignored() {
        let now = Utc::now();
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);
        assert!(coord.would_reject(&DisplayChange::new(DisplayMode::Timer, now), None, now));
        assert_eq!(coord.apply(&broadcast(DisplayMode::Timer, now), None, now), None);
        assert_eq!(coord.mode(), DisplayMode::Announcements);

        let expired = timer(now - Duration::seconds(1));
        assert_eq!(
            coord.apply(&broadcast(DisplayMode::Timer, now), Some(&expired), now),
            None
        );
        assert_eq!(coord.mode(), DisplayMode::Announcements);
    }

    #[test]
    fn tick_forces_announcements_on_expiry() {
        let now = Utc::now();
        let t = timer(now + Duration::seconds(10));
        let mut coord = DisplayCoordinator::new(Some(&t), now, BroadcastOrdering::Arrival);

        assert_eq!(coord.apply(&DisplayEvent::Tick, Some(&t), now + Duration::seconds(9)), None);
        let transition = coord.apply(&DisplayEvent::Tick, Some(&t), now + Duration::seconds(10));
        assert_eq!(transition.map(|t| t.cause), Some(TransitionCause::Expiry));
        assert_eq!(coord.mode(), DisplayMode::Announcements);
    }

    #[test]
    fn never_stays_on_timer_after_expiry_under_any_broadcast_sequence() {
        let start = Utc::now();
        let t = timer(start + Duration::seconds(5));
        let mut coord = DisplayCoordinator::new(Some(&t), start, BroadcastOrdering::Arrival);

        for second in 0..20 {
            let now = start + Duration::seconds(second);
            let mode = if second % 3 == 0 {
                DisplayMode::Timer
            } else {
                DisplayMode::Announcements
            };
            coord.apply(&broadcast(mode, now), Some(&t), now);
            coord.apply(&DisplayEvent::Tick, Some(&t), now);
            if !is_valid_timer(Some(&t), now) {
                assert_eq!(coord.mode(), DisplayMode::Announcements, "at +{second}s");
            }
        }
    }

    #[test]
    fn arrival_order_ignores_timestamps() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);
        coord.apply(&broadcast(DisplayMode::Timer, now), Some(&t), now);
        coord.apply(
            &broadcast(DisplayMode::Announcements, now - Duration::seconds(30)),
            Some(&t),
            now,
        );
        assert_eq!(coord.mode(), DisplayMode::Announcements);
    }

    #[test]
    fn reject_stale_drops_older_broadcasts() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::RejectStale);
        coord.apply(&broadcast(DisplayMode::Timer, now), Some(&t), now);
        let older = broadcast(DisplayMode::Announcements, now - Duration::seconds(30));
        assert_eq!(coord.apply(&older, Some(&t), now), None);
        assert_eq!(coord.mode(), DisplayMode::Timer);
        assert_eq!(coord.state().last_applied, Some(now));
    }

    #[test]
    fn request_is_optimistic_and_skips_no_ops() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);

        assert!(coord.request(DisplayMode::Announcements, Some(&t), now).is_none());

        let req = coord.request(DisplayMode::Timer, Some(&t), now).unwrap();
        assert_eq!(req.change, DisplayChange::new(DisplayMode::Timer, now));
        assert_eq!(req.transition.map(|t| t.cause), Some(TransitionCause::Request));
        assert_eq!(coord.mode(), DisplayMode::Timer);
    }

    #[test]
    fn request_for_timer_without_backing_timer_stays_on_announcements() {
        let now = Utc::now();
        let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);
        let req = coord.request(DisplayMode::Timer, None, now).unwrap();
        assert_eq!(req.transition, None);
        assert_eq!(coord.mode(), DisplayMode::Announcements);
    }

    #[test]
    fn concurrent_requests_converge_to_one_of_the_two() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let a = DisplayChange::new(DisplayMode::Timer, now);
        let b = DisplayChange::new(DisplayMode::Announcements, now);

        // Every session receives both messages, in whichever order the bus delivers.
        for (first, second) in [(&a, &b), (&b, &a)] {
            let mut coord = DisplayCoordinator::new(None, now, BroadcastOrdering::Arrival);
            coord.apply(&DisplayEvent::Broadcast(first.clone()), Some(&t), now);
            coord.apply(&DisplayEvent::Broadcast(second.clone()), Some(&t), now);
            assert_eq!(coord.mode(), second.display);
        }
    }

    #[test]
    fn resync_prefers_fetched_state_but_stays_gated() {
        let now = Utc::now();
        let t = timer(now + Duration::minutes(5));
        let mut coord = DisplayCoordinator::new(Some(&t), now, BroadcastOrdering::Arrival);

        let transition = coord.apply(&DisplayEvent::Resynced { prefer: None }, None, now);
        assert_eq!(transition.map(|t| t.cause), Some(TransitionCause::Resync));
        assert_eq!(coord.mode(), DisplayMode::Announcements);

        let transition = coord.apply(
            &DisplayEvent::Resynced {
                prefer: Some(DisplayMode::Timer),
            },
            Some(&t),
            now,
        );
        assert_eq!(transition.map(|t| t.to), Some(DisplayMode::Timer));
    }
}
