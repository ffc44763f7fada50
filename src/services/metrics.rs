use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_gauge, Counter, CounterVec, Gauge,
};
use sqlx::PgPool;
use tracing::{info, warn};

lazy_static! {
    // ── Session events ──────────────────────────────────────────────────────
    pub static ref VIEWER_SESSIONS_GAUGE: Gauge = register_gauge!(
        "board_viewer_sessions",
        "Connected viewer sessions"
    ).unwrap();

    pub static ref DISPLAY_TRANSITIONS_COUNTER: CounterVec = register_counter_vec!(
        "board_display_transitions_total",
        "Display mode transitions by cause and target mode",
        &["cause", "to"]
    ).unwrap();

    pub static ref BROADCASTS_COUNTER: CounterVec = register_counter_vec!(
        "board_broadcasts_total",
        "Messages published on the board channels by kind and result",
        &["kind", "result"]
    ).unwrap();

    pub static ref BROADCASTS_IGNORED_COUNTER: Counter = register_counter!(
        "board_broadcasts_ignored_total",
        "Timer display broadcasts refused because no valid timer was held"
    ).unwrap();

    pub static ref RESYNCS_COUNTER: CounterVec = register_counter_vec!(
        "board_resyncs_total",
        "Session resyncs from the record store by trigger and result",
        &["trigger", "result"]
    ).unwrap();

    pub static ref FEED_EVENTS_COUNTER: CounterVec = register_counter_vec!(
        "board_feed_events_total",
        "Change Feed events applied by sessions",
        &["table", "event"]
    ).unwrap();

    // ── Store state ─────────────────────────────────────────────────────────
    pub static ref ANNOUNCEMENTS_GAUGE: Gauge = register_gauge!(
        "board_announcements",
        "Announcements currently stored"
    ).unwrap();

    pub static ref ACTIVE_TIMERS_GAUGE: Gauge = register_gauge!(
        "board_active_timer_rows",
        "Timer rows flagged active (above 1 means racing admin writes)"
    ).unwrap();
}

/// Spawn the background store collector (refreshes every minute).
pub fn start(pool: PgPool) {
    tokio::spawn(async move {
        loop {
            if let Err(e) = collect(&pool).await {
                warn!("Metrics: collection failed: {}", e);
            }
            tokio::time::sleep(tokio::time::Duration::from_secs(60)).await;
        }
    });
}

async fn collect(pool: &PgPool) -> anyhow::Result<()> {
    let announcements: i64 = sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM announcements")
        .fetch_one(pool)
        .await?;
    ANNOUNCEMENTS_GAUGE.set(announcements as f64);

    let active: i64 =
        sqlx::query_scalar("SELECT COUNT(*)::BIGINT FROM timers WHERE active = TRUE")
            .fetch_one(pool)
            .await?;
    ACTIVE_TIMERS_GAUGE.set(active as f64);

    if active > 1 {
        info!("Metrics: {} timer rows are active, newest one is authoritative", active);
    }
    Ok(())
}
