/// Seed the board with sample announcements (and optionally a timer) for demos.
///
/// Usage: seed-board [--timer-minutes N] [--publish]
///   --timer-minutes N : also set an active timer ending N minutes from now
///   --publish         : announce the writes on Redis so connected screens update live

use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::Parser;

use board_api::{
    db,
    models::{
        announcement::{AnnouncementRequest, AnnouncementType},
        feed::Channels,
        timer::SetTimerRequest,
    },
    services::{
        board::BoardService,
        bus::RedisBus,
        feed::ChangeFeed,
        store::{PgRecordStore, RecordStore},
    },
};

#[derive(Parser)]
#[command(name = "seed-board", about = "Insert sample announcements into the board database")]
struct Args {
    /// Set an active timer ending this many minutes from now
    #[arg(long, value_parser = clap::value_parser!(i64).range(1..))]
    timer_minutes: Option<i64>,

    /// Publish Change Feed events for the inserted rows
    #[arg(long)]
    publish: bool,
}

fn samples() -> Vec<AnnouncementRequest> {
    vec![
        AnnouncementRequest {
            title: "Welcome".into(),
            content: "Doors are open, grab a badge at the front desk.".into(),
            kind: AnnouncementType::Regular,
            image_url: None,
            video_url: None,
        },
        AnnouncementRequest {
            title: "Workshops".into(),
            content: "Room B hosts the intro session at 14:00.".into(),
            kind: AnnouncementType::Regular,
            image_url: None,
            video_url: None,
        },
        AnnouncementRequest {
            title: "Parking".into(),
            content: "The north lot closes at 18:00, please move your car.".into(),
            kind: AnnouncementType::Emergency,
            image_url: None,
            video_url: None,
        },
    ]
}

fn timer_request(minutes: i64, now: DateTime<Utc>) -> anyhow::Result<SetTimerRequest> {
    SetTimerRequest {
        title: "Next session".into(),
        description: Some("Seeded countdown".into()),
        end_time: now + chrono::Duration::minutes(minutes),
    }
    .normalized(now)
    .map_err(anyhow::Error::msg)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let args = Args::parse();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL required")?;
    let pool = db::create_pool(&database_url).await?;
    db::run_migrations(&pool).await?;
    let store = PgRecordStore::new(pool);

    let timer = args
        .timer_minutes
        .map(|minutes| timer_request(minutes, Utc::now()))
        .transpose()?;

    if args.publish {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://127.0.0.1:6379".into());
        let channel = std::env::var("BOARD_CHANNEL").unwrap_or_else(|_| "board".into());
        let bus = RedisBus::connect(redis::Client::open(redis_url.as_str())?).await?;
        let feed = ChangeFeed::new(bus, Channels::new(&channel), Duration::from_secs(5));
        let board = BoardService::new(store, feed);

        for req in samples() {
            let written = board.post_announcement(req).await?;
            tracing::info!("Seeded announcement {}", written.record.id);
            if let Err(e) = written.broadcast {
                tracing::warn!("Change Feed publish failed: {}", e);
            }
        }
        if let Some(req) = timer {
            let written = board.set_timer(req).await?;
            tracing::info!("Seeded timer {} ending {}", written.record.id, written.record.end_time);
        }
    } else {
        for req in samples() {
            let row = store.insert_announcement(&req).await?;
            tracing::info!("Seeded announcement {}", row.id);
        }
        if let Some(req) = timer {
            let (_, row) = store.replace_active_timer(&req).await?;
            tracing::info!("Seeded timer {} ending {}", row.id, row.end_time);
        }
    }

    tracing::info!("Board seed completed");
    Ok(())
}
