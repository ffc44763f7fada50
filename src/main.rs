use std::sync::Arc;

use axum::{
    http::{header, HeaderValue, Method},
    routing::{get, post, put},
    Router,
};
use tower_http::cors::{AllowHeaders, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use board_api::{
    config::Config,
    db,
    models::feed::Channels,
    routes,
    services::{
        board::BoardService, bus::RedisBus, feed::ChangeFeed, metrics, store::PgRecordStore,
    },
    AppState,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let config = Arc::new(config);

    let pool = db::create_pool(&config.database_url).await?;
    db::run_migrations(&pool).await?;
    info!("Database connected and migrations applied");

    let redis_client = redis::Client::open(config.redis_url.as_str())?;
    let bus = RedisBus::connect(redis_client).await?;
    info!("Redis connected");

    let channels = Channels::new(&config.board_channel);
    info!(
        "Board channels: {}, {}, {}",
        channels.announcements, channels.timers, channels.display
    );
    let feed = ChangeFeed::new(bus, channels, config.publish_timeout());
    let board = BoardService::new(PgRecordStore::new(pool.clone()), feed);

    metrics::start(pool);

    let state = AppState {
        board,
        config: config.clone(),
    };

    // Allow the configured board origin; localhost is always allowed for development.
    let base_url = config.app_base_url.clone();
    let cors_origin = AllowOrigin::predicate(move |origin: &HeaderValue, _| {
        let o = match origin.to_str() {
            Ok(s) => s,
            Err(_) => return false,
        };
        o.starts_with("http://localhost") || o.starts_with("http://127.0.0.1") || o == base_url
    });

    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE, Method::OPTIONS])
        .allow_headers(AllowHeaders::list([
            header::CONTENT_TYPE,
            header::ACCEPT,
            header::HeaderName::from_static("x-admin-key"),
        ]))
        .allow_origin(cors_origin);

    let app = Router::new()
        .route("/health", get(routes::health::health_check))
        .route("/metrics", get(routes::metrics::metrics_handler))
        // Read side
        .route("/announcements", get(routes::announcements::list_announcements))
        .route("/timer", get(routes::timers::get_timer))
        .route("/ws", get(routes::websocket::ws_handler))
        // Admin
        .route("/admin/announcements", post(routes::announcements::create_announcement))
        .route(
            "/admin/announcements/{id}",
            put(routes::announcements::update_announcement)
                .delete(routes::announcements::delete_announcement),
        )
        .route(
            "/admin/timer",
            put(routes::timers::set_timer).delete(routes::timers::clear_timer),
        )
        .route("/admin/display", put(routes::display::set_display))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state);

    let addr = format!("{}:{}", config.host, config.port);
    info!("Announcement board API listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
