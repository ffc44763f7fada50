pub mod config;
pub mod db;
pub mod middleware;
pub mod models;
pub mod routes;
pub mod services;

use std::sync::Arc;

use config::Config;
use services::{board::BoardService, bus::RedisBus, store::PgRecordStore};

/// Application state shared across all handlers.
#[derive(Clone)]
pub struct AppState {
    pub board: BoardService<PgRecordStore, RedisBus>,
    pub config: Arc<Config>,
}
