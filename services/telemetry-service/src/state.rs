use std::sync::Arc;
use tokio::sync::Mutex;

use rusqlite::Connection;

use crate::config::TelemConfig;

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Connection>>,
    pub config: Arc<TelemConfig>,
}

impl AppState {
    pub fn new(db: Connection, config: TelemConfig) -> Self {
        Self {
            db: Arc::new(Mutex::new(db)),
            config: Arc::new(config),
        }
    }
}
