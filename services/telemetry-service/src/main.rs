mod app;
mod config;
mod db;
mod handlers;
mod models;
mod parser;
mod service;
mod state;

use std::process::ExitCode;

use telem_common::{bind_listener, init_tracing, shutdown_signal};

use crate::config::TelemConfig;
use crate::state::AppState;

#[tokio::main]
async fn main() -> ExitCode {
    let _guards = init_tracing("telemetry-service");

    let config = match TelemConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            tracing::error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let db = match db::open(&config.db_path) {
        Ok(db) => db,
        Err(err) => {
            tracing::error!(error = %err, path = %config.db_path.display(), "open database failed");
            return ExitCode::FAILURE;
        }
    };
    match db::count_rows(&db) {
        Ok(rows) => tracing::info!(path = %config.db_path.display(), rows, "telemetry store ready"),
        Err(err) => {
            tracing::error!(error = %err, "telemetry table unreadable");
            return ExitCode::FAILURE;
        }
    }

    let port = config.port;
    let app = app::build_router(AppState::new(db, config));
    let listener = match bind_listener(port).await {
        Ok(listener) => listener,
        Err(err) => {
            tracing::error!(error = %err, port, "bind failed");
            return ExitCode::FAILURE;
        }
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
    {
        tracing::error!(error = %err, "server error");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
