use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};

mod chat;
mod config;
mod db;
mod llm;
mod session;
mod util;
mod web;

use crate::config::{AppConfig, CliArgs};
use crate::llm::LlmManager;
use crate::util::logging::init_tracing;
use crate::web::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let args = CliArgs::parse();
    let config = AppConfig::new(&args).map_err(|e| {
        error!("Failed to load configuration: {}", e);
        e
    })?;

    let upload_dir = config.upload_dir();
    if !upload_dir.exists() {
        info!("Creating upload directory: {}", upload_dir.display());
        std::fs::create_dir_all(&upload_dir)?;
    }

    info!("Using LLM backend '{}' with model {}", config.llm.backend, config.llm.model);
    let llm_manager = LlmManager::new(&config.llm).map_err(|e| {
        error!("Failed to initialize LLM backend: {}", e);
        e
    })?;

    let web_config = config.web.clone();
    let app_state = Arc::new(AppState::new(config, llm_manager));

    // Uploads from a previous run have no session any more
    match app_state.sessions.purge_stale_uploads().await {
        Ok(0) => {}
        Ok(removed) => info!(
            "Removed {} stale uploads from {}",
            removed,
            app_state.sessions.upload_dir().display()
        ),
        Err(e) => warn!("Failed to clean upload directory: {}", e),
    }

    let _reaper = app_state.spawn_session_reaper();

    info!("Starting SQLite Chat server on {}:{}", web_config.host, web_config.port);
    if let Err(e) = web::run_server(web_config, app_state).await {
        error!("Server error: {}", e);
        return Err(e.into());
    }

    info!("Server stopped gracefully");
    Ok(())
}
