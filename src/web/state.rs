use crate::chat::processor::QueryProcessor;
use crate::config::AppConfig;
use crate::llm::LlmManager;
use crate::session::SessionStore;
use crate::web::templates::init_templates;
use minijinja::Environment;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, info};

/// How often idle sessions are looked for.
const REAP_INTERVAL: Duration = Duration::from_secs(60);

/// Shared application state for the web server
pub struct AppState {
    pub config: AppConfig,
    pub template_env: Environment<'static>,
    pub llm_manager: LlmManager,
    pub sessions: SessionStore,
    pub startup_time: chrono::DateTime<chrono::Utc>,
}

impl AppState {
    pub fn new(config: AppConfig, llm_manager: LlmManager) -> Self {
        let sessions = SessionStore::new(config.upload_dir(), config.chat.clone());

        Self {
            template_env: init_templates(),
            llm_manager,
            sessions,
            startup_time: chrono::Utc::now(),
            config,
        }
    }

    pub fn processor(&self) -> QueryProcessor<'_> {
        QueryProcessor::new(&self.llm_manager, &self.config.chat)
    }

    /// Starts the background task that closes sessions idle past the TTL.
    pub fn spawn_session_reaper(self: &Arc<Self>) -> JoinHandle<()> {
        let state = Arc::clone(self);
        let ttl = chrono::Duration::minutes(state.config.chat.session_ttl_minutes as i64);
        info!("Idle sessions expire after {} minutes", state.config.chat.session_ttl_minutes);

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(REAP_INTERVAL);
            loop {
                interval.tick().await;
                let reaped = state.sessions.reap_idle(ttl).await;
                debug!("Session reaper pass closed {} sessions", reaped);
            }
        })
    }
}
