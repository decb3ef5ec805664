use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use super::handlers;
use super::static_files::static_handler;
use super::state::AppState;

// UI Routes - web interface
pub fn ui_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/", get(handlers::ui::index_handler))
        .route("/static/{*path}", get(static_handler))
}

// API Routes - REST API used by the chat page
pub fn api_routes() -> Router<Arc<AppState>> {
    Router::new().nest(
        "/api",
        Router::new()
            // Database upload and session lifecycle
            .route("/sessions", post(handlers::api::upload_database))
            .route(
                "/sessions/{id}",
                get(handlers::api::get_session).delete(handlers::api::delete_session),
            )
            .route("/sessions/{id}/schema", get(handlers::api::get_schema))
            // Questions and direct SQL
            .route("/sessions/{id}/ask", post(handlers::api::ask_question))
            .route("/sessions/{id}/query", post(handlers::api::execute_query))
            // Conversation
            .route(
                "/sessions/{id}/history",
                get(handlers::api::get_history).delete(handlers::api::clear_history),
            )
            // Data export
            .route("/sessions/{id}/export.csv", get(handlers::api::export_csv))
            // System status
            .route("/status", get(handlers::api::system_status)),
    )
}
