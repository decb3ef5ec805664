use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
};
use minijinja::context;
use std::sync::Arc;

use crate::web::state::AppState;
use crate::web::templates::render_template;

// Main UI entry point
pub async fn index_handler(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let html = render_template(
        &state.template_env,
        "index.html",
        context! {
            app_name => "SQLite Chat",
            version => env!("CARGO_PKG_VERSION"),
            model => state.llm_manager.model(),
            max_upload_mb => state.config.chat.max_upload_mb,
            allow_writes => state.config.chat.allow_writes,
        },
    );
    Html(html)
}

pub async fn not_found(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let html = render_template(
        &state.template_env,
        "error.html",
        context! { status => 404, message => "Page not found" },
    );
    (StatusCode::NOT_FOUND, Html(html))
}
