use axum::{
    extract::{Multipart, Path, State},
    http::{header, StatusCode},
    response::IntoResponse,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::chat::formatter::to_csv;
use crate::chat::processor::{ChatError, LLM_FAILURE_MESSAGE};
use crate::db::connector::QueryResult;
use crate::db::schema::TableSchema;
use crate::llm::parser::extract_sql;
use crate::db::DbError;
use crate::session::{ChatTurn, Session, SessionError};
use crate::web::state::AppState;

// Request types

#[derive(Debug, Deserialize)]
pub struct ExecuteQueryRequest {
    pub query: String,
}

#[derive(Debug, Deserialize)]
pub struct AskRequest {
    pub question: String,
}

// Response types

#[derive(Debug, Serialize)]
pub struct SessionInfo {
    pub session_id: Uuid,
    pub file_name: String,
    pub tables: Vec<String>,
    pub created_at: DateTime<Utc>,
    pub turns: usize,
}

#[derive(Debug, Serialize)]
pub struct SchemaView {
    pub summary: String,
    pub tables: Vec<TableSchema>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub session_count: usize,
    pub backend: String,
    pub model: String,
    pub allow_writes: bool,
}

async fn session_info(session: &Session) -> SessionInfo {
    SessionInfo {
        session_id: session.id,
        file_name: session.file_name.clone(),
        tables: session.schema.table_names(),
        created_at: session.created_at,
        turns: session.history().await.len(),
    }
}

async fn find_session(state: &AppState, id: &Uuid) -> Result<Arc<Session>, (StatusCode, String)> {
    state
        .sessions
        .get(id)
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "Session not found".to_string()))
}

// Sessions

pub async fn upload_database(
    State(state): State<Arc<AppState>>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut upload = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| (StatusCode::BAD_REQUEST, format!("Invalid upload: {}", e)))?
    {
        if field.name() != Some("file") {
            debug!("Skipping multipart field {:?}", field.name());
            continue;
        }

        let file_name = field
            .file_name()
            .map(|name| name.to_string())
            .ok_or_else(|| (StatusCode::BAD_REQUEST, "Uploaded file has no name".to_string()))?;

        let bytes = field
            .bytes()
            .await
            .map_err(|e| (StatusCode::BAD_REQUEST, format!("Failed to read upload: {}", e)))?;

        upload = Some((file_name, bytes));
        break;
    }

    let (file_name, bytes) =
        upload.ok_or_else(|| (StatusCode::BAD_REQUEST, "Missing 'file' field".to_string()))?;

    info!("Received database upload '{}' ({} bytes)", file_name, bytes.len());

    let session = state.sessions.create(&file_name, &bytes).await.map_err(|e| {
        warn!("Rejected upload '{}': {}", file_name, e);
        match e {
            SessionError::UnsupportedFile(_) | SessionError::Database(DbError::InvalidDatabase(_)) => {
                (StatusCode::BAD_REQUEST, e.to_string())
            }
            _ => (StatusCode::INTERNAL_SERVER_ERROR, format!("Failed to open database: {}", e)),
        }
    })?;

    Ok((StatusCode::CREATED, Json(session_info(&session).await)))
}

pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SessionInfo>, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;
    Ok(Json(session_info(&session).await))
}

pub async fn delete_session(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    if state.sessions.remove(&id).await {
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err((StatusCode::NOT_FOUND, "Session not found".to_string()))
    }
}

pub async fn get_schema(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<SchemaView>, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;

    Ok(Json(SchemaView {
        summary: session.schema.to_summary(),
        tables: session.schema.tables.clone(),
    }))
}

// Questions and queries

pub async fn ask_question(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<AskRequest>,
) -> Result<Json<ChatTurn>, (StatusCode, String)> {
    let question = payload.question.trim();
    if question.is_empty() {
        return Err((StatusCode::BAD_REQUEST, "Question must not be empty".to_string()));
    }

    let session = find_session(&state, &id).await?;
    debug!("Session {} question: {}", id, question);

    match state.processor().process_question(&session, question).await {
        Ok(turn) => Ok(Json(turn)),
        Err(ChatError::Busy) => Err((
            StatusCode::CONFLICT,
            "A question is already being processed for this session".to_string(),
        )),
        Err(ChatError::Llm(e)) => {
            error!("LLM request failed for session {}: {}", id, e);
            Err((StatusCode::BAD_GATEWAY, LLM_FAILURE_MESSAGE.to_string()))
        }
    }
}

pub async fn execute_query(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
    Json(payload): Json<ExecuteQueryRequest>,
) -> Result<Json<QueryResult>, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;

    // Pasted model replies keep their ```sql fences
    let fenced = extract_sql(&payload.query);
    let query = if fenced.is_empty() { payload.query.as_str() } else { fenced.as_str() };
    info!("Executing SQL query for session {}: {}", id, query);

    state
        .processor()
        .run_sql(&session, query)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::BAD_REQUEST, e))
}

// History

pub async fn get_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<Json<Vec<ChatTurn>>, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;
    Ok(Json(session.history().await))
}

pub async fn clear_history(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;
    session.clear_history().await;
    Ok(StatusCode::NO_CONTENT)
}

// Export

pub async fn export_csv(
    State(state): State<Arc<AppState>>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let session = find_session(&state, &id).await?;

    let result = session
        .last_result()
        .await
        .ok_or_else(|| (StatusCode::NOT_FOUND, "No query results to export".to_string()))?;

    let body = to_csv(&result).map_err(|e| {
        error!("CSV export failed: {}", e);
        (StatusCode::INTERNAL_SERVER_ERROR, format!("Export failed: {}", e))
    })?;

    Ok((
        [
            (header::CONTENT_TYPE, "text/csv; charset=utf-8"),
            (header::CONTENT_DISPOSITION, "attachment; filename=\"query_results.csv\""),
        ],
        body,
    ))
}

// System status
pub async fn system_status(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SystemStatus>, (StatusCode, String)> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        session_count: state.sessions.len().await,
        backend: state.llm_manager.backend().to_string(),
        model: state.llm_manager.model().to_string(),
        allow_writes: state.config.chat.allow_writes,
    }))
}
