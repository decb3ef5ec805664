use crate::config::ChatConfig;
use crate::db::connector::{DatabaseConnector, QueryResult, ResultLimits};
use crate::db::schema::{DatabaseSchema, SchemaExtractor};
use crate::db::DbError;
use crate::llm::models::ChatMessage;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::error::Error;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};
use uuid::Uuid;

const ACCEPTED_EXTENSIONS: [&str; 3] = ["db", "sqlite", "sqlite3"];

#[derive(Debug)]
pub enum SessionError {
    UnsupportedFile(String),
    Io(std::io::Error),
    Database(DbError),
}

impl fmt::Display for SessionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionError::UnsupportedFile(name) => write!(
                f,
                "Unsupported file '{}': expected a .db, .sqlite or .sqlite3 file",
                name
            ),
            SessionError::Io(err) => write!(f, "IO error: {}", err),
            SessionError::Database(err) => write!(f, "{}", err),
        }
    }
}

impl Error for SessionError {}

impl From<std::io::Error> for SessionError {
    fn from(err: std::io::Error) -> Self {
        SessionError::Io(err)
    }
}

impl From<DbError> for SessionError {
    fn from(err: DbError) -> Self {
        SessionError::Database(err)
    }
}

/// One question and everything produced while answering it.
#[derive(Debug, Clone, Serialize)]
pub struct ChatTurn {
    pub question: String,
    /// Raw model reply, replayed as assistant context on later questions
    pub raw_response: Option<String>,
    pub sql: String,
    pub explanation: String,
    pub educational_notes: String,
    pub result: Option<QueryResult>,
    pub error: Option<String>,
    pub summary: Option<String>,
    pub asked_at: DateTime<Utc>,
}

impl ChatTurn {
    pub fn failed(question: &str, error: impl Into<String>) -> Self {
        Self {
            question: question.to_string(),
            raw_response: None,
            sql: String::new(),
            explanation: String::new(),
            educational_notes: String::new(),
            result: None,
            error: Some(error.into()),
            summary: None,
            asked_at: Utc::now(),
        }
    }
}

/// An uploaded database and the conversation about it.
pub struct Session {
    pub id: Uuid,
    pub file_name: String,
    pub connector: DatabaseConnector,
    pub schema: DatabaseSchema,
    /// Schema text sent to the model with every question
    pub schema_prompt: String,
    pub created_at: DateTime<Utc>,
    last_activity: RwLock<DateTime<Utc>>,
    history: RwLock<Vec<ChatTurn>>,
    /// Latest successful result from a question or a direct query
    last_result: RwLock<Option<QueryResult>>,
    /// Held while a question is being answered
    pub processing: Mutex<()>,
}

impl Session {
    pub async fn touch(&self) {
        *self.last_activity.write().await = Utc::now();
    }

    pub async fn last_activity(&self) -> DateTime<Utc> {
        *self.last_activity.read().await
    }

    pub async fn history(&self) -> Vec<ChatTurn> {
        self.history.read().await.clone()
    }

    pub async fn push_turn(&self, turn: ChatTurn) {
        self.history.write().await.push(turn);
    }

    pub async fn clear_history(&self) {
        self.history.write().await.clear();
        *self.last_result.write().await = None;
    }

    pub async fn record_result(&self, result: &QueryResult) {
        *self.last_result.write().await = Some(result.clone());
    }

    pub async fn last_result(&self) -> Option<QueryResult> {
        self.last_result.read().await.clone()
    }

    /// Prior turns as a user/assistant transcript for the prompt.
    pub async fn history_messages(&self) -> Vec<ChatMessage> {
        let history = self.history.read().await;
        let mut messages = Vec::with_capacity(history.len() * 2);
        for turn in history.iter() {
            messages.push(ChatMessage::user(turn.question.clone()));
            if let Some(raw) = &turn.raw_response {
                messages.push(ChatMessage::assistant(raw.clone()));
            }
        }
        messages
    }
}

/// All live sessions, keyed by id.
pub struct SessionStore {
    upload_dir: PathBuf,
    config: ChatConfig,
    sessions: RwLock<HashMap<Uuid, Arc<Session>>>,
}

impl SessionStore {
    pub fn new(upload_dir: PathBuf, config: ChatConfig) -> Self {
        Self {
            upload_dir,
            config,
            sessions: RwLock::new(HashMap::new()),
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    /// Stores an uploaded database file and opens a session on it.
    pub async fn create(&self, file_name: &str, bytes: &[u8]) -> Result<Arc<Session>, SessionError> {
        let display_name = Path::new(file_name)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(file_name)
            .to_string();

        if !has_accepted_extension(&display_name) {
            return Err(SessionError::UnsupportedFile(display_name));
        }

        tokio::fs::create_dir_all(&self.upload_dir).await?;
        let id = Uuid::new_v4();
        let path = self.upload_dir.join(format!("db_{}.db", id.simple()));
        tokio::fs::write(&path, bytes).await?;
        info!("Stored upload '{}' ({} bytes) at {}", display_name, bytes.len(), path.display());

        let opened = tokio::task::spawn_blocking({
            let path = path.clone();
            let config = self.config.clone();
            move || -> Result<(DatabaseConnector, DatabaseSchema), DbError> {
                let connector = DatabaseConnector::open(&path, config.pool_size)?;
                let limits = ResultLimits {
                    max_rows: config.max_sample_rows,
                    max_cell_chars: config.max_cell_chars,
                };
                let schema = SchemaExtractor::new(&connector, config.max_sample_rows, limits).full_schema()?;
                Ok((connector, schema))
            }
        })
        .await
        .map_err(DbError::from)
        .and_then(|opened| opened);

        let (connector, schema) = match opened {
            Ok(opened) => opened,
            Err(e) => {
                warn!("Rejecting upload '{}': {}", display_name, e);
                if let Err(remove_err) = tokio::fs::remove_file(&path).await {
                    warn!("Failed to remove rejected upload {}: {}", path.display(), remove_err);
                }
                return Err(e.into());
            }
        };

        let now = Utc::now();
        let session = Arc::new(Session {
            id,
            file_name: display_name,
            schema_prompt: schema.to_prompt(),
            connector,
            schema,
            created_at: now,
            last_activity: RwLock::new(now),
            history: RwLock::new(Vec::new()),
            last_result: RwLock::new(None),
            processing: Mutex::new(()),
        });

        self.sessions.write().await.insert(id, Arc::clone(&session));
        info!("Created session {} with {} tables", id, session.schema.tables.len());
        Ok(session)
    }

    /// Looks a session up and marks it active.
    pub async fn get(&self, id: &Uuid) -> Option<Arc<Session>> {
        let session = self.sessions.read().await.get(id).cloned()?;
        session.touch().await;
        Some(session)
    }

    /// Ends a session and deletes its copy of the database.
    pub async fn remove(&self, id: &Uuid) -> bool {
        let Some(session) = self.sessions.write().await.remove(id) else {
            return false;
        };

        let path = session.connector.path().to_path_buf();
        drop(session);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!("Deleted {}", path.display()),
            Err(e) => warn!("Failed to delete {}: {}", path.display(), e),
        }
        info!("Closed session {}", id);
        true
    }

    /// Closes sessions idle for longer than `ttl`; returns how many were closed.
    pub async fn reap_idle(&self, ttl: chrono::Duration) -> usize {
        let cutoff = Utc::now() - ttl;
        let mut expired = Vec::new();
        for (id, session) in self.sessions.read().await.iter() {
            if session.last_activity().await < cutoff {
                expired.push(*id);
            }
        }

        for id in &expired {
            self.remove(id).await;
        }
        if !expired.is_empty() {
            info!("Reaped {} idle sessions", expired.len());
        }
        expired.len()
    }

    pub async fn len(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Deletes uploaded database files that no live session owns.
    pub async fn purge_stale_uploads(&self) -> std::io::Result<usize> {
        let mut entries = match tokio::fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(e) => return Err(e),
        };

        let live: Vec<PathBuf> = self
            .sessions
            .read()
            .await
            .values()
            .map(|session| session.connector.path().to_path_buf())
            .collect();

        let mut removed = 0;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            let is_upload = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with("db_") && n.ends_with(".db"))
                .unwrap_or(false);
            if is_upload && !live.contains(&path) {
                tokio::fs::remove_file(&path).await?;
                removed += 1;
            }
        }
        Ok(removed)
    }
}

fn has_accepted_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ACCEPTED_EXTENSIONS.iter().any(|ok| ext.eq_ignore_ascii_case(ok)))
        .unwrap_or(false)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::db::connector::tests::fixture_db;

    /// Bytes of the fixture database, as a browser would upload them.
    pub(crate) fn fixture_bytes() -> Vec<u8> {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_db(dir.path());
        std::fs::read(path).unwrap()
    }

    fn store(dir: &Path) -> SessionStore {
        SessionStore::new(dir.join("uploads"), AppConfig::default().chat)
    }

    #[tokio::test]
    async fn upload_creates_session_with_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let session = store.create("store.sqlite", &fixture_bytes()).await.unwrap();

        assert_eq!(session.file_name, "store.sqlite");
        assert_eq!(session.schema.table_names(), vec!["customers", "orders"]);
        assert!(session.schema_prompt.contains("CREATE TABLE customers"));
        assert!(session.connector.path().exists());
        assert_eq!(store.len().await, 1);
        assert!(store.get(&session.id).await.is_some());
    }

    #[tokio::test]
    async fn wrong_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store.create("store.csv", &fixture_bytes()).await.err().unwrap();
        assert!(matches!(err, SessionError::UnsupportedFile(_)));
    }

    #[tokio::test]
    async fn garbage_upload_is_rejected_and_cleaned_up() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());

        let err = store
            .create("broken.db", b"this is not a sqlite file at all, only some words")
            .await
            .err()
            .unwrap();
        assert!(matches!(err, SessionError::Database(DbError::InvalidDatabase(_))));

        let leftovers = std::fs::read_dir(store.upload_dir()).unwrap().count();
        assert_eq!(leftovers, 0);
        assert_eq!(store.len().await, 0);
    }

    #[tokio::test]
    async fn remove_deletes_the_uploaded_copy() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("store.db", &fixture_bytes()).await.unwrap();
        let path = session.connector.path().to_path_buf();
        let id = session.id;
        drop(session);

        assert!(store.remove(&id).await);
        assert!(!path.exists());
        assert!(!store.remove(&id).await);
        assert!(store.get(&id).await.is_none());
    }

    #[tokio::test]
    async fn idle_sessions_are_reaped() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let stale = store.create("a.db", &fixture_bytes()).await.unwrap();
        let fresh = store.create("b.db", &fixture_bytes()).await.unwrap();

        *stale.last_activity.write().await = Utc::now() - chrono::Duration::minutes(90);

        let reaped = store.reap_idle(chrono::Duration::minutes(60)).await;
        assert_eq!(reaped, 1);
        assert!(store.get(&stale.id).await.is_none());
        assert!(store.get(&fresh.id).await.is_some());
    }

    #[tokio::test]
    async fn transcript_skips_turns_without_a_reply() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("store.db", &fixture_bytes()).await.unwrap();

        let mut answered = ChatTurn::failed("first", "ignored");
        answered.error = None;
        answered.raw_response = Some("```sql\nSELECT 1;\n```".to_string());
        session.push_turn(answered).await;
        session.push_turn(ChatTurn::failed("second", "LLM down")).await;

        let messages = session.history_messages().await;
        assert_eq!(
            messages,
            vec![
                ChatMessage::user("first"),
                ChatMessage::assistant("```sql\nSELECT 1;\n```"),
                ChatMessage::user("second"),
            ]
        );
    }

    #[tokio::test]
    async fn stale_uploads_are_purged_but_live_ones_kept() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("store.db", &fixture_bytes()).await.unwrap();

        let orphan = store.upload_dir().join("db_0123456789abcdef.db");
        std::fs::write(&orphan, b"left over").unwrap();
        let unrelated = store.upload_dir().join("readme.txt");
        std::fs::write(&unrelated, b"keep me").unwrap();

        assert_eq!(store.purge_stale_uploads().await.unwrap(), 1);
        assert!(!orphan.exists());
        assert!(unrelated.exists());
        assert!(session.connector.path().exists());
    }

    #[tokio::test]
    async fn recorded_result_is_kept_until_history_is_cleared() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let session = store.create("store.db", &fixture_bytes()).await.unwrap();
        assert!(session.last_result().await.is_none());

        let result = session
            .connector
            .execute_query("SELECT COUNT(*) AS n FROM customers", ResultLimits::default())
            .await
            .unwrap();
        session.record_result(&result).await;
        assert_eq!(session.last_result().await.unwrap().rows, result.rows);

        session.clear_history().await;
        assert!(session.last_result().await.is_none());
    }
}
