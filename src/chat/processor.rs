use crate::chat::formatter::summarize;
use crate::config::ChatConfig;
use crate::db::connector::{QueryResult, ResultLimits};
use crate::llm::parser::parse_response;
use crate::llm::prompt::PromptBuilder;
use crate::llm::{LlmError, LlmManager};
use crate::session::{ChatTurn, Session};
use crate::util::sql::{mask_literals, normalize_statement, strip_comments};
use chrono::Utc;
use regex::Regex;
use rusqlite::Connection;
use std::error::Error;
use std::fmt;
use std::sync::LazyLock;
use tracing::{debug, error, info, warn};

pub const LLM_FAILURE_MESSAGE: &str = "Failed to generate response from LLM";
pub const NO_SQL_MESSAGE: &str = "Could not extract SQL query from LLM response";

static READ_QUERY: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^(SELECT|WITH|PRAGMA|EXPLAIN)\b").expect("valid read-query regex"));

static HARMFUL_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
    [r"(?i);\s*DROP\s+TABLE", r"(?i)INTO\s+OUTFILE", r"(?i)INTO\s+DUMPFILE"]
        .iter()
        .map(|p| Regex::new(p).expect("valid harmful-pattern regex"))
        .collect()
});

#[derive(Debug)]
pub enum ChatError {
    /// Another question on the same session is still being answered
    Busy,
    Llm(LlmError),
}

impl fmt::Display for ChatError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChatError::Busy => write!(f, "Previous question is still being processed"),
            ChatError::Llm(err) => write!(f, "{}", err),
        }
    }
}

impl Error for ChatError {}

/// True for statements that only read: SELECT, WITH, PRAGMA, EXPLAIN.
pub fn is_read_query(sql: &str) -> bool {
    READ_QUERY.is_match(strip_comments(sql).trim())
}

/// Checks policy and asks SQLite to compile the statement without running it.
pub fn validate_query(conn: &Connection, sql: &str, allow_writes: bool) -> Result<(), String> {
    let statement = normalize_statement(sql);
    if statement.is_empty() {
        return Err("Empty query".to_string());
    }

    // Only the statement that would run is checked, literals excluded
    let code = mask_literals(&statement);
    if HARMFUL_PATTERNS.iter().any(|re| re.is_match(&code)) {
        return Err("Query contains potentially harmful operations".to_string());
    }

    let stmt = conn.prepare(&statement).map_err(|e| e.to_string())?;
    if !allow_writes && !(is_read_query(&statement) && stmt.readonly()) {
        return Err("Only read-only queries are allowed on this server".to_string());
    }
    Ok(())
}

/// Runs the question → SQL → result pipeline for one session.
pub struct QueryProcessor<'a> {
    llm: &'a LlmManager,
    config: &'a ChatConfig,
}

impl<'a> QueryProcessor<'a> {
    pub fn new(llm: &'a LlmManager, config: &'a ChatConfig) -> Self {
        Self { llm, config }
    }

    fn limits(&self) -> ResultLimits {
        ResultLimits {
            max_rows: self.config.max_result_rows,
            max_cell_chars: self.config.max_cell_chars,
        }
    }

    /// Validates then executes `sql`, remembering the result for export.
    /// Errors are SQLite's message verbatim.
    pub async fn run_sql(&self, session: &Session, sql: &str) -> Result<QueryResult, String> {
        let connector = session.connector.clone();
        let allow_writes = self.config.allow_writes;
        let owned_sql = sql.to_string();

        tokio::task::spawn_blocking(move || {
            let conn = connector.connection().map_err(|e| e.to_string())?;
            validate_query(&conn, &owned_sql, allow_writes)
        })
        .await
        .map_err(|e| e.to_string())??;

        let result = session
            .connector
            .execute_query(sql, self.limits())
            .await
            .map_err(|e| e.to_string())?;

        session.record_result(&result).await;
        Ok(result)
    }

    pub async fn process_question(&self, session: &Session, question: &str) -> Result<ChatTurn, ChatError> {
        let _processing = session.processing.try_lock().map_err(|_| ChatError::Busy)?;
        info!("Session {} asked: {}", session.id, question);

        let history = session.history_messages().await;
        let messages = PromptBuilder::new(&session.schema_prompt, self.config.max_history_length)
            .build_messages(question, &history);
        debug!("Prompt has {} messages", messages.len());

        let reply = match self.llm.complete(&messages).await {
            Ok(reply) => reply,
            Err(e) => {
                error!("LLM request failed: {}", e);
                session.push_turn(ChatTurn::failed(question, LLM_FAILURE_MESSAGE)).await;
                return Err(ChatError::Llm(e));
            }
        };

        let parsed = parse_response(&reply);
        let mut turn = ChatTurn {
            question: question.to_string(),
            raw_response: Some(parsed.raw),
            sql: parsed.sql,
            explanation: parsed.explanation,
            educational_notes: parsed.educational_notes,
            result: None,
            error: None,
            summary: None,
            asked_at: Utc::now(),
        };

        if turn.sql.is_empty() {
            warn!("No SQL found in LLM reply");
            turn.error = Some(NO_SQL_MESSAGE.to_string());
        } else {
            info!("Extracted SQL query: {}", turn.sql);
            match self.run_sql(session, &turn.sql).await {
                Ok(result) => {
                    turn.summary = Some(summarize(&result));
                    turn.result = Some(result);
                }
                Err(e) => {
                    warn!("SQL execution error: {}", e);
                    turn.error = Some(format!("SQL execution error: {}", e));
                }
            }
        }

        session.push_turn(turn.clone()).await;
        Ok(turn)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AppConfig;
    use crate::llm::models::Role;
    use crate::llm::testing::ScriptedProvider;
    use crate::session::tests::fixture_bytes;
    use crate::session::SessionStore;
    use serde_json::Value;
    use std::sync::Arc;

    async fn fixture_session(dir: &std::path::Path) -> (SessionStore, Arc<Session>) {
        let store = SessionStore::new(dir.join("uploads"), AppConfig::default().chat);
        let session = store.create("store.db", &fixture_bytes()).await.unwrap();
        (store, session)
    }

    #[test]
    fn read_queries_are_recognised() {
        assert!(is_read_query("SELECT * FROM film"));
        assert!(is_read_query("  -- comment\n with t AS (SELECT 1) SELECT * FROM t"));
        assert!(is_read_query("PRAGMA table_info(film)"));
        assert!(is_read_query("explain query plan select 1"));
        assert!(!is_read_query("DELETE FROM film"));
        assert!(!is_read_query("SELECTED"));
    }

    #[tokio::test]
    async fn generated_sql_is_valid_and_returns_expected_rows() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::replying(
            "```sql\nSELECT c.name, COUNT(o.id) AS orders\nFROM customers c\nJOIN orders o ON o.customer_id = c.id\nGROUP BY c.name\nORDER BY c.name;\n```\nCounts orders per customer.",
        )));
        let config = AppConfig::default().chat;
        let processor = QueryProcessor::new(&llm, &config);

        let turn = processor
            .process_question(&session, "How many orders has each customer placed?")
            .await
            .unwrap();

        let conn = session.connector.connection().unwrap();
        assert_eq!(validate_query(&conn, &turn.sql, false), Ok(()));

        assert!(turn.error.is_none());
        let result = turn.result.unwrap();
        assert_eq!(result.columns, vec!["name", "orders"]);
        assert_eq!(result.row_count, 3);
        assert_eq!(result.rows[0], vec![Value::from("Alice"), Value::from(2)]);
        assert_eq!(turn.explanation, "Counts orders per customer.");
        assert!(turn.summary.unwrap().starts_with("3 row(s) returned"));
        assert_eq!(session.history().await.len(), 1);
    }

    #[tokio::test]
    async fn reply_without_sql_is_a_visible_error() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::replying(
            "I'm not sure what you mean by that. Could you rephrase?",
        )));
        let config = AppConfig::default().chat;

        let turn = QueryProcessor::new(&llm, &config)
            .process_question(&session, "what is the meaning of life?")
            .await
            .unwrap();

        assert_eq!(turn.error.as_deref(), Some(NO_SQL_MESSAGE));
        assert!(turn.result.is_none());
        assert_eq!(turn.explanation, "I'm not sure what you mean by that. Could you rephrase?");
    }

    #[tokio::test]
    async fn failing_sql_is_reported_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::replying(
            "```sql\nSELECT salary FROM employees;\n```",
        )));
        let config = AppConfig::default().chat;

        let turn = QueryProcessor::new(&llm, &config)
            .process_question(&session, "what do employees earn?")
            .await
            .unwrap();

        let error = turn.error.unwrap();
        assert!(error.starts_with("SQL execution error: "));
        assert!(error.contains("no such table: employees"));
        assert_eq!(turn.sql, "SELECT salary FROM employees;");
    }

    #[tokio::test]
    async fn llm_failure_is_recorded_and_returned() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::new(vec![Err(
            "connection refused".to_string(),
        )])));
        let config = AppConfig::default().chat;

        let err = QueryProcessor::new(&llm, &config)
            .process_question(&session, "anything")
            .await
            .unwrap_err();

        assert!(matches!(err, ChatError::Llm(_)));
        let history = session.history().await;
        assert_eq!(history[0].error.as_deref(), Some(LLM_FAILURE_MESSAGE));
    }

    #[tokio::test]
    async fn follow_up_questions_carry_history() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let provider = ScriptedProvider::new(vec![
            Ok("```sql\nSELECT COUNT(*) FROM customers;\n```".to_string()),
            Ok("```sql\nSELECT COUNT(*) FROM customers WHERE city = 'Paris';\n```".to_string()),
        ]);
        let seen = Arc::clone(&provider.seen);
        let llm = LlmManager::with_provider(Box::new(provider));
        let config = AppConfig::default().chat;
        let processor = QueryProcessor::new(&llm, &config);

        processor.process_question(&session, "how many customers?").await.unwrap();
        let turn = processor.process_question(&session, "and in Paris?").await.unwrap();

        assert_eq!(turn.result.unwrap().rows[0][0], Value::from(2));
        let prompts = seen.lock().unwrap().clone();
        let second_prompt = &prompts[1];
        assert_eq!(second_prompt.len(), 4);
        assert_eq!(second_prompt[0].role, Role::System);
        assert!(second_prompt[0].content.contains("CREATE TABLE orders"));
        assert_eq!(second_prompt[1].content, "how many customers?");
        assert_eq!(second_prompt[2].role, Role::Assistant);
        assert_eq!(second_prompt[3].content, "and in Paris?");
    }

    #[tokio::test]
    async fn busy_session_rejects_a_second_question() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::replying("```sql\nSELECT 1;\n```")));
        let config = AppConfig::default().chat;

        let _held = session.processing.lock().await;
        let err = QueryProcessor::new(&llm, &config)
            .process_question(&session, "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, ChatError::Busy));
    }

    #[tokio::test]
    async fn read_only_mode_blocks_writes() {
        let dir = tempfile::tempdir().unwrap();
        let (_store, session) = fixture_session(dir.path()).await;
        let llm = LlmManager::with_provider(Box::new(ScriptedProvider::replying("")));
        let mut config = AppConfig::default().chat;
        config.allow_writes = false;
        let processor = QueryProcessor::new(&llm, &config);

        let err = processor.run_sql(&session, "DELETE FROM orders").await.unwrap_err();
        assert_eq!(err, "Only read-only queries are allowed on this server");

        let ok = processor.run_sql(&session, "SELECT COUNT(*) FROM orders").await.unwrap();
        assert_eq!(ok.rows[0][0], Value::from(5));
    }

    #[test]
    fn harmful_patterns_are_rejected() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(
            validate_query(&conn, "SELECT * INTO OUTFILE '/tmp/dump' FROM users", true),
            Err("Query contains potentially harmful operations".to_string())
        );
    }

    #[test]
    fn harmful_text_inside_literals_or_later_statements_is_allowed() {
        let conn = Connection::open_in_memory().unwrap();
        assert_eq!(validate_query(&conn, "SELECT '; drop table x' AS s", true), Ok(()));
        assert_eq!(validate_query(&conn, "SELECT 'into outfile' -- ; DROP TABLE t", true), Ok(()));
        // Only the first statement would ever run
        assert_eq!(validate_query(&conn, "SELECT 1; DROP TABLE users", true), Ok(()));
    }

    #[test]
    fn syntax_errors_fail_validation() {
        let conn = Connection::open_in_memory().unwrap();
        let err = validate_query(&conn, "SELEC 1", true).unwrap_err();
        assert!(err.contains("syntax error"));
    }
}
