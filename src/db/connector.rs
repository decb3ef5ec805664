use crate::db::db_pool::SqliteConnectionManager;
use crate::db::{quote_ident, DbError};
use crate::util::sql::normalize_statement;
use r2d2::{Pool, PooledConnection};
use rusqlite::types::ValueRef;
use rusqlite::Connection;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use tracing::{debug, info};

/// Caps applied when turning SQLite rows into a displayable result.
#[derive(Debug, Clone, Copy)]
pub struct ResultLimits {
    pub max_rows: usize,
    pub max_cell_chars: usize,
}

impl Default for ResultLimits {
    fn default() -> Self {
        Self {
            max_rows: 100,
            max_cell_chars: 100,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryResult {
    /// The statement that actually ran, after comment removal and splitting
    pub sql: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
    /// Rows produced by the statement, including those cut by the row cap
    pub row_count: usize,
    pub truncated: bool,
    pub rows_affected: Option<usize>,
    pub execution_time_ms: u64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ColumnInfo {
    pub cid: i64,
    pub name: String,
    pub data_type: String,
    pub not_null: bool,
    pub default_value: Option<String>,
    pub is_primary_key: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct ForeignKeyInfo {
    pub table: String,
    pub from: String,
    pub to: String,
    pub on_update: String,
    pub on_delete: String,
}

/// Pooled access to one uploaded SQLite file.
#[derive(Clone)]
pub struct DatabaseConnector {
    path: PathBuf,
    pool: Pool<SqliteConnectionManager>,
}

impl DatabaseConnector {
    /// Opens `path` and checks that it really is a SQLite database.
    pub fn open(path: &Path, pool_size: u32) -> Result<Self, DbError> {
        let manager = SqliteConnectionManager::new(path.to_path_buf());
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .connection_timeout(Duration::from_secs(5))
            .build(manager)
            .map_err(|e| DbError::InvalidDatabase(e.to_string()))?;

        let conn = pool
            .get()
            .map_err(|e| DbError::InvalidDatabase(e.to_string()))?;
        // Opening succeeds lazily on garbage files; touching the catalog does not
        conn.query_row("SELECT COUNT(*) FROM sqlite_master", [], |row| row.get::<_, i64>(0))
            .map_err(|e| DbError::InvalidDatabase(e.to_string()))?;

        info!("Connected to database at {}", path.display());
        Ok(Self {
            path: path.to_path_buf(),
            pool,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, DbError> {
        Ok(self.pool.get()?)
    }

    /// Runs the first statement of `sql` on a blocking thread.
    pub async fn execute_query(&self, sql: &str, limits: ResultLimits) -> Result<QueryResult, DbError> {
        let connector = self.clone();
        let sql = sql.to_string();
        tokio::task::spawn_blocking(move || {
            let conn = connector.connection()?;
            execute_on(&conn, &sql, limits)
        })
        .await?
    }

    pub fn table_names(&self) -> Result<Vec<String>, DbError> {
        let conn = self.connection()?;
        table_names(&conn)
    }

    pub fn table_info(&self, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
        let conn = self.connection()?;
        table_info(&conn, table)
    }

    pub fn foreign_keys(&self, table: &str) -> Result<Vec<ForeignKeyInfo>, DbError> {
        let conn = self.connection()?;
        foreign_keys(&conn, table)
    }

    pub fn sample_rows(&self, table: &str, limit: usize, limits: ResultLimits) -> Result<QueryResult, DbError> {
        let conn = self.connection()?;
        let sql = format!("SELECT * FROM {} LIMIT {}", quote_ident(table), limit);
        execute_on(&conn, &sql, limits)
    }
}

/// Executes a single statement and collects a capped result set.
pub fn execute_on(conn: &Connection, sql: &str, limits: ResultLimits) -> Result<QueryResult, DbError> {
    let start_time = Instant::now();
    let statement = normalize_statement(sql);
    if statement.is_empty() {
        return Err(DbError::Sql("Empty query".to_string()));
    }
    debug!("Executing query: {}", statement);

    let mut stmt = conn.prepare(&statement)?;
    let column_count = stmt.column_count();

    if column_count == 0 {
        let affected = stmt.execute([])?;
        info!("Statement affected {} rows", affected);
        return Ok(QueryResult {
            sql: statement,
            columns: vec!["message".to_string()],
            rows: vec![vec![Value::String(format!(
                "Query executed successfully. {} row(s) affected.",
                affected
            ))]],
            row_count: 1,
            truncated: false,
            rows_affected: Some(affected),
            execution_time_ms: start_time.elapsed().as_millis() as u64,
        });
    }

    let columns: Vec<String> = stmt.column_names().iter().map(|c| c.to_string()).collect();
    let mut rows = stmt.query([])?;
    let mut collected = Vec::new();
    let mut row_count = 0usize;

    while let Some(row) = rows.next()? {
        row_count += 1;
        if collected.len() >= limits.max_rows {
            continue;
        }
        let mut cells = Vec::with_capacity(column_count);
        for i in 0..column_count {
            cells.push(cell_to_json(row.get_ref(i)?, limits.max_cell_chars));
        }
        collected.push(cells);
    }

    let execution_time_ms = start_time.elapsed().as_millis() as u64;
    info!("Query returned {} rows in {}ms", row_count, execution_time_ms);

    Ok(QueryResult {
        sql: statement,
        columns,
        truncated: row_count > collected.len(),
        rows: collected,
        row_count,
        rows_affected: None,
        execution_time_ms,
    })
}

pub fn cell_to_json(value: ValueRef<'_>, max_chars: usize) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => {
            // Integer-valued reals display without a fractional part
            if f.is_finite() && f.fract() == 0.0 && f.abs() < 9.0e15 {
                Value::from(f as i64)
            } else {
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        ValueRef::Text(bytes) => Value::String(truncate_text(&String::from_utf8_lossy(bytes), max_chars)),
        ValueRef::Blob(bytes) => Value::String(format!("<BLOB {} bytes>", bytes.len())),
    }
}

fn truncate_text(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        let head: String = text.chars().take(max_chars).collect();
        format!("{}...", head)
    } else {
        text.to_string()
    }
}

pub fn table_names(conn: &Connection) -> Result<Vec<String>, DbError> {
    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    debug!("Found tables: {:?}", tables);
    Ok(tables)
}

pub fn table_info(conn: &Connection, table: &str) -> Result<Vec<ColumnInfo>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let columns = stmt
        .query_map([], |row| {
            Ok(ColumnInfo {
                cid: row.get(0)?,
                name: row.get(1)?,
                data_type: row.get(2)?,
                not_null: row.get::<_, i64>(3)? != 0,
                default_value: row.get(4)?,
                is_primary_key: row.get::<_, i64>(5)? > 0,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(columns)
}

pub fn foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKeyInfo>, DbError> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let keys = stmt
        .query_map([], |row| {
            Ok(ForeignKeyInfo {
                table: row.get(2)?,
                from: row.get(3)?,
                // NULL when the key targets the parent's primary key implicitly
                to: row.get::<_, Option<String>>(4)?.unwrap_or_else(|| "rowid".to_string()),
                on_update: row.get(5)?,
                on_delete: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(keys)
}
