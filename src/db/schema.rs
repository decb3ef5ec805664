use crate::db::connector::{ColumnInfo, DatabaseConnector, ForeignKeyInfo, QueryResult, ResultLimits};
use crate::db::DbError;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, warn};

/// Sample rows rendered as INSERT statements in the prompt.
const PROMPT_SAMPLE_ROWS: usize = 3;
/// Columns shown per table in the human-readable sample preview.
const SUMMARY_PREVIEW_COLUMNS: usize = 5;

#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub name: String,
    pub columns: Vec<ColumnInfo>,
    pub foreign_keys: Vec<ForeignKeyInfo>,
    pub sample: Option<QueryResult>,
}

impl TableSchema {
    pub fn to_create_table_sql(&self) -> String {
        let mut definitions: Vec<String> = self
            .columns
            .iter()
            .map(|col| {
                let mut def = format!("{} {}", col.name, col.data_type);
                if col.is_primary_key {
                    def.push_str(" PRIMARY KEY");
                }
                if col.not_null {
                    def.push_str(" NOT NULL");
                }
                def
            })
            .collect();

        for fk in &self.foreign_keys {
            definitions.push(format!(
                "FOREIGN KEY ({}) REFERENCES {}({})",
                fk.from, fk.table, fk.to
            ));
        }

        format!(
            "CREATE TABLE {} (\n  {}\n);",
            self.name,
            definitions.join(",\n  ")
        )
    }

    /// Sample rows as INSERT statements, at most `limit` of them.
    pub fn sample_inserts(&self, limit: usize) -> Vec<String> {
        let Some(sample) = &self.sample else {
            return Vec::new();
        };

        let col_names = sample.columns.join(", ");
        sample
            .rows
            .iter()
            .take(limit)
            .map(|row| {
                let values: Vec<String> = row.iter().map(sql_literal).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({});",
                    self.name,
                    col_names,
                    values.join(", ")
                )
            })
            .collect()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct DatabaseSchema {
    pub tables: Vec<TableSchema>,
}

impl DatabaseSchema {
    pub fn table_names(&self) -> Vec<String> {
        self.tables.iter().map(|t| t.name.clone()).collect()
    }

    /// Schema text embedded in the system prompt.
    pub fn to_prompt(&self) -> String {
        let mut prompt = String::from("DATABASE SCHEMA:\n\n");

        for table in &self.tables {
            prompt.push_str(&format!("Table: {}\n", table.name));
            prompt.push_str("CREATE TABLE statement:\n");
            prompt.push_str(&table.to_create_table_sql());
            prompt.push_str("\n\n");

            let inserts = table.sample_inserts(PROMPT_SAMPLE_ROWS);
            if !inserts.is_empty() {
                prompt.push_str("Sample Data:\n");
                for insert in inserts {
                    prompt.push_str(&insert);
                    prompt.push('\n');
                }
                let sampled = table.sample.as_ref().map(|s| s.rows.len()).unwrap_or(0);
                if sampled > PROMPT_SAMPLE_ROWS {
                    prompt.push_str("-- (more rows exist)\n");
                }
            }
            prompt.push('\n');
        }

        prompt.push_str("TABLE RELATIONSHIPS:\n");
        for table in &self.tables {
            for fk in &table.foreign_keys {
                prompt.push_str(&format!(
                    "- {}.{} references {}.{}\n",
                    table.name, fk.from, fk.table, fk.to
                ));
            }
        }
        prompt.push('\n');
        prompt
    }

    /// Human-readable schema listing for the "view schema" panel.
    pub fn to_summary(&self) -> String {
        let mut summary = String::from("DATABASE SCHEMA:\n\n");

        if self.tables.is_empty() {
            summary.push_str("No tables found in this database.\n");
            return summary;
        }

        for table in &self.tables {
            summary.push_str(&format!("Table: {}\n", table.name));
            summary.push_str("Columns:\n");
            for col in &table.columns {
                let pk_marker = if col.is_primary_key { " PRIMARY KEY" } else { "" };
                let null_marker = if col.not_null { "NOT NULL" } else { "NULL" };
                summary.push_str(&format!(
                    "  - {} ({}){} {}\n",
                    col.name, col.data_type, pk_marker, null_marker
                ));
            }

            if !table.foreign_keys.is_empty() {
                summary.push_str("Foreign Keys:\n");
                for fk in &table.foreign_keys {
                    summary.push_str(&format!("  - {} -> {}.{}\n", fk.from, fk.table, fk.to));
                }
            }

            if let Some(sample) = table.sample.as_ref().filter(|s| !s.rows.is_empty()) {
                summary.push_str("Sample Data:\n");
                summary.push_str(&markdown_preview(sample, SUMMARY_PREVIEW_COLUMNS));
            }

            summary.push('\n');
        }

        summary
    }
}

fn markdown_preview(sample: &QueryResult, max_columns: usize) -> String {
    let shown = sample.columns.len().min(max_columns);
    let mut out = String::new();

    out.push_str("  | ");
    for name in &sample.columns[..shown] {
        out.push_str(&format!("{} | ", name));
    }
    out.push_str("\n  | ");
    for _ in 0..shown {
        out.push_str("--- | ");
    }
    out.push('\n');

    for row in &sample.rows {
        out.push_str("  | ");
        for value in &row[..shown] {
            out.push_str(&format!("{} | ", display_value(value)));
        }
        out.push('\n');
    }

    if sample.columns.len() > shown {
        out.push_str("  ... (more columns not shown)\n");
    }
    out
}

fn display_value(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn sql_literal(value: &Value) -> String {
    match value {
        Value::Null => "NULL".to_string(),
        Value::String(s) => format!("'{}'", s.replace('\'', "''")),
        other => other.to_string(),
    }
}

/// Reads tables, columns, keys and sample rows from an uploaded database.
pub struct SchemaExtractor<'a> {
    connector: &'a DatabaseConnector,
    sample_rows: usize,
    limits: ResultLimits,
}

impl<'a> SchemaExtractor<'a> {
    pub fn new(connector: &'a DatabaseConnector, sample_rows: usize, limits: ResultLimits) -> Self {
        Self {
            connector,
            sample_rows,
            limits,
        }
    }

    pub fn full_schema(&self) -> Result<DatabaseSchema, DbError> {
        let mut tables = Vec::new();

        for name in self.connector.table_names()? {
            let columns = self.connector.table_info(&name)?;
            let foreign_keys = self.connector.foreign_keys(&name)?;

            // A table we cannot sample (e.g. virtual table without its module)
            // is still described by its columns
            let sample = match self.connector.sample_rows(&name, self.sample_rows, self.limits) {
                Ok(sample) => Some(sample),
                Err(e) => {
                    warn!("Could not read sample rows from {}: {}", name, e);
                    None
                }
            };

            debug!("Described table {} with {} columns", name, columns.len());
            tables.push(TableSchema {
                name,
                columns,
                foreign_keys,
                sample,
            });
        }

        Ok(DatabaseSchema { tables })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::connector::tests::fixture_db;

    fn fixture_schema() -> DatabaseSchema {
        let dir = tempfile::tempdir().unwrap();
        let path = fixture_db(dir.path());
        let connector = DatabaseConnector::open(&path, 1).unwrap();
        SchemaExtractor::new(&connector, 5, ResultLimits::default())
            .full_schema()
            .unwrap()
    }

    #[test]
    fn create_statement_lists_keys_and_constraints() {
        let schema = fixture_schema();
        let orders = schema.tables.iter().find(|t| t.name == "orders").unwrap();

        assert_eq!(
            orders.to_create_table_sql(),
            "CREATE TABLE orders (\n  id INTEGER PRIMARY KEY,\n  customer_id INTEGER NOT NULL,\n  amount REAL NOT NULL,\n  note TEXT,\n  FOREIGN KEY (customer_id) REFERENCES customers(id)\n);"
        );
    }

    #[test]
    fn prompt_contains_samples_and_relationships() {
        let prompt = fixture_schema().to_prompt();

        assert!(prompt.starts_with("DATABASE SCHEMA:"));
        assert!(prompt.contains("Table: customers"));
        assert!(prompt.contains("INSERT INTO customers (id, name, city) VALUES (1, 'Alice', 'Paris');"));
        assert!(prompt.contains("INSERT INTO customers (id, name, city) VALUES (3, 'Carol', 'Paris');"));
        assert!(!prompt.contains("'Dave'"));
        assert!(prompt.contains("-- (more rows exist)"));
        assert!(prompt.contains("- orders.customer_id references customers.id"));
    }

    #[test]
    fn summary_shows_columns_and_sample_table() {
        let summary = fixture_schema().to_summary();

        assert!(summary.contains("  - id (INTEGER) PRIMARY KEY NULL"));
        assert!(summary.contains("  - name (TEXT) NOT NULL"));
        assert!(summary.contains("  - customer_id -> customers.id"));
        assert!(summary.contains("  | id | name | city | "));
        assert!(summary.contains("  | 4 | Dave | NULL | "));
    }

    #[test]
    fn literals_escape_quotes() {
        assert_eq!(sql_literal(&Value::from("O'Brien")), "'O''Brien'");
        assert_eq!(sql_literal(&Value::Null), "NULL");
        assert_eq!(sql_literal(&Value::from(7)), "7");
    }
}
