use crate::db::connector::QueryResult;
use serde_json::Value;

pub fn format_execution_time(ms: u64) -> String {
    format!("{:.4} seconds", ms as f64 / 1000.0)
}

/// One-line description shown under a result table.
pub fn summarize(result: &QueryResult) -> String {
    match result.rows_affected {
        Some(affected) => format!(
            "{} row(s) affected in {}",
            affected,
            format_execution_time(result.execution_time_ms)
        ),
        None if result.truncated => format!(
            "{} row(s) returned in {} (showing first {})",
            result.row_count,
            format_execution_time(result.execution_time_ms),
            result.rows.len()
        ),
        None => format!(
            "{} row(s) returned in {}",
            result.row_count,
            format_execution_time(result.execution_time_ms)
        ),
    }
}

/// Renders the visible part of a result set as CSV.
pub fn to_csv(result: &QueryResult) -> Result<Vec<u8>, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns)?;
    for row in &result.rows {
        writer.write_record(row.iter().map(csv_field))?;
    }
    writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))
}

fn csv_field(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn result(truncated: bool) -> QueryResult {
        QueryResult {
            sql: "SELECT name, city FROM customers;".to_string(),
            columns: vec!["name".to_string(), "city".to_string()],
            rows: vec![
                vec![Value::from("Alice"), Value::from("Paris, FR")],
                vec![Value::from("Dave"), Value::Null],
            ],
            row_count: if truncated { 40 } else { 2 },
            truncated,
            rows_affected: None,
            execution_time_ms: 12,
        }
    }

    #[test]
    fn execution_time_in_seconds() {
        assert_eq!(format_execution_time(1234), "1.2340 seconds");
        assert_eq!(format_execution_time(0), "0.0000 seconds");
    }

    #[test]
    fn summary_mentions_truncation() {
        assert_eq!(summarize(&result(false)), "2 row(s) returned in 0.0120 seconds");
        assert_eq!(
            summarize(&result(true)),
            "40 row(s) returned in 0.0120 seconds (showing first 2)"
        );
    }

    #[test]
    fn csv_quotes_and_blanks_nulls() {
        let csv = String::from_utf8(to_csv(&result(false)).unwrap()).unwrap();
        assert_eq!(csv, "name,city\nAlice,\"Paris, FR\"\nDave,\n");
    }
}
