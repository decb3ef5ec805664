//! Splits a model reply into SQL, explanation and educational notes.

use crate::llm::models::ParsedResponse;
use crate::util::sql::normalize_statement;
use regex::Regex;
use std::sync::LazyLock;
use tracing::{debug, info};

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```[ \t]*sql\b[ \t]*\n?(.*?)```").expect("valid sql fence regex"));

static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[A-Za-z0-9_+-]*[ \t]*\n?(.*?)```").expect("valid fence regex"));

static LOOKS_LIKE_SQL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)\b(SELECT|INSERT|UPDATE|DELETE|CREATE|ALTER|DROP|PRAGMA)\b").expect("valid keyword regex")
});

/// Statement openers recognised when the reply has no code fence.
const LINE_KEYWORDS: [&str; 10] = [
    "SELECT", "WITH", "INSERT", "UPDATE", "DELETE", "PRAGMA", "CREATE", "ALTER", "DROP", "EXPLAIN",
];

const NOTE_MARKERS: [&str; 4] = ["SQL Concept:", "Educational Note:", "Note:", "SQL Tip:"];

/// Byte span of the SQL inside the reply plus the SQL text itself.
#[derive(Debug)]
struct SqlBlock {
    sql: String,
    start: usize,
    end: usize,
}

fn find_sql_block(content: &str) -> Option<SqlBlock> {
    // Try to extract SQL from between ```sql and ``` markers
    if let Some(caps) = SQL_FENCE.captures(content) {
        let whole = caps.get(0)?;
        let body = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !body.trim().is_empty() {
            debug!("Found SQL in a ```sql fence");
            return Some(SqlBlock {
                sql: body.trim().to_string(),
                start: whole.start(),
                end: whole.end(),
            });
        }
    }

    // Any other fence whose body looks like SQL
    for caps in ANY_FENCE.captures_iter(content) {
        let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
            continue;
        };
        if LOOKS_LIKE_SQL.is_match(body.as_str()) {
            debug!("Found SQL in a plain code fence");
            return Some(SqlBlock {
                sql: body.as_str().trim().to_string(),
                start: whole.start(),
                end: whole.end(),
            });
        }
    }

    scan_lines(content)
}

/// Finds a run of lines starting with an upper-case SQL keyword.
fn scan_lines(content: &str) -> Option<SqlBlock> {
    let mut offset = 0;
    let mut lines = Vec::new();
    for line in content.split_inclusive('\n') {
        lines.push((offset, line));
        offset += line.len();
    }

    let first = lines.iter().position(|(_, line)| starts_with_keyword(line.trim()))?;
    let start = lines[first].0;
    let mut end = start;
    let mut sql_lines = Vec::new();

    for (line_start, line) in &lines[first..] {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with("```") {
            break;
        }
        sql_lines.push(trimmed);
        end = line_start + line.len();
        if trimmed.ends_with(';') {
            break;
        }
    }

    info!("Extracted SQL using line scanning");
    Some(SqlBlock {
        sql: sql_lines.join("\n"),
        start,
        end,
    })
}

fn starts_with_keyword(line: &str) -> bool {
    LINE_KEYWORDS.iter().any(|kw| {
        line.strip_prefix(kw)
            .map(|rest| rest.is_empty() || rest.starts_with(|c: char| c.is_whitespace() || c == '('))
            .unwrap_or(false)
    })
}

/// Comment-free first statement of an extracted SQL snippet.
pub fn clean_sql(sql: &str) -> String {
    normalize_statement(sql)
}

/// The cleaned SQL found in `content`, or an empty string.
pub fn extract_sql(content: &str) -> String {
    find_sql_block(content)
        .map(|block| clean_sql(&block.sql))
        .unwrap_or_default()
}

/// Splits off the first educational-note section found in `text`.
fn split_notes(text: &str) -> (&str, Option<&str>) {
    let earliest = NOTE_MARKERS
        .iter()
        .filter_map(|marker| text.find(marker))
        .min();

    match earliest {
        Some(pos) => (&text[..pos], Some(&text[pos..])),
        None => (text, None),
    }
}

pub fn parse_response(content: &str) -> ParsedResponse {
    let block = find_sql_block(content);

    let (before, after) = match &block {
        Some(block) => (&content[..block.start], &content[block.end..]),
        None => (content, ""),
    };

    let mut notes = None;
    let mut explanation_parts = Vec::new();
    for part in [before, after] {
        let (text, found) = split_notes(part);
        if notes.is_none() {
            notes = found;
        }
        if !text.trim().is_empty() {
            explanation_parts.push(text.trim());
        }
    }

    ParsedResponse {
        raw: content.to_string(),
        sql: block.map(|b| clean_sql(&b.sql)).unwrap_or_default(),
        explanation: explanation_parts.join("\n\n"),
        educational_notes: notes.map(|n| n.trim().to_string()).unwrap_or_default(),
    }
}
