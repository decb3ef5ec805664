//! Small, quote-aware helpers for massaging SQL text before it reaches SQLite.

#[derive(Clone, Copy, PartialEq)]
enum Quote {
    None,
    Single,
    Double,
    Backtick,
    Bracket,
}

impl Quote {
    fn opening(c: char) -> Option<Quote> {
        match c {
            '\'' => Some(Quote::Single),
            '"' => Some(Quote::Double),
            '`' => Some(Quote::Backtick),
            '[' => Some(Quote::Bracket),
            _ => None,
        }
    }

    fn closes(self, c: char) -> bool {
        matches!(
            (self, c),
            (Quote::Single, '\'') | (Quote::Double, '"') | (Quote::Backtick, '`') | (Quote::Bracket, ']')
        )
    }
}

/// Removes `-- line` and `/* block */` comments, leaving string literals and
/// quoted identifiers untouched.
pub fn strip_comments(sql: &str) -> String {
    let mut out = String::with_capacity(sql.len());
    let mut chars = sql.chars().peekable();
    let mut quote = Quote::None;

    while let Some(c) = chars.next() {
        if quote != Quote::None {
            out.push(c);
            if quote.closes(c) {
                quote = Quote::None;
            }
            continue;
        }

        match c {
            '-' if chars.peek() == Some(&'-') => {
                for next in chars.by_ref() {
                    if next == '\n' {
                        out.push('\n');
                        break;
                    }
                }
            }
            '/' if chars.peek() == Some(&'*') => {
                chars.next();
                let mut prev = '\0';
                for next in chars.by_ref() {
                    if prev == '*' && next == '/' {
                        break;
                    }
                    prev = next;
                }
                out.push(' ');
            }
            _ => {
                if let Some(q) = Quote::opening(c) {
                    quote = q;
                }
                out.push(c);
            }
        }
    }

    out
}

/// Returns the first statement of `sql`, terminated with `;` when the input
/// had one. Semicolons inside literals do not split.
pub fn first_statement(sql: &str) -> String {
    let mut quote = Quote::None;

    for (idx, c) in sql.char_indices() {
        if quote != Quote::None {
            if quote.closes(c) {
                quote = Quote::None;
            }
            continue;
        }
        if c == ';' {
            let head = sql[..idx].trim();
            if head.is_empty() {
                // Leading empty statement, keep looking past it
                return first_statement(&sql[idx + 1..]);
            }
            return format!("{};", head);
        }
        if let Some(q) = Quote::opening(c) {
            quote = q;
        }
    }

    sql.trim().to_string()
}

/// Blanks out the contents of literals and quoted identifiers, keeping the
/// quote characters, so keyword checks only see SQL code.
pub fn mask_literals(sql: &str) -> String {
    let mut quote = Quote::None;

    sql.chars()
        .map(|c| {
            if quote != Quote::None {
                if quote.closes(c) {
                    quote = Quote::None;
                    return c;
                }
                return ' ';
            }
            if let Some(q) = Quote::opening(c) {
                quote = q;
            }
            c
        })
        .collect()
}

/// Comment-free first statement, the form every executed query takes.
pub fn normalize_statement(sql: &str) -> String {
    first_statement(&strip_comments(sql))
}
