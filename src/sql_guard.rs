//! Validation of model-generated SQL.
//!
//! The chat relay runs whatever query the model returns, so it only accepts
//! a single read-only statement: `SELECT …` or `WITH … SELECT …`. The check
//! tokenizes the text (skipping string literals, quoted identifiers and
//! comments) and rejects any statement separator or write keyword.

use anyhow::{bail, Result};

const FORBIDDEN: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "REPLACE", "ATTACH", "DETACH",
    "PRAGMA", "VACUUM", "REINDEX", "TRUNCATE", "GRANT", "REVOKE",
];

/// Remove Markdown code fences (```` ```sql … ``` ````) and surrounding whitespace.
pub fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let Some(rest) = trimmed.strip_prefix("```") else {
        return trimmed.to_string();
    };
    // Drop the info string (`sql`, `sqlite`...) on the opening line.
    let body = match rest.find('\n') {
        Some(i) => &rest[i + 1..],
        None => rest.trim_start_matches(|c: char| c.is_ascii_alphabetic()),
    };
    let body = body.trim_end();
    body.strip_suffix("```").unwrap_or(body).trim().to_string()
}

/// Return the statement without a trailing `;` if it is a single read-only
/// query, otherwise an error describing why it was rejected.
pub fn validate_read_only(sql: &str) -> Result<String> {
    let statement = sql.trim().trim_end_matches(';').trim_end();
    if statement.is_empty() {
        bail!("empty SQL statement");
    }

    let words = scan_words(statement)?;
    match words.first().map(String::as_str) {
        Some("SELECT") | Some("WITH") => {}
        Some(other) => bail!("only SELECT queries are allowed, got {}", other),
        None => bail!("empty SQL statement"),
    }
    if let Some(bad) = words.iter().find(|w| FORBIDDEN.contains(&w.as_str())) {
        bail!("write statements are not allowed ({})", bad);
    }
    Ok(statement.to_string())
}

/// Wrap a validated query so it returns at most `max_rows + 1` rows; the
/// extra row tells the caller the result was truncated. The statement sits
/// on its own lines so a trailing `--` comment cannot swallow the wrapper.
pub fn with_row_cap(statement: &str, max_rows: usize) -> String {
    format!("SELECT * FROM (\n{}\n) LIMIT {}", statement, max_rows + 1)
}

/// Upper-cased bare words outside literals and comments. Fails on `;`.
fn scan_words(sql: &str) -> Result<Vec<String>> {
    let chars: Vec<char> = sql.chars().collect();
    let mut words = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\'' | '"' | '`' => {
                i += 1;
                while i < chars.len() {
                    if chars[i] == c {
                        // Doubled quote is an escaped quote.
                        if chars.get(i + 1) == Some(&c) {
                            i += 2;
                            continue;
                        }
                        break;
                    }
                    i += 1;
                }
                if i >= chars.len() {
                    bail!("unterminated quoted text");
                }
                i += 1;
            }
            '[' => {
                while i < chars.len() && chars[i] != ']' {
                    i += 1;
                }
                i += 1;
            }
            '-' if chars.get(i + 1) == Some(&'-') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i + 1 < chars.len() && !(chars[i] == '*' && chars[i + 1] == '/') {
                    i += 1;
                }
                i += 2;
            }
            ';' => bail!("multiple statements are not allowed"),
            c if c.is_ascii_alphabetic() || c == '_' => {
                let start = i;
                while i < chars.len() && (chars[i].is_ascii_alphanumeric() || chars[i] == '_') {
                    i += 1;
                }
                words.push(chars[start..i].iter().collect::<String>().to_ascii_uppercase());
            }
            _ => i += 1,
        }
    }
    Ok(words)
}
