//! Natural-language question → SQL → rows → reply.
//!
//! [`ChatRelay::ask`] is the body of `POST /ask`:
//!
//! 1. Validate the question and decode text attachments.
//! 2. Without a configured model, answer with the offline fallback.
//! 3. Ask the model for one SQLite query, given the live schema and the
//!    session's recent history.
//! 4. Strip code fences and reject anything but a single read-only query.
//! 5. Run it with a row cap and convert the rows to JSON.
//! 6. Ask the model to phrase the answer, then append both turns to the
//!    session history.
//!
//! Model and database failures after step 2 are reported in the `note`
//! field of a normal response rather than as HTTP errors.

use base64::Engine;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, Row, SqlitePool, TypeInfo, ValueRef};
use std::sync::Arc;

use crate::config::LlmConfig;
use crate::llm::{ChatMessage, ChatModel};
use crate::sql_guard;

/// Reply used when no model is configured.
pub const FALLBACK_REPLY: &str = "hello";

/// Rows included in the reply-composition prompt.
const PROMPT_ROWS: usize = 50;

#[derive(Debug, Clone, Deserialize)]
pub struct AskRequest {
    #[serde(default)]
    pub question: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Attachment {
    pub name: String,
    #[serde(default)]
    pub content_type: Option<String>,
    pub content_base64: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct AskResponse {
    pub reply: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,
    #[serde(default)]
    pub results: Vec<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Why a request could not be answered at all.
#[derive(Debug)]
pub enum AskError {
    /// The request itself is invalid (400).
    BadRequest(String),
    /// Session storage failed (500).
    Internal(anyhow::Error),
}

impl From<anyhow::Error> for AskError {
    fn from(e: anyhow::Error) -> Self {
        AskError::Internal(e)
    }
}

impl From<sqlx::Error> for AskError {
    fn from(e: sqlx::Error) -> Self {
        AskError::Internal(e.into())
    }
}

/// A decoded text attachment.
#[derive(Debug, Clone, PartialEq)]
pub struct AttachmentText {
    pub name: String,
    pub text: String,
    pub truncated: bool,
}

/// Decode base64 attachments as UTF-8 text, truncated to `max_bytes`.
pub fn decode_attachments(
    attachments: &[Attachment],
    max_bytes: usize,
) -> Result<Vec<AttachmentText>, AskError> {
    let mut out = Vec::with_capacity(attachments.len());
    for a in attachments {
        let bytes = base64::engine::general_purpose::STANDARD
            .decode(a.content_base64.trim())
            .map_err(|e| AskError::BadRequest(format!("attachment {}: invalid base64: {}", a.name, e)))?;
        let text = String::from_utf8(bytes).map_err(|_| {
            AskError::BadRequest(format!(
                "attachment {} ({}) is not UTF-8 text",
                a.name,
                a.content_type.as_deref().unwrap_or("unknown type")
            ))
        })?;

        let truncated = text.len() > max_bytes;
        let text = if truncated {
            let mut end = max_bytes;
            while !text.is_char_boundary(end) {
                end -= 1;
            }
            text[..end].to_string()
        } else {
            text
        };
        out.push(AttachmentText {
            name: a.name.clone(),
            text,
            truncated,
        });
    }
    Ok(out)
}

pub struct ChatRelay {
    pool: SqlitePool,
    model: Option<Arc<dyn ChatModel>>,
    config: LlmConfig,
}

impl ChatRelay {
    pub fn new(pool: SqlitePool, model: Option<Arc<dyn ChatModel>>, config: LlmConfig) -> Self {
        Self {
            pool,
            model,
            config,
        }
    }

    pub async fn ask(&self, req: AskRequest) -> Result<AskResponse, AskError> {
        let question = req.question.trim().to_string();
        if question.is_empty() {
            return Err(AskError::BadRequest("question must not be empty".to_string()));
        }
        let attachments = decode_attachments(&req.attachments, self.config.max_attachment_bytes)?;

        let Some(model) = &self.model else {
            return Ok(AskResponse {
                reply: FALLBACK_REPLY.to_string(),
                session_id: req.session_id,
                note: Some("LLM not configured; returning offline reply".to_string()),
                ..Default::default()
            });
        };

        let session_id = ensure_session(&self.pool, req.session_id.as_deref()).await?;
        let history = recent_messages(&self.pool, &session_id, self.config.history_limit).await?;

        let mut response = self
            .answer(model.as_ref(), &question, &attachments, &history)
            .await;
        response.session_id = Some(session_id.clone());

        append_message(&self.pool, &session_id, "user", &question).await?;
        append_message(&self.pool, &session_id, "assistant", &response.reply).await?;
        Ok(response)
    }

    async fn answer(
        &self,
        model: &dyn ChatModel,
        question: &str,
        attachments: &[AttachmentText],
        history: &[ChatMessage],
    ) -> AskResponse {
        let schema = match schema_summary(&self.pool).await {
            Ok(s) => s,
            Err(e) => {
                return AskResponse {
                    reply: "I could not read the database schema.".to_string(),
                    note: Some(format!("DB error: {:#}", e)),
                    ..Default::default()
                }
            }
        };

        let mut messages = vec![ChatMessage::system(format!(
            "You are a SQL assistant for a SQLite database of S&P 500 market and SEC filing data.\n\
             Convert the user's question into one SQLite SELECT query. Only return the SQL.\n\n\
             Schema:\n{}",
            schema
        ))];
        messages.extend(history.iter().cloned());
        messages.push(ChatMessage::user(sql_prompt(question, attachments)));

        let raw = match model.complete(&messages).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "LLM request failed");
                return AskResponse {
                    reply: "Sorry, the language model is unavailable right now.".to_string(),
                    note: Some(format!("LLM error: {:#}", e)),
                    ..Default::default()
                };
            }
        };

        let sql = sql_guard::strip_code_fences(&raw);
        let statement = match sql_guard::validate_read_only(&sql) {
            Ok(s) => s,
            Err(e) => {
                return AskResponse {
                    reply: "I could not run the generated query.".to_string(),
                    sql: Some(sql),
                    note: Some(format!("SQL rejected: {}", e)),
                    ..Default::default()
                }
            }
        };

        let (results, truncated) =
            match run_query(&self.pool, &statement, self.config.max_rows).await {
                Ok(r) => r,
                Err(e) => {
                    return AskResponse {
                        reply: "The generated query failed.".to_string(),
                        sql: Some(statement),
                        note: Some(format!("DB error: {:#}", e)),
                        ..Default::default()
                    }
                }
            };

        let mut note = truncated.then(|| format!("results truncated to {} rows", self.config.max_rows));
        let compose = vec![
            ChatMessage::system(
                "You answer questions about S&P 500 data. Use only the query results given. Be concise.",
            ),
            ChatMessage::user(reply_prompt(question, &statement, &results)),
        ];
        let reply = match model.complete(&compose).await {
            Ok(r) => r,
            Err(e) => {
                tracing::warn!(error = %e, "LLM reply composition failed");
                note = Some(format!("LLM error: {:#}", e));
                format!("The query returned {} rows.", results.len())
            }
        };

        AskResponse {
            reply,
            sql: Some(statement),
            results,
            session_id: None,
            note,
        }
    }
}

fn sql_prompt(question: &str, attachments: &[AttachmentText]) -> String {
    let mut prompt = format!("Question: {}", question);
    for a in attachments {
        prompt.push_str(&format!(
            "\n\nAttachment {}{}:\n{}",
            a.name,
            if a.truncated { " (truncated)" } else { "" },
            a.text
        ));
    }
    prompt
}

fn reply_prompt(question: &str, sql: &str, rows: &[Value]) -> String {
    let shown = &rows[..rows.len().min(PROMPT_ROWS)];
    format!(
        "Question: {}\n\nSQL:\n{}\n\nResults ({} rows{}):\n{}",
        question,
        sql,
        rows.len(),
        if rows.len() > shown.len() { ", first shown" } else { "" },
        serde_json::to_string(shown).unwrap_or_default()
    )
}

/// `CREATE TABLE` text of every data table, for the SQL prompt.
pub async fn schema_summary(pool: &SqlitePool) -> anyhow::Result<String> {
    let ddl: Vec<String> = sqlx::query_scalar(
        "SELECT sql FROM sqlite_master \
         WHERE type = 'table' AND sql IS NOT NULL \
           AND name NOT IN ('conversations', 'chat_messages') \
           AND name NOT LIKE 'sqlite_%' \
         ORDER BY name",
    )
    .fetch_all(pool)
    .await?;
    Ok(ddl
        .iter()
        .map(|s| s.split_whitespace().collect::<Vec<_>>().join(" "))
        .collect::<Vec<_>>()
        .join("\n"))
}

/// Run a validated query, returning at most `max_rows` rows and whether
/// more were available.
pub async fn run_query(
    pool: &SqlitePool,
    statement: &str,
    max_rows: usize,
) -> anyhow::Result<(Vec<Value>, bool)> {
    let rows = sqlx::query(&sql_guard::with_row_cap(statement, max_rows))
        .fetch_all(pool)
        .await?;
    let truncated = rows.len() > max_rows;
    let values = rows.iter().take(max_rows).map(row_to_json).collect();
    Ok((values, truncated))
}

fn row_to_json(row: &SqliteRow) -> Value {
    let mut obj = serde_json::Map::new();
    for col in row.columns() {
        let i = col.ordinal();
        let value = match row.try_get_raw(i) {
            Ok(raw) if raw.is_null() => Value::Null,
            Ok(raw) => {
                let type_name = raw.type_info().name().to_string();
                match type_name.as_str() {
                    "INTEGER" | "BOOLEAN" => row.try_get::<i64, _>(i).map(Value::from).unwrap_or(Value::Null),
                    "REAL" | "NUMERIC" => row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null),
                    "BLOB" => row
                        .try_get::<Vec<u8>, _>(i)
                        .map(|b| Value::String(base64::engine::general_purpose::STANDARD.encode(b)))
                        .unwrap_or(Value::Null),
                    _ => row.try_get::<String, _>(i).map(Value::String).unwrap_or(Value::Null),
                }
            }
            Err(_) => Value::Null,
        };
        obj.insert(col.name().to_string(), value);
    }
    Value::Object(obj)
}

// ---------------------------------------------------------------------------
// Session history
// ---------------------------------------------------------------------------

/// Return `session_id` if given (creating the row when unknown), or a new one.
pub async fn ensure_session(pool: &SqlitePool, session_id: Option<&str>) -> anyhow::Result<String> {
    let id = match session_id.map(str::trim).filter(|s| !s.is_empty()) {
        Some(id) => id.to_string(),
        None => uuid::Uuid::new_v4().to_string(),
    };
    sqlx::query(
        "INSERT INTO conversations (session_id, created_at) VALUES (?, ?) \
         ON CONFLICT(session_id) DO NOTHING",
    )
    .bind(&id)
    .bind(now_text())
    .execute(pool)
    .await?;
    Ok(id)
}

pub async fn append_message(
    pool: &SqlitePool,
    session_id: &str,
    role: &str,
    content: &str,
) -> anyhow::Result<()> {
    sqlx::query(
        "INSERT INTO chat_messages (session_id, role, content, created_at) VALUES (?, ?, ?, ?)",
    )
    .bind(session_id)
    .bind(role)
    .bind(content)
    .bind(now_text())
    .execute(pool)
    .await?;
    Ok(())
}

/// The last `limit` messages of a session, oldest first.
pub async fn recent_messages(
    pool: &SqlitePool,
    session_id: &str,
    limit: i64,
) -> anyhow::Result<Vec<ChatMessage>> {
    let rows = sqlx::query(
        "SELECT role, content FROM chat_messages WHERE session_id = ? ORDER BY id DESC LIMIT ?",
    )
    .bind(session_id)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    let mut messages: Vec<ChatMessage> = rows
        .iter()
        .map(|r| {
            let role: String = r.get("role");
            let content: String = r.get("content");
            match role.as_str() {
                "assistant" => ChatMessage::assistant(content),
                _ => ChatMessage::user(content),
            }
        })
        .collect();
    messages.reverse();
    Ok(messages)
}

fn now_text() -> String {
    chrono::Utc::now().format("%Y-%m-%d %H:%M:%S").to_string()
}
