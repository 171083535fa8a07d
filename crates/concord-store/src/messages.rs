//! Message persistence and history queries.
//!
//! Normalization happens here, at the insert boundary: structured content
//! is serialized once to its canonical JSON text, and metadata that is
//! absent or not an object is replaced by `{}`. The stored schema stays
//! textual for `content` while callers may hand us arbitrary well-formed
//! JSON.

use chrono::{DateTime, Utc};
use rusqlite::params;
use serde_json::Value;

use concord_shared::types::{AgentId, MessageType};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::{MessageFilter, NewMessage, StoredMessage};
use crate::sql::{parse_json, parse_ts};

/// Canonical text form of a caller-supplied content value. JSON strings
/// are stored verbatim; everything else is serialized exactly once.
pub fn normalize_content(content: &Value) -> String {
    match content {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Canonical metadata: an object is kept byte-for-byte; anything else
/// (absent, scalar, array) collapses to the empty mapping.
pub fn normalize_metadata(metadata: Option<&Value>) -> String {
    match metadata {
        Some(v @ Value::Object(_)) => v.to_string(),
        _ => "{}".to_string(),
    }
}

impl Database {
    /// Insert a message, returning its id and the server-assigned
    /// timestamp.
    ///
    /// Fails with [`StoreError::ForeignKey`] when the sender (or
    /// recipient/conversation) is unknown, and with [`StoreError::Invalid`]
    /// when the normalized content is empty.
    pub fn insert_message(&self, new: &NewMessage) -> Result<(i64, DateTime<Utc>)> {
        let content = normalize_content(&new.content);
        if content.is_empty() {
            return Err(StoreError::Invalid("message content must be non-empty"));
        }
        let metadata = normalize_metadata(new.metadata.as_ref());
        let created_at = Utc::now();

        self.conn().execute(
            "INSERT INTO messages
                (conversation_id, sender_id, recipient_id, message_type, content, metadata, project, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                new.conversation_id,
                new.sender_id.as_i64(),
                new.recipient_id.map(|r| r.as_i64()),
                new.message_type.as_str(),
                content,
                metadata,
                new.project,
                created_at.to_rfc3339(),
            ],
        )?;

        Ok((self.conn().last_insert_rowid(), created_at))
    }

    pub fn get_message(&self, id: i64) -> Result<StoredMessage> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLS} FROM messages WHERE id = ?1"),
                params![id],
                row_to_message,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => other.into(),
            })
    }

    /// List messages ordered by `created_at` descending, applying the
    /// filter's optional predicates and paging.
    pub fn list_messages(&self, filter: &MessageFilter) -> Result<Vec<StoredMessage>> {
        let mut sql = format!("{SELECT_COLS} FROM messages WHERE 1=1");
        let mut args: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(sender) = filter.sender_id {
            args.push(Box::new(sender.as_i64()));
            sql.push_str(&format!(" AND sender_id = ?{}", args.len()));
        }
        if let Some(recipient) = filter.recipient_id {
            args.push(Box::new(recipient.as_i64()));
            sql.push_str(&format!(" AND recipient_id = ?{}", args.len()));
        }
        if let Some(mt) = filter.message_type {
            args.push(Box::new(mt.as_str().to_string()));
            sql.push_str(&format!(" AND message_type = ?{}", args.len()));
        }
        if let Some(ref search) = filter.search {
            args.push(Box::new(format!("%{search}%")));
            sql.push_str(&format!(" AND content LIKE ?{}", args.len()));
        }
        if let Some(since) = filter.since {
            args.push(Box::new(since.to_rfc3339()));
            sql.push_str(&format!(" AND created_at >= ?{}", args.len()));
        }
        if let Some(until) = filter.until {
            args.push(Box::new(until.to_rfc3339()));
            sql.push_str(&format!(" AND created_at <= ?{}", args.len()));
        }

        args.push(Box::new(filter.limit));
        sql.push_str(&format!(" ORDER BY created_at DESC LIMIT ?{}", args.len()));
        args.push(Box::new(filter.offset));
        sql.push_str(&format!(" OFFSET ?{}", args.len()));

        let mut stmt = self.conn().prepare(&sql)?;
        let rows = stmt.query_map(
            rusqlite::params_from_iter(args.iter().map(|a| a.as_ref())),
            row_to_message,
        )?;

        let mut messages = Vec::new();
        for row in rows {
            messages.push(row?);
        }
        Ok(messages)
    }
}

const SELECT_COLS: &str = "SELECT id, conversation_id, sender_id, recipient_id, message_type, \
                           content, metadata, project, created_at";

fn row_to_message(row: &rusqlite::Row<'_>) -> rusqlite::Result<StoredMessage> {
    let type_str: String = row.get(4)?;
    let metadata_str: String = row.get(6)?;
    let ts_str: String = row.get(8)?;

    let message_type = MessageType::parse(&type_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown message type: {type_str}").into(),
        )
    })?;

    Ok(StoredMessage {
        id: row.get(0)?,
        conversation_id: row.get(1)?,
        sender_id: AgentId(row.get(2)?),
        recipient_id: row.get::<_, Option<i64>>(3)?.map(AgentId),
        message_type,
        content: row.get(5)?,
        metadata: parse_json(6, &metadata_str)?,
        project: row.get(7)?,
        created_at: parse_ts(8, &ts_str)?,
    })
}
