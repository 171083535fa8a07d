//! Conversation CRUD.

use chrono::Utc;
use rusqlite::params;

use concord_shared::types::ConversationStatus;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::Conversation;
use crate::sql::parse_ts;

impl Database {
    pub fn create_conversation(
        &self,
        title: &str,
        category: &str,
        project_context: &str,
    ) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO conversations (title, category, project_context, status, created_at)
             VALUES (?1, ?2, ?3, 'active', ?4)",
            params![title, category, project_context, Utc::now().to_rfc3339()],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn get_conversation(&self, id: i64) -> Result<Conversation> {
        self.conn()
            .query_row(
                "SELECT id, title, category, project_context, status, created_at
                 FROM conversations WHERE id = ?1",
                params![id],
                row_to_conversation,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => other.into(),
            })
    }

    pub fn list_conversations(&self, limit: u32, offset: u32) -> Result<Vec<Conversation>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, title, category, project_context, status, created_at
             FROM conversations
             ORDER BY created_at DESC
             LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt.query_map(params![limit, offset], row_to_conversation)?;

        let mut conversations = Vec::new();
        for row in rows {
            conversations.push(row?);
        }
        Ok(conversations)
    }

    pub fn set_conversation_status(&self, id: i64, status: ConversationStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE conversations SET status = ?2 WHERE id = ?1",
            params![id, status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_conversation(row: &rusqlite::Row<'_>) -> rusqlite::Result<Conversation> {
    let status_str: String = row.get(4)?;
    let ts_str: String = row.get(5)?;

    let status = ConversationStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            4,
            rusqlite::types::Type::Text,
            format!("unknown conversation status: {status_str}").into(),
        )
    })?;

    Ok(Conversation {
        id: row.get(0)?,
        title: row.get(1)?,
        category: row.get(2)?,
        project_context: row.get(3)?,
        status,
        created_at: parse_ts(5, &ts_str)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conversation_lifecycle() {
        let db = Database::open_in_memory().unwrap();
        let id = db.create_conversation("planning", "ops", "apollo").unwrap();

        let conv = db.get_conversation(id).unwrap();
        assert_eq!(conv.status, ConversationStatus::Active);

        db.set_conversation_status(id, ConversationStatus::Completed)
            .unwrap();
        let conv = db.get_conversation(id).unwrap();
        assert_eq!(conv.status, ConversationStatus::Completed);
    }

    #[test]
    fn test_missing_conversation() {
        let db = Database::open_in_memory().unwrap();
        assert!(matches!(db.get_conversation(42), Err(StoreError::NotFound)));
    }
}
