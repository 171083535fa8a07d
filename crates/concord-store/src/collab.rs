//! Collaboration request CRUD.

use chrono::Utc;
use rusqlite::params;
use uuid::Uuid;

use concord_shared::types::{AgentId, CollabStatus};

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::CollabRequest;
use crate::sql::parse_ts;

impl Database {
    pub fn create_collab_request(
        &self,
        requester_id: AgentId,
        target_ai_id: AgentId,
        request_type: &str,
        title: &str,
        description: &str,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        self.conn().execute(
            "INSERT INTO collab_requests
                (id, requester_id, target_ai_id, request_type, title, description, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', ?7)",
            params![
                id.to_string(),
                requester_id.as_i64(),
                target_ai_id.as_i64(),
                request_type,
                title,
                description,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_collab_request(&self, id: Uuid) -> Result<CollabRequest> {
        self.conn()
            .query_row(
                &format!("{SELECT_COLS} FROM collab_requests WHERE id = ?1"),
                params![id.to_string()],
                row_to_collab,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => other.into(),
            })
    }

    /// List requests where the agent is requester or target, newest first.
    pub fn list_collab_requests(&self, ai_id: AgentId, limit: u32) -> Result<Vec<CollabRequest>> {
        let mut stmt = self.conn().prepare(&format!(
            "{SELECT_COLS} FROM collab_requests
             WHERE requester_id = ?1 OR target_ai_id = ?1
             ORDER BY created_at DESC
             LIMIT ?2"
        ))?;

        let rows = stmt.query_map(params![ai_id.as_i64(), limit], row_to_collab)?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row?);
        }
        Ok(requests)
    }

    pub fn set_collab_status(&self, id: Uuid, status: CollabStatus) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE collab_requests SET status = ?2 WHERE id = ?1",
            params![id.to_string(), status.as_str()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

const SELECT_COLS: &str = "SELECT id, requester_id, target_ai_id, request_type, title, \
                           description, status, created_at";

fn row_to_collab(row: &rusqlite::Row<'_>) -> rusqlite::Result<CollabRequest> {
    let id_str: String = row.get(0)?;
    let status_str: String = row.get(6)?;
    let ts_str: String = row.get(7)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    let status = CollabStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            6,
            rusqlite::types::Type::Text,
            format!("unknown collab status: {status_str}").into(),
        )
    })?;

    Ok(CollabRequest {
        id,
        requester_id: AgentId(row.get(1)?),
        target_ai_id: AgentId(row.get(2)?),
        request_type: row.get(3)?,
        title: row.get(4)?,
        description: row.get(5)?,
        status,
        created_at: parse_ts(7, &ts_str)?,
    })
}
