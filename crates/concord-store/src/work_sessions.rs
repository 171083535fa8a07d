//! Work-session rows backing the Request API `sessions` group.

use chrono::Utc;
use rusqlite::params;
use serde_json::Value;
use uuid::Uuid;

use concord_shared::types::AgentId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::WorkSession;
use crate::sql::{parse_json, parse_opt_ts, parse_ts};

impl Database {
    pub fn create_work_session(
        &self,
        ai_id: AgentId,
        session_type: &str,
        project: &str,
        metadata: Option<&Value>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        let metadata = match metadata {
            Some(v @ Value::Object(_)) => v.to_string(),
            _ => "{}".to_string(),
        };

        self.conn().execute(
            "INSERT INTO work_sessions (id, ai_id, session_type, project, metadata, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                id.to_string(),
                ai_id.as_i64(),
                session_type,
                project,
                metadata,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(id)
    }

    pub fn get_work_session(&self, id: Uuid) -> Result<WorkSession> {
        self.conn()
            .query_row(
                "SELECT id, ai_id, session_type, project, metadata, started_at, ended_at
                 FROM work_sessions WHERE id = ?1",
                params![id.to_string()],
                row_to_work_session,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => other.into(),
            })
    }

    /// Stamp `ended_at`. Ending an already-ended session is a no-op.
    pub fn end_work_session(&self, id: Uuid) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE work_sessions
             SET ended_at = COALESCE(ended_at, ?2)
             WHERE id = ?1",
            params![id.to_string(), Utc::now().to_rfc3339()],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }
}

fn row_to_work_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<WorkSession> {
    let id_str: String = row.get(0)?;
    let metadata_str: String = row.get(4)?;
    let started_str: String = row.get(5)?;
    let ended_str: Option<String> = row.get(6)?;

    let id = Uuid::parse_str(&id_str).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
    })?;

    Ok(WorkSession {
        id,
        ai_id: AgentId(row.get(1)?),
        session_type: row.get(2)?,
        project: row.get(3)?,
        metadata: parse_json(4, &metadata_str)?,
        started_at: parse_ts(5, &started_str)?,
        ended_at: parse_opt_ts(6, ended_str.as_deref())?,
    })
}
