//! Auth audit log (append-only) and the hub session connect/disconnect
//! log.

use chrono::Utc;
use rusqlite::params;

use concord_shared::types::AgentId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{AuthAudit, HubSessionRecord};
use crate::sql::{parse_opt_ts, parse_ts};

impl Database {
    /// Append an auth audit row. Rows are never updated or deleted.
    pub fn record_auth(
        &self,
        ai_id: AgentId,
        ai_name: &str,
        project: &str,
        success: bool,
        details: &str,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO auth_audit (ai_id, ai_name, project, success, details, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                ai_id.as_i64(),
                ai_name,
                project,
                success,
                details,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Recent audit rows for an agent, newest first.
    pub fn list_auth_audit(&self, ai_id: AgentId, limit: u32) -> Result<Vec<AuthAudit>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, ai_id, ai_name, project, success, details, created_at
             FROM auth_audit
             WHERE ai_id = ?1
             ORDER BY created_at DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![ai_id.as_i64(), limit], row_to_audit)?;

        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    /// Log a stream connect. Returns the log row id so the disconnect can
    /// close it out.
    pub fn record_hub_connect(
        &self,
        ai_id: AgentId,
        session_identifier: &str,
        project: &str,
    ) -> Result<i64> {
        self.conn().execute(
            "INSERT INTO hub_sessions (ai_id, session_identifier, project, connected_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                ai_id.as_i64(),
                session_identifier,
                project,
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    pub fn record_hub_disconnect(&self, log_id: i64, close_reason: &str) -> Result<()> {
        self.conn().execute(
            "UPDATE hub_sessions
             SET disconnected_at = COALESCE(disconnected_at, ?2),
                 close_reason = COALESCE(close_reason, ?3)
             WHERE id = ?1",
            params![log_id, Utc::now().to_rfc3339(), close_reason],
        )?;
        Ok(())
    }

    pub fn list_hub_sessions(&self, ai_id: AgentId, limit: u32) -> Result<Vec<HubSessionRecord>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, ai_id, session_identifier, project, connected_at, disconnected_at, close_reason
             FROM hub_sessions
             WHERE ai_id = ?1
             ORDER BY connected_at DESC, id DESC
             LIMIT ?2",
        )?;

        let rows = stmt.query_map(params![ai_id.as_i64(), limit], row_to_hub_session)?;

        let mut sessions = Vec::new();
        for row in rows {
            sessions.push(row?);
        }
        Ok(sessions)
    }
}

fn row_to_audit(row: &rusqlite::Row<'_>) -> rusqlite::Result<AuthAudit> {
    let ts_str: String = row.get(6)?;
    Ok(AuthAudit {
        id: row.get(0)?,
        ai_id: AgentId(row.get(1)?),
        ai_name: row.get(2)?,
        project: row.get(3)?,
        success: row.get(4)?,
        details: row.get(5)?,
        created_at: parse_ts(6, &ts_str)?,
    })
}

fn row_to_hub_session(row: &rusqlite::Row<'_>) -> rusqlite::Result<HubSessionRecord> {
    let connected_str: String = row.get(4)?;
    let disconnected_str: Option<String> = row.get(5)?;

    Ok(HubSessionRecord {
        id: row.get(0)?,
        ai_id: AgentId(row.get(1)?),
        session_identifier: row.get(2)?,
        project: row.get(3)?,
        connected_at: parse_ts(4, &connected_str)?,
        disconnected_at: parse_opt_ts(5, disconnected_str.as_deref())?,
        close_reason: row.get(6)?,
    })
}
