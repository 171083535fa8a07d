//! Per-project permission rows.

use chrono::Utc;
use rusqlite::params;

use concord_shared::types::{AgentId, Role};

use crate::database::Database;
use crate::error::Result;
use crate::models::Permission;
use crate::sql::parse_ts;

impl Database {
    /// Grant (or re-grant) a role. At most one row exists per
    /// (ai_id, project); a re-grant updates the role in place.
    pub fn grant_permission(
        &self,
        ai_id: AgentId,
        project: &str,
        role: Role,
        granted_by: Option<AgentId>,
    ) -> Result<()> {
        self.conn().execute(
            "INSERT INTO permissions (ai_id, project, role, granted_by, granted_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(ai_id, project) DO UPDATE SET
                 role = excluded.role,
                 granted_by = excluded.granted_by,
                 granted_at = excluded.granted_at",
            params![
                ai_id.as_i64(),
                project,
                role.as_str(),
                granted_by.map(|g| g.as_i64()),
                Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_permission(&self, ai_id: AgentId, project: &str) -> Result<Option<Permission>> {
        match self.conn().query_row(
            "SELECT ai_id, project, role, granted_by, granted_at
             FROM permissions WHERE ai_id = ?1 AND project = ?2",
            params![ai_id.as_i64(), project],
            row_to_permission,
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Whether any agent holds the admin role on the project. Used to
    /// allow the very first grant on a fresh project.
    pub fn project_has_admin(&self, project: &str) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM permissions WHERE project = ?1 AND role = 'admin'",
            params![project],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    pub fn revoke_permission(&self, ai_id: AgentId, project: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "DELETE FROM permissions WHERE ai_id = ?1 AND project = ?2",
            params![ai_id.as_i64(), project],
        )?;
        Ok(affected > 0)
    }
}

fn row_to_permission(row: &rusqlite::Row<'_>) -> rusqlite::Result<Permission> {
    let role_str: String = row.get(2)?;
    let ts_str: String = row.get(4)?;

    let role = Role::parse(&role_str).ok_or_else(|| {
        rusqlite::Error::FromSqlConversionFailure(
            2,
            rusqlite::types::Type::Text,
            format!("unknown role: {role_str}").into(),
        )
    })?;

    Ok(Permission {
        ai_id: AgentId(row.get(0)?),
        project: row.get(1)?,
        role,
        granted_by: row.get::<_, Option<i64>>(3)?.map(AgentId),
        granted_at: parse_ts(4, &ts_str)?,
    })
}
