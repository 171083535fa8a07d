//! Agent profile CRUD.

use chrono::Utc;
use rusqlite::params;

use concord_shared::types::AgentId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::AgentProfile;
use crate::sql::parse_ts;

impl Database {
    /// Register a new agent profile.
    ///
    /// Fails with [`StoreError::Conflict`] when the id is already taken.
    pub fn create_agent(&self, profile: &AgentProfile) -> Result<()> {
        self.conn().execute(
            "INSERT INTO agents (id, name, nickname, expertise, version, project, is_active, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                profile.id.as_i64(),
                profile.name,
                profile.nickname,
                profile.expertise,
                profile.version,
                profile.project,
                profile.is_active,
                profile.created_at.to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_agent(&self, id: AgentId) -> Result<AgentProfile> {
        self.conn()
            .query_row(
                "SELECT id, name, nickname, expertise, version, project, is_active, created_at
                 FROM agents WHERE id = ?1",
                params![id.as_i64()],
                row_to_agent,
            )
            .map_err(|e| match e {
                rusqlite::Error::QueryReturnedNoRows => StoreError::NotFound,
                other => other.into(),
            })
    }

    pub fn list_agents(&self, limit: u32, offset: u32) -> Result<Vec<AgentProfile>> {
        let mut stmt = self.conn().prepare(
            "SELECT id, name, nickname, expertise, version, project, is_active, created_at
             FROM agents
             ORDER BY id
             LIMIT ?1 OFFSET ?2",
        )?;

        let rows = stmt.query_map(params![limit, offset], row_to_agent)?;

        let mut agents = Vec::new();
        for row in rows {
            agents.push(row?);
        }
        Ok(agents)
    }

    /// Flip the `is_active` flag. Profiles are never deleted.
    pub fn set_agent_active(&self, id: AgentId, active: bool) -> Result<()> {
        let affected = self.conn().execute(
            "UPDATE agents SET is_active = ?2 WHERE id = ?1",
            params![id.as_i64(), active],
        )?;
        if affected == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    pub fn agent_exists(&self, id: AgentId) -> Result<bool> {
        let count: i64 = self.conn().query_row(
            "SELECT COUNT(*) FROM agents WHERE id = ?1",
            params![id.as_i64()],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }
}

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<AgentProfile> {
    let ts_str: String = row.get(7)?;
    Ok(AgentProfile {
        id: AgentId(row.get(0)?),
        name: row.get(1)?,
        nickname: row.get(2)?,
        expertise: row.get(3)?,
        version: row.get(4)?,
        project: row.get(5)?,
        is_active: row.get(6)?,
        created_at: parse_ts(7, &ts_str)?,
    })
}

/// Convenience constructor used by registration and tests.
pub fn new_profile(id: i64, name: &str, nickname: &str, project: &str) -> AgentProfile {
    AgentProfile {
        id: AgentId(id),
        name: name.to_string(),
        nickname: nickname.to_string(),
        expertise: String::new(),
        version: String::new(),
        project: project.to_string(),
        is_active: true,
        created_at: Utc::now(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn open_db() -> Database {
        Database::open_in_memory().unwrap()
    }

    #[test]
    fn test_create_and_get_agent() {
        let db = open_db();
        let profile = new_profile(10, "analyst", "ana", "apollo");
        db.create_agent(&profile).unwrap();

        let loaded = db.get_agent(AgentId(10)).unwrap();
        assert_eq!(loaded.name, "analyst");
        assert_eq!(loaded.project, "apollo");
        assert!(loaded.is_active);
    }

    #[test]
    fn test_duplicate_id_conflicts() {
        let db = open_db();
        db.create_agent(&new_profile(10, "a", "a", "p")).unwrap();

        let err = db.create_agent(&new_profile(10, "b", "b", "p")).unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[test]
    fn test_get_missing_agent() {
        let db = open_db();
        assert!(matches!(db.get_agent(AgentId(99)), Err(StoreError::NotFound)));
    }

    #[test]
    fn test_deactivate() {
        let db = open_db();
        db.create_agent(&new_profile(10, "a", "a", "p")).unwrap();
        db.set_agent_active(AgentId(10), false).unwrap();
        assert!(!db.get_agent(AgentId(10)).unwrap().is_active);

        assert!(matches!(
            db.set_agent_active(AgentId(11), false),
            Err(StoreError::NotFound)
        ));
    }

    #[test]
    fn test_list_agents_paged() {
        let db = open_db();
        for id in 1..=5 {
            db.create_agent(&new_profile(id, "a", "a", "p")).unwrap();
        }

        let page = db.list_agents(2, 2).unwrap();
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, AgentId(3));
    }
}
