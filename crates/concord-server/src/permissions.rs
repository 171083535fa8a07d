//! Permission service: maps (agent, project) to a role.
//!
//! Roles carry no inheritance across projects; precedence within one
//! project is admin > contributor > member > viewer.

use std::sync::Arc;

use parking_lot::Mutex;

use concord_shared::types::{AgentId, Role};
use concord_store::{Database, StoreError};

use crate::error::ServerError;

pub struct PermissionService {
    db: Arc<Mutex<Database>>,
}

impl PermissionService {
    pub fn new(db: Arc<Mutex<Database>>) -> Arc<Self> {
        Arc::new(Self { db })
    }

    /// `(has, role)` for the agent on the project. Absence of a row is
    /// `(false, None)`.
    pub fn check(&self, ai_id: AgentId, project: &str) -> Result<(bool, Option<Role>), StoreError> {
        let permission = self.db.lock().get_permission(ai_id, project)?;
        match permission {
            Some(p) => Ok((true, Some(p.role))),
            None => Ok((false, None)),
        }
    }

    /// Reject unless the agent holds at least `min_role` on the project.
    pub fn require(&self, ai_id: AgentId, project: &str, min_role: Role) -> Result<Role, ServerError> {
        let (_, role) = self.check(ai_id, project)?;
        match role {
            Some(role) if role >= min_role => Ok(role),
            Some(role) => Err(ServerError::Forbidden(format!(
                "requires {min_role} on {project}, have {role}"
            ))),
            None => Err(ServerError::Forbidden(format!(
                "no role on project {project}"
            ))),
        }
    }

    pub fn grant(
        &self,
        ai_id: AgentId,
        project: &str,
        role: Role,
        granted_by: Option<AgentId>,
    ) -> Result<(), StoreError> {
        self.db.lock().grant_permission(ai_id, project, role, granted_by)
    }
}
