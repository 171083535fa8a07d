//! Token pair persistence, revocation, and expiry sweeps.
//!
//! Only the Token Authority writes here. Revocation is monotonic: a
//! revoked row is never un-revoked, and revoking again is a no-op.

use chrono::{DateTime, Utc};
use rusqlite::params;

use concord_shared::types::AgentId;

use crate::database::Database;
use crate::error::{Result, StoreError};
use crate::models::TokenPair;
use crate::sql::{parse_opt_ts, parse_ts};

impl Database {
    pub fn insert_token_pair(
        &self,
        access_token: &str,
        refresh_token: &str,
        ai_id: AgentId,
        issued_at: DateTime<Utc>,
        access_expires_at: DateTime<Utc>,
        refresh_expires_at: DateTime<Utc>,
    ) -> Result<i64> {
        debug_assert!(access_expires_at <= refresh_expires_at);

        self.conn().execute(
            "INSERT INTO tokens
                (access_token, refresh_token, ai_id, issued_at, access_expires_at, refresh_expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                access_token,
                refresh_token,
                ai_id.as_i64(),
                issued_at.to_rfc3339(),
                access_expires_at.to_rfc3339(),
                refresh_expires_at.to_rfc3339(),
            ],
        )?;
        Ok(self.conn().last_insert_rowid())
    }

    /// Look up a pair by its access token.
    pub fn find_by_access(&self, access_token: &str) -> Result<Option<TokenPair>> {
        self.find_by_column("access_token", access_token)
    }

    /// Look up a pair by its refresh token.
    pub fn find_by_refresh(&self, refresh_token: &str) -> Result<Option<TokenPair>> {
        self.find_by_column("refresh_token", refresh_token)
    }

    fn find_by_column(&self, column: &str, value: &str) -> Result<Option<TokenPair>> {
        let sql = format!(
            "SELECT id, access_token, refresh_token, ai_id, issued_at,
                    access_expires_at, refresh_expires_at, is_revoked, revoked_at
             FROM tokens WHERE {column} = ?1"
        );
        match self.conn().query_row(&sql, params![value], row_to_pair) {
            Ok(pair) => Ok(Some(pair)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Revoke the pair containing the given token (access or refresh).
    ///
    /// Idempotent: an already-revoked row keeps its original `revoked_at`.
    /// Returns `true` when a matching row exists.
    pub fn revoke_token(&self, token: &str) -> Result<bool> {
        let affected = self.conn().execute(
            "UPDATE tokens
             SET is_revoked = 1, revoked_at = COALESCE(revoked_at, ?2)
             WHERE access_token = ?1 OR refresh_token = ?1",
            params![token, Utc::now().to_rfc3339()],
        )?;
        Ok(affected > 0)
    }

    /// Revoke every pair issued to an agent. Idempotent.
    pub fn revoke_all_for_agent(&self, ai_id: AgentId) -> Result<usize> {
        let affected = self.conn().execute(
            "UPDATE tokens
             SET is_revoked = 1, revoked_at = COALESCE(revoked_at, ?2)
             WHERE ai_id = ?1 AND is_revoked = 0",
            params![ai_id.as_i64(), Utc::now().to_rfc3339()],
        )?;
        Ok(affected)
    }

    /// Delete rows past BOTH expirations. Returns the number removed.
    pub fn sweep_expired_tokens(&self, now: DateTime<Utc>) -> Result<usize> {
        let affected = self.conn().execute(
            "DELETE FROM tokens
             WHERE access_expires_at <= ?1 AND refresh_expires_at <= ?1",
            params![now.to_rfc3339()],
        )?;
        Ok(affected)
    }
}

fn row_to_pair(row: &rusqlite::Row<'_>) -> rusqlite::Result<TokenPair> {
    let issued_str: String = row.get(4)?;
    let access_exp_str: String = row.get(5)?;
    let refresh_exp_str: String = row.get(6)?;
    let revoked_str: Option<String> = row.get(8)?;

    Ok(TokenPair {
        id: row.get(0)?,
        access_token: row.get(1)?,
        refresh_token: row.get(2)?,
        ai_id: AgentId(row.get(3)?),
        issued_at: parse_ts(4, &issued_str)?,
        access_expires_at: parse_ts(5, &access_exp_str)?,
        refresh_expires_at: parse_ts(6, &refresh_exp_str)?,
        is_revoked: row.get(7)?,
        revoked_at: parse_opt_ts(8, revoked_str.as_deref())?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::new_profile;
    use chrono::Duration;

    fn db_with_agent() -> Database {
        let db = Database::open_in_memory().unwrap();
        db.create_agent(&new_profile(10, "analyst", "ana", "apollo"))
            .unwrap();
        db
    }

    fn insert_pair(db: &Database, access: &str, refresh: &str, now: DateTime<Utc>) {
        db.insert_token_pair(
            access,
            refresh,
            AgentId(10),
            now,
            now + Duration::hours(1),
            now + Duration::days(7),
        )
        .unwrap();
    }

    #[test]
    fn test_insert_and_find() {
        let db = db_with_agent();
        let now = Utc::now();
        insert_pair(&db, "acc-1", "ref-1", now);

        let pair = db.find_by_access("acc-1").unwrap().unwrap();
        assert_eq!(pair.ai_id, AgentId(10));
        assert!(!pair.is_revoked);
        assert!(pair.access_expires_at <= pair.refresh_expires_at);

        assert!(db.find_by_access("nope").unwrap().is_none());
        assert!(db.find_by_refresh("ref-1").unwrap().is_some());
    }

    #[test]
    fn test_revoke_is_idempotent_and_monotonic() {
        let db = db_with_agent();
        insert_pair(&db, "acc-1", "ref-1", Utc::now());

        assert!(db.revoke_token("acc-1").unwrap());
        let first = db.find_by_access("acc-1").unwrap().unwrap();
        assert!(first.is_revoked);
        let first_ts = first.revoked_at.unwrap();

        // Second revoke: still revoked, timestamp unchanged.
        assert!(db.revoke_token("acc-1").unwrap());
        let second = db.find_by_access("acc-1").unwrap().unwrap();
        assert!(second.is_revoked);
        assert_eq!(second.revoked_at.unwrap(), first_ts);
    }

    #[test]
    fn test_revoke_by_refresh_revokes_pair() {
        let db = db_with_agent();
        insert_pair(&db, "acc-1", "ref-1", Utc::now());

        db.revoke_token("ref-1").unwrap();
        assert!(db.find_by_access("acc-1").unwrap().unwrap().is_revoked);
    }

    #[test]
    fn test_revoke_all() {
        let db = db_with_agent();
        let now = Utc::now();
        insert_pair(&db, "acc-1", "ref-1", now);
        insert_pair(&db, "acc-2", "ref-2", now);

        assert_eq!(db.revoke_all_for_agent(AgentId(10)).unwrap(), 2);
        // Idempotent.
        assert_eq!(db.revoke_all_for_agent(AgentId(10)).unwrap(), 0);
    }

    #[test]
    fn test_sweep_only_removes_fully_expired() {
        let db = db_with_agent();
        let now = Utc::now();

        // Fully expired pair.
        db.insert_token_pair(
            "old-acc",
            "old-ref",
            AgentId(10),
            now - Duration::days(30),
            now - Duration::days(29),
            now - Duration::days(23),
        )
        .unwrap();

        // Access expired, refresh still live.
        db.insert_token_pair(
            "mid-acc",
            "mid-ref",
            AgentId(10),
            now - Duration::hours(2),
            now - Duration::hours(1),
            now + Duration::days(6),
        )
        .unwrap();

        assert_eq!(db.sweep_expired_tokens(now).unwrap(), 1);
        assert!(db.find_by_access("old-acc").unwrap().is_none());
        assert!(db.find_by_access("mid-acc").unwrap().is_some());
    }
}
