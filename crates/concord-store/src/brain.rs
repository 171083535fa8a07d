//! Brain-state checkpointing.
//!
//! One row per agent. Writes are upserts; on update the cycle counter
//! advances to `max(supplied, existing + 1)`, so it never decreases and a
//! plain re-save still counts as a new cycle.

use chrono::Utc;
use rusqlite::params;

use concord_shared::types::AgentId;

use crate::database::Database;
use crate::error::Result;
use crate::models::{BrainState, BrainStateUpdate};
use crate::sql::{parse_json, parse_ts};

impl Database {
    /// Upsert the brain state for an agent.
    ///
    /// Absent fields keep their stored values; `last_activity` is always
    /// refreshed to now.
    pub fn upsert_brain_state(&self, ai_id: AgentId, update: &BrainStateUpdate) -> Result<()> {
        let checkpoint = update
            .checkpoint_data
            .as_ref()
            .filter(|v| v.is_object())
            .map(|v| v.to_string());

        self.conn().execute(
            "INSERT INTO brain_states
                (ai_id, current_task, last_thought, last_insight, current_cycle,
                 cycle_count, last_activity, checkpoint_data, session_identifier)
             VALUES (?1, COALESCE(?2, ''), COALESCE(?3, ''), COALESCE(?4, ''), COALESCE(?5, ''),
                     COALESCE(?6, 0), ?7, COALESCE(?8, '{}'), COALESCE(?9, ''))
             ON CONFLICT(ai_id) DO UPDATE SET
                 current_task       = COALESCE(?2, current_task),
                 last_thought       = COALESCE(?3, last_thought),
                 last_insight       = COALESCE(?4, last_insight),
                 current_cycle      = COALESCE(?5, current_cycle),
                 cycle_count        = MAX(COALESCE(?6, 0), cycle_count + 1),
                 last_activity      = ?7,
                 checkpoint_data    = COALESCE(?8, checkpoint_data),
                 session_identifier = COALESCE(?9, session_identifier)",
            params![
                ai_id.as_i64(),
                update.current_task,
                update.last_thought,
                update.last_insight,
                update.current_cycle,
                update.cycle_count,
                Utc::now().to_rfc3339(),
                checkpoint,
                update.session_identifier,
            ],
        )?;
        Ok(())
    }

    pub fn load_brain_state(&self, ai_id: AgentId) -> Result<Option<BrainState>> {
        match self.conn().query_row(
            "SELECT ai_id, current_task, last_thought, last_insight, current_cycle,
                    cycle_count, last_activity, checkpoint_data, session_identifier
             FROM brain_states WHERE ai_id = ?1",
            params![ai_id.as_i64()],
            row_to_brain_state,
        ) {
            Ok(state) => Ok(Some(state)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_brain_state(row: &rusqlite::Row<'_>) -> rusqlite::Result<BrainState> {
    let ts_str: String = row.get(6)?;
    let checkpoint_str: String = row.get(7)?;

    Ok(BrainState {
        ai_id: AgentId(row.get(0)?),
        current_task: row.get(1)?,
        last_thought: row.get(2)?,
        last_insight: row.get(3)?,
        current_cycle: row.get(4)?,
        cycle_count: row.get(5)?,
        last_activity: parse_ts(6, &ts_str)?,
        checkpoint_data: parse_json(7, &checkpoint_str)?,
        session_identifier: row.get(8)?,
    })
}
