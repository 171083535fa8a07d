//! Local brain-state cache.
//!
//! The brain state is the agent's crash-resume record. Every save lands in
//! two places: the hub's store (over the Request API or a stream RPC) and
//! a local JSON file with a `.backup` shadow. On startup the cache loads
//! whichever local copy is newer and reconciles against the store copy by
//! `last_activity`.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::api::BrainStateRecord;
use crate::config::ClientConfig;
use crate::error::Result;

/// The locally cached brain state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct CachedBrainState {
    #[serde(default)]
    pub current_task: String,
    #[serde(default)]
    pub last_thought: String,
    #[serde(default)]
    pub last_insight: String,
    #[serde(default)]
    pub current_cycle: String,
    #[serde(default)]
    pub cycle_count: i64,
    #[serde(default)]
    pub last_activity: Option<DateTime<Utc>>,
    #[serde(default)]
    pub checkpoint_data: Value,
    #[serde(default)]
    pub session_identifier: String,
}

impl From<BrainStateRecord> for CachedBrainState {
    fn from(record: BrainStateRecord) -> Self {
        Self {
            current_task: record.current_task,
            last_thought: record.last_thought,
            last_insight: record.last_insight,
            current_cycle: record.current_cycle,
            cycle_count: record.cycle_count,
            last_activity: Some(record.last_activity),
            checkpoint_data: record.checkpoint_data,
            session_identifier: record.session_identifier,
        }
    }
}

impl CachedBrainState {
    /// JSON body for `/api/brain/save` / the `save_brain_state` RPC.
    pub fn to_update_payload(&self) -> Value {
        serde_json::json!({
            "current_task": self.current_task,
            "last_thought": self.last_thought,
            "last_insight": self.last_insight,
            "current_cycle": self.current_cycle,
            "cycle_count": self.cycle_count,
            "checkpoint_data": self.checkpoint_data,
            "session_identifier": self.session_identifier,
        })
    }
}

/// File-backed cache with a shadow copy.
pub struct BrainCache {
    path: PathBuf,
    backup_path: PathBuf,
    state: CachedBrainState,
}

impl BrainCache {
    /// Open the cache, loading the newer of the main file and its backup.
    pub fn open(config: &ClientConfig) -> Result<Self> {
        fs::create_dir_all(&config.data_dir)?;
        let path = config.brain_path();
        let backup_path = config.brain_backup_path();

        let main = read_state(&path);
        let backup = read_state(&backup_path);
        let state = match (main, backup) {
            (Some(m), Some(b)) => {
                if b.last_activity > m.last_activity {
                    tracing::warn!("backup brain state is newer than main; using backup");
                    b
                } else {
                    m
                }
            }
            (Some(m), None) => m,
            (None, Some(b)) => {
                tracing::warn!("main brain state missing or unreadable; using backup");
                b
            }
            (None, None) => CachedBrainState::default(),
        };

        Ok(Self {
            path,
            backup_path,
            state,
        })
    }

    pub fn state(&self) -> &CachedBrainState {
        &self.state
    }

    /// Merge a store-side copy if it is newer than the local one.
    pub fn reconcile(&mut self, remote: Option<BrainStateRecord>) {
        if let Some(remote) = remote {
            let remote: CachedBrainState = remote.into();
            if remote.last_activity > self.state.last_activity {
                tracing::info!(
                    cycle_count = remote.cycle_count,
                    "adopting newer brain state from the store"
                );
                self.state = remote;
            }
        }
    }

    /// Apply a mutation and persist. The previous file becomes the backup
    /// before the new state is written, so a crash mid-write still leaves
    /// one readable copy.
    pub fn save_with(&mut self, mutate: impl FnOnce(&mut CachedBrainState)) -> Result<()> {
        mutate(&mut self.state);
        self.state.cycle_count += 1;
        self.state.last_activity = Some(Utc::now());
        self.persist()
    }

    fn persist(&self) -> Result<()> {
        if self.path.exists() {
            fs::copy(&self.path, &self.backup_path)?;
        }
        let json = serde_json::to_string_pretty(&self.state)?;
        fs::write(&self.path, json)?;
        tracing::debug!(
            cycle_count = self.state.cycle_count,
            path = %self.path.display(),
            "brain state saved"
        );
        Ok(())
    }
}

fn read_state(path: &Path) -> Option<CachedBrainState> {
    let contents = fs::read_to_string(path).ok()?;
    match serde_json::from_str(&contents) {
        Ok(state) => Some(state),
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "unreadable brain state file");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn config(dir: &Path) -> ClientConfig {
        ClientConfig::new(10, "analyst", "ana").with_data_dir(dir.to_path_buf())
    }

    #[test]
    fn test_fresh_cache_is_default() {
        let dir = tempfile::tempdir().unwrap();
        let cache = BrainCache::open(&config(dir.path())).unwrap();
        assert_eq!(cache.state().cycle_count, 0);
        assert!(cache.state().last_activity.is_none());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        {
            let mut cache = BrainCache::open(&cfg).unwrap();
            cache
                .save_with(|s| {
                    s.current_task = "T1".into();
                    s.checkpoint_data = json!({"step": 2});
                })
                .unwrap();
        }

        let cache = BrainCache::open(&cfg).unwrap();
        assert_eq!(cache.state().current_task, "T1");
        assert_eq!(cache.state().cycle_count, 1);
        assert_eq!(cache.state().checkpoint_data, json!({"step": 2}));
    }

    #[test]
    fn test_backup_shadow_written_on_second_save() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let mut cache = BrainCache::open(&cfg).unwrap();
        cache.save_with(|s| s.current_task = "T1".into()).unwrap();
        assert!(!cfg.brain_backup_path().exists());

        cache.save_with(|s| s.current_task = "T2".into()).unwrap();
        assert!(cfg.brain_backup_path().exists());

        // The backup holds the previous generation.
        let backup: CachedBrainState =
            serde_json::from_str(&fs::read_to_string(cfg.brain_backup_path()).unwrap()).unwrap();
        assert_eq!(backup.current_task, "T1");
    }

    #[test]
    fn test_corrupt_main_falls_back_to_backup() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let mut cache = BrainCache::open(&cfg).unwrap();
        cache.save_with(|s| s.current_task = "T1".into()).unwrap();
        cache.save_with(|s| s.current_task = "T2".into()).unwrap();

        // Simulate a crash that corrupted the main file.
        fs::write(cfg.brain_path(), "{not json").unwrap();

        let recovered = BrainCache::open(&cfg).unwrap();
        assert_eq!(recovered.state().current_task, "T1");
    }

    #[test]
    fn test_reconcile_prefers_newer_remote() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = config(dir.path());

        let mut cache = BrainCache::open(&cfg).unwrap();
        cache.save_with(|s| s.current_task = "local".into()).unwrap();

        let remote = BrainStateRecord {
            ai_id: concord_shared::types::AgentId(10),
            current_task: "remote".into(),
            last_thought: String::new(),
            last_insight: String::new(),
            current_cycle: String::new(),
            cycle_count: 40,
            last_activity: Utc::now() + chrono::Duration::seconds(60),
            checkpoint_data: json!({}),
            session_identifier: String::new(),
        };
        cache.reconcile(Some(remote));
        assert_eq!(cache.state().current_task, "remote");
        assert_eq!(cache.state().cycle_count, 40);

        // An older remote copy is ignored.
        let stale = BrainStateRecord {
            ai_id: concord_shared::types::AgentId(10),
            current_task: "stale".into(),
            last_thought: String::new(),
            last_insight: String::new(),
            current_cycle: String::new(),
            cycle_count: 1,
            last_activity: Utc::now() - chrono::Duration::hours(5),
            checkpoint_data: json!({}),
            session_identifier: String::new(),
        };
        cache.reconcile(Some(stale));
        assert_eq!(cache.state().current_task, "remote");
    }
}
