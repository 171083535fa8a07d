//! In-memory session registry.
//!
//! The registry is the authoritative presence view: one slot per agent id,
//! each holding the outbound command channel for the live connection plus
//! the activity stamps the liveness loop reads. A new connection for an
//! agent supersedes the previous slot; the epoch counter stops a
//! superseded connection's cleanup from tearing down its successor.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use tokio::sync::mpsc;

use concord_shared::constants::SESSION_ID_LEN;
use concord_shared::types::{AgentId, SessionState};
use concord_shared::Frame;

/// Commands delivered to a connection task through its registry slot.
#[derive(Debug)]
pub enum SessionCommand {
    /// Write a frame to the client.
    Send(Frame),
    /// Send a final `error` frame with the given code, then close.
    Close(String),
}

pub type SessionSender = mpsc::Sender<SessionCommand>;

/// One live session slot.
pub struct SessionEntry {
    pub ai_id: AgentId,
    pub name: String,
    pub session_identifier: String,
    pub project: String,
    pub connection_time: DateTime<Utc>,
    pub last_tx_activity: Instant,
    pub last_db_activity: Instant,
    pub state: SessionState,
    /// Set when the session entered `Sleeping`.
    pub sleeping_since: Option<Instant>,
    pub subscriptions: HashSet<i64>,
    pub sender: SessionSender,
    /// Monotonic connect counter; guards supersede races.
    pub epoch: u64,
    /// Row id in the hub session log.
    pub log_id: i64,
}

/// Snapshot of a session used by the liveness loop and RPC answers.
#[derive(Debug, Clone)]
pub struct SessionView {
    pub ai_id: AgentId,
    pub name: String,
    pub session_identifier: String,
    pub project: String,
    pub state: SessionState,
    pub idle: std::time::Duration,
    pub sleeping_for: Option<std::time::Duration>,
    pub epoch: u64,
}

#[derive(Default)]
pub struct SessionRegistry {
    sessions: RwLock<HashMap<i64, SessionEntry>>,
    next_epoch: RwLock<u64>,
}

impl SessionRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new session, superseding any existing slot for the same
    /// agent. Returns the new epoch and, if present, the superseded
    /// entry's sender and log id so the caller can close the old channel
    /// and its log row.
    #[allow(clippy::too_many_arguments)]
    pub fn register(
        &self,
        ai_id: AgentId,
        name: String,
        session_identifier: String,
        project: String,
        sender: SessionSender,
        log_id: i64,
    ) -> (u64, Option<(SessionSender, i64)>) {
        let epoch = {
            let mut next = self.next_epoch.write();
            *next += 1;
            *next
        };

        let now = Instant::now();
        let entry = SessionEntry {
            ai_id,
            name,
            session_identifier,
            project,
            connection_time: Utc::now(),
            last_tx_activity: now,
            last_db_activity: now,
            state: SessionState::Active,
            sleeping_since: None,
            subscriptions: HashSet::new(),
            sender,
            epoch,
            log_id,
        };

        let old = self.sessions.write().insert(ai_id.as_i64(), entry);
        (epoch, old.map(|e| (e.sender, e.log_id)))
    }

    /// Remove the slot, but only if it still belongs to the given epoch.
    /// Returns the removed entry's log id.
    pub fn unregister(&self, ai_id: AgentId, epoch: u64) -> Option<i64> {
        let mut sessions = self.sessions.write();
        match sessions.get(&ai_id.as_i64()) {
            Some(entry) if entry.epoch == epoch => {
                sessions.remove(&ai_id.as_i64()).map(|e| e.log_id)
            }
            _ => None,
        }
    }

    /// Record transport activity. Any inbound frame also recovers a
    /// challenged or sleeping session to `Active`.
    pub fn touch_tx(&self, ai_id: AgentId) {
        if let Some(entry) = self.sessions.write().get_mut(&ai_id.as_i64()) {
            entry.last_tx_activity = Instant::now();
            if matches!(entry.state, SessionState::Challenged | SessionState::Sleeping) {
                entry.state = SessionState::Active;
                entry.sleeping_since = None;
            }
        }
    }

    /// Record database activity (Request API writes count as liveness).
    pub fn touch_db(&self, ai_id: AgentId) {
        if let Some(entry) = self.sessions.write().get_mut(&ai_id.as_i64()) {
            entry.last_db_activity = Instant::now();
            if matches!(entry.state, SessionState::Challenged | SessionState::Sleeping) {
                entry.state = SessionState::Active;
                entry.sleeping_since = None;
            }
        }
    }

    /// Transition to `Challenged`, returning `true` only on the first
    /// entry into the state (the challenge frame is sent exactly once).
    pub fn challenge(&self, ai_id: AgentId, epoch: u64) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&ai_id.as_i64()) {
            Some(entry) if entry.epoch == epoch && entry.state == SessionState::Active => {
                entry.state = SessionState::Challenged;
                true
            }
            _ => false,
        }
    }

    /// Mark a session sleeping (preserved by the liveness loop until
    /// `MAX_SLEEP`).
    pub fn set_sleeping(&self, ai_id: AgentId) -> bool {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&ai_id.as_i64()) {
            Some(entry) if entry.state != SessionState::Evicted => {
                entry.state = SessionState::Sleeping;
                entry.sleeping_since = Some(Instant::now());
                true
            }
            _ => false,
        }
    }

    /// Mark evicted (terminal) and return the slot's sender for the close
    /// command.
    pub fn mark_evicted(&self, ai_id: AgentId, epoch: u64) -> Option<SessionSender> {
        let mut sessions = self.sessions.write();
        match sessions.get_mut(&ai_id.as_i64()) {
            Some(entry) if entry.epoch == epoch => {
                entry.state = SessionState::Evicted;
                Some(entry.sender.clone())
            }
            _ => None,
        }
    }

    pub fn subscribe(&self, ai_id: AgentId, conversation_id: i64) {
        if let Some(entry) = self.sessions.write().get_mut(&ai_id.as_i64()) {
            entry.subscriptions.insert(conversation_id);
        }
    }

    pub fn unsubscribe(&self, ai_id: AgentId, conversation_id: i64) {
        if let Some(entry) = self.sessions.write().get_mut(&ai_id.as_i64()) {
            entry.subscriptions.remove(&conversation_id);
        }
    }

    pub fn is_online(&self, ai_id: AgentId) -> bool {
        self.sessions.read().contains_key(&ai_id.as_i64())
    }

    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Sender for one agent's slot, if online.
    pub fn sender_for(&self, ai_id: AgentId) -> Option<SessionSender> {
        self.sessions
            .read()
            .get(&ai_id.as_i64())
            .map(|e| e.sender.clone())
    }

    /// Current view of every session, for the liveness loop.
    pub fn snapshot(&self) -> Vec<SessionView> {
        let now = Instant::now();
        self.sessions
            .read()
            .values()
            .map(|e| SessionView {
                ai_id: e.ai_id,
                name: e.name.clone(),
                session_identifier: e.session_identifier.clone(),
                project: e.project.clone(),
                state: e.state,
                idle: now.duration_since(e.last_tx_activity.max(e.last_db_activity)),
                sleeping_for: e.sleeping_since.map(|s| now.duration_since(s)),
                epoch: e.epoch,
            })
            .collect()
    }

    /// Identities of every online agent (for the `list_online_ais` rpc).
    pub fn online_agents(&self) -> Vec<(AgentId, String)> {
        self.sessions
            .read()
            .values()
            .map(|e| (e.ai_id, e.name.clone()))
            .collect()
    }

    /// Fan a frame out to every session except `from`. Delivery is
    /// best-effort per connection; receivers whose queue is gone are
    /// returned so the caller can evict them.
    pub fn broadcast_except(&self, from: AgentId, frame: &Frame) -> Vec<AgentId> {
        let targets: Vec<(AgentId, SessionSender)> = {
            self.sessions
                .read()
                .values()
                .filter(|e| e.ai_id != from && e.state != SessionState::Evicted)
                .map(|e| (e.ai_id, e.sender.clone()))
                .collect()
        };

        let mut failed = Vec::new();
        for (ai_id, sender) in targets {
            if sender
                .try_send(SessionCommand::Send(frame.clone()))
                .is_err()
            {
                failed.push(ai_id);
            }
        }
        failed
    }

    /// Flush hook for clean shutdown: returns every (log_id, ai_id) so the
    /// caller can close out the hub session log.
    pub fn drain(&self) -> Vec<(i64, AgentId)> {
        let mut sessions = self.sessions.write();
        sessions
            .drain()
            .map(|(_, e)| (e.log_id, e.ai_id))
            .collect()
    }
}

/// Derive the 7-character session identifier from the connect tuple plus
/// process-local entropy. Deterministic in its inputs, unique per connect.
pub fn derive_session_identifier(
    ai_id: AgentId,
    project: &str,
    connected_at: DateTime<Utc>,
    entropy: u64,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(&ai_id.as_i64().to_le_bytes());
    hasher.update(project.as_bytes());
    hasher.update(&connected_at.timestamp_micros().to_le_bytes());
    hasher.update(&entropy.to_le_bytes());
    hasher.finalize().to_hex()[..SESSION_ID_LEN].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_sender() -> (SessionSender, mpsc::Receiver<SessionCommand>) {
        mpsc::channel(8)
    }

    fn register(
        registry: &SessionRegistry,
        id: i64,
    ) -> (u64, mpsc::Receiver<SessionCommand>) {
        let (tx, rx) = make_sender();
        let (epoch, _old) = registry.register(
            AgentId(id),
            format!("agent-{id}"),
            "abcdef0".into(),
            "apollo".into(),
            tx,
            1,
        );
        (epoch, rx)
    }

    #[test]
    fn test_single_active_session_per_agent() {
        let registry = SessionRegistry::new();
        let (_e1, _rx1) = register(&registry, 10);
        assert_eq!(registry.session_count(), 1);

        // Second connect supersedes, count stays 1.
        let (tx2, _rx2) = make_sender();
        let (_e2, old) = registry.register(
            AgentId(10),
            "agent-10".into(),
            "1234567".into(),
            "apollo".into(),
            tx2,
            2,
        );
        assert!(old.is_some());
        assert_eq!(registry.session_count(), 1);
    }

    #[test]
    fn test_stale_epoch_cannot_unregister_successor() {
        let registry = SessionRegistry::new();
        let (old_epoch, _rx1) = register(&registry, 10);
        let (new_epoch, _rx2) = register(&registry, 10);

        // The superseded connection's cleanup is a no-op.
        assert!(registry.unregister(AgentId(10), old_epoch).is_none());
        assert_eq!(registry.session_count(), 1);

        assert!(registry.unregister(AgentId(10), new_epoch).is_some());
        assert_eq!(registry.session_count(), 0);
    }

    #[test]
    fn test_challenge_fires_once() {
        let registry = SessionRegistry::new();
        let (epoch, _rx) = register(&registry, 10);

        assert!(registry.challenge(AgentId(10), epoch));
        // Re-entering the challenged state is idempotent.
        assert!(!registry.challenge(AgentId(10), epoch));
    }

    #[test]
    fn test_activity_clears_challenge() {
        let registry = SessionRegistry::new();
        let (epoch, _rx) = register(&registry, 10);
        registry.challenge(AgentId(10), epoch);

        registry.touch_db(AgentId(10));
        let view = &registry.snapshot()[0];
        assert_eq!(view.state, SessionState::Active);
    }

    #[test]
    fn test_inbound_frame_wakes_sleeping_session() {
        let registry = SessionRegistry::new();
        let (_epoch, _rx) = register(&registry, 10);

        registry.set_sleeping(AgentId(10));
        assert_eq!(registry.snapshot()[0].state, SessionState::Sleeping);

        registry.touch_tx(AgentId(10));
        let view = &registry.snapshot()[0];
        assert_eq!(view.state, SessionState::Active);
        assert!(view.sleeping_for.is_none());
    }

    #[test]
    fn test_broadcast_skips_sender() {
        let registry = SessionRegistry::new();
        let (_e1, mut rx1) = register(&registry, 10);
        let (_e2, mut rx2) = register(&registry, 11);

        let frame = Frame::error("test");
        let failed = registry.broadcast_except(AgentId(10), &frame);
        assert!(failed.is_empty());

        // Receiver 11 got it, sender 10 did not.
        assert!(rx2.try_recv().is_ok());
        assert!(rx1.try_recv().is_err());
    }

    #[test]
    fn test_broadcast_reports_dead_receivers() {
        let registry = SessionRegistry::new();
        let (_e1, _rx1) = register(&registry, 10);
        let (_e2, rx2) = register(&registry, 11);
        drop(rx2);

        let failed = registry.broadcast_except(AgentId(10), &Frame::error("test"));
        assert_eq!(failed, vec![AgentId(11)]);
    }

    #[test]
    fn test_session_identifier_shape() {
        let sid = derive_session_identifier(AgentId(10), "apollo", Utc::now(), 42);
        assert_eq!(sid.len(), SESSION_ID_LEN);
        assert!(sid.chars().all(|c| c.is_ascii_hexdigit()));

        // Deterministic in its inputs.
        let ts = Utc::now();
        assert_eq!(
            derive_session_identifier(AgentId(1), "p", ts, 7),
            derive_session_identifier(AgentId(1), "p", ts, 7)
        );
        assert_ne!(
            derive_session_identifier(AgentId(1), "p", ts, 7),
            derive_session_identifier(AgentId(1), "p", ts, 8)
        );
    }
}
