//! Liveness loop: heartbeat staleness, grace-period challenge, sleep
//! preservation, and eviction.
//!
//! Idle time is computed from BOTH activity channels: the freshest of the
//! transport stamp and the database stamp counts. An agent writing through
//! the Request API is alive even if it never sends a heartbeat.

use std::time::Duration;

use tokio::sync::broadcast;

use concord_shared::types::SessionState;
use concord_shared::Frame;

use crate::registry::{SessionCommand, SessionView};
use crate::state::AppState;

/// Run the loop until shutdown. Cancellation-safe: the current sweep
/// always completes before the task exits.
pub async fn run(state: AppState, mut shutdown: broadcast::Receiver<()>) {
    let mut interval = tokio::time::interval(state.config.liveness_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = interval.tick() => sweep(&state),
            _ = shutdown.recv() => {
                tracing::info!("liveness loop shutting down");
                break;
            }
        }
    }
}

/// One pass over every session.
pub fn sweep(state: &AppState) {
    let stale = state.config.stale_timeout;
    let grace = state.config.grace;
    let max_sleep = state.config.max_sleep;

    for view in state.registry.snapshot() {
        if view.state == SessionState::Evicted {
            continue;
        }

        if view.idle < stale {
            continue;
        }

        if view.idle < stale + grace {
            challenge(state, &view);
            continue;
        }

        // Past the grace window.
        if view.state == SessionState::Sleeping {
            match view.sleeping_for {
                Some(asleep) if asleep < max_sleep => continue,
                _ => {}
            }
        }

        evict(state, &view, "evicted:idle");
    }
}

/// Send the urgent activity-verification frame on first entry into the
/// challenged state. Re-entering is idempotent.
fn challenge(state: &AppState, view: &SessionView) {
    if view.state == SessionState::Sleeping {
        return;
    }
    if !state.registry.challenge(view.ai_id, view.epoch) {
        return;
    }

    tracing::info!(
        ai_id = %view.ai_id,
        session_id = %view.session_identifier,
        idle_secs = view.idle.as_secs(),
        "challenging idle session"
    );

    if let Some(sender) = state.registry.sender_for(view.ai_id) {
        let frame = Frame::ActivityVerification {
            content: "Are you still there? Reply with an activity confirmation.".to_string(),
            urgent: true,
        };
        if sender.try_send(SessionCommand::Send(frame)).is_err() {
            // Channel gone; the eviction pass will catch it.
            tracing::debug!(ai_id = %view.ai_id, "challenge delivery failed");
        }
    }
}

/// Close the channel, drop the registry slot, and write the audit row.
fn evict(state: &AppState, view: &SessionView, details: &str) {
    tracing::warn!(
        ai_id = %view.ai_id,
        session_id = %view.session_identifier,
        idle_secs = view.idle.as_secs(),
        details,
        "evicting session"
    );

    if let Some(sender) = state.registry.mark_evicted(view.ai_id, view.epoch) {
        let _ = sender.try_send(SessionCommand::Close(details.to_string()));
    }

    // Remove the slot now rather than waiting for the connection task, so
    // a wedged task cannot keep a dead session visible.
    if let Some(log_id) = state.registry.unregister(view.ai_id, view.epoch) {
        let db = state.db.lock();
        let _ = db.record_auth(view.ai_id, &view.name, &view.project, false, details);
        if log_id != 0 {
            let _ = db.record_hub_disconnect(log_id, details);
        }
    }
}

/// Helper shared by tests: what the loop would decide for a given idle
/// time and state.
#[derive(Debug, PartialEq, Eq)]
pub enum LivenessDecision {
    Healthy,
    Challenge,
    Preserve,
    Evict,
}

pub fn decide(
    idle: Duration,
    state: SessionState,
    sleeping_for: Option<Duration>,
    stale: Duration,
    grace: Duration,
    max_sleep: Duration,
) -> LivenessDecision {
    if idle < stale {
        return LivenessDecision::Healthy;
    }
    if idle < stale + grace {
        if state == SessionState::Sleeping {
            return LivenessDecision::Preserve;
        }
        return LivenessDecision::Challenge;
    }
    if state == SessionState::Sleeping {
        if let Some(asleep) = sleeping_for {
            if asleep < max_sleep {
                return LivenessDecision::Preserve;
            }
        }
    }
    LivenessDecision::Evict
}

#[cfg(test)]
mod tests {
    use super::*;

    const STALE: Duration = Duration::from_secs(120);
    const GRACE: Duration = Duration::from_secs(60);
    const MAX_SLEEP: Duration = Duration::from_secs(1800);

    fn decide_active(idle_secs: u64) -> LivenessDecision {
        decide(
            Duration::from_secs(idle_secs),
            SessionState::Active,
            None,
            STALE,
            GRACE,
            MAX_SLEEP,
        )
    }

    #[test]
    fn test_healthy_below_stale() {
        assert_eq!(decide_active(0), LivenessDecision::Healthy);
        assert_eq!(decide_active(119), LivenessDecision::Healthy);
    }

    #[test]
    fn test_challenge_window() {
        assert_eq!(decide_active(120), LivenessDecision::Challenge);
        assert_eq!(decide_active(179), LivenessDecision::Challenge);
    }

    #[test]
    fn test_evict_past_grace() {
        assert_eq!(decide_active(180), LivenessDecision::Evict);
        assert_eq!(decide_active(10_000), LivenessDecision::Evict);
    }

    #[test]
    fn test_sleeping_preserved_until_max_sleep() {
        let sleeping = |idle_secs: u64, asleep_secs: u64| {
            decide(
                Duration::from_secs(idle_secs),
                SessionState::Sleeping,
                Some(Duration::from_secs(asleep_secs)),
                STALE,
                GRACE,
                MAX_SLEEP,
            )
        };

        assert_eq!(sleeping(500, 400), LivenessDecision::Preserve);
        assert_eq!(sleeping(500, 1799), LivenessDecision::Preserve);
        // Sleep budget exhausted: only now does sleeping end in eviction.
        assert_eq!(sleeping(5000, 1800), LivenessDecision::Evict);
    }

    #[test]
    fn test_challenged_session_evicted_after_grace() {
        let decision = decide(
            Duration::from_secs(200),
            SessionState::Challenged,
            None,
            STALE,
            GRACE,
            MAX_SLEEP,
        );
        assert_eq!(decision, LivenessDecision::Evict);
    }
}
