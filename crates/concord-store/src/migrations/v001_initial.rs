//! v001 -- Initial schema creation.
//!
//! Creates the core tables: `agents`, `conversations`, `messages`,
//! `tokens`, `permissions`, `work_sessions`, `collab_requests`,
//! `brain_states`, `auth_audit`, and `hub_sessions`.

use rusqlite::Connection;

/// SQL executed when upgrading from version 0 to version 1.
const UP_SQL: &str = r#"
-- ----------------------------------------------------------------
-- Agents
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS agents (
    id         INTEGER PRIMARY KEY NOT NULL,  -- stable id, supplied at registration
    name       TEXT NOT NULL,
    nickname   TEXT NOT NULL,
    expertise  TEXT NOT NULL DEFAULT '',
    version    TEXT NOT NULL DEFAULT '',
    project    TEXT NOT NULL DEFAULT '',
    is_active  INTEGER NOT NULL DEFAULT 1,    -- boolean 0/1
    created_at TEXT NOT NULL                  -- ISO-8601 / RFC-3339
);

-- ----------------------------------------------------------------
-- Conversations
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS conversations (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    title           TEXT NOT NULL,
    category        TEXT NOT NULL DEFAULT '',
    project_context TEXT NOT NULL DEFAULT '',
    status          TEXT NOT NULL DEFAULT 'active',  -- active | archived | completed
    created_at      TEXT NOT NULL
);

-- ----------------------------------------------------------------
-- Messages (immutable after insert)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS messages (
    id              INTEGER PRIMARY KEY AUTOINCREMENT,
    conversation_id INTEGER,                  -- nullable FK -> conversations(id)
    sender_id       INTEGER NOT NULL,         -- FK -> agents(id)
    recipient_id    INTEGER,                  -- nullable FK -> agents(id), direct messages
    message_type    TEXT NOT NULL,
    content         TEXT NOT NULL,            -- canonical text (structured input serialized once)
    metadata        TEXT NOT NULL DEFAULT '{}', -- canonical JSON object
    project         TEXT NOT NULL DEFAULT '',
    created_at      TEXT NOT NULL,            -- server-assigned

    FOREIGN KEY (conversation_id) REFERENCES conversations(id) ON DELETE SET NULL,
    FOREIGN KEY (sender_id)       REFERENCES agents(id),
    FOREIGN KEY (recipient_id)    REFERENCES agents(id)
);

CREATE INDEX IF NOT EXISTS idx_messages_sender_ts
    ON messages(sender_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_recipient_ts
    ON messages(recipient_id, created_at DESC);
CREATE INDEX IF NOT EXISTS idx_messages_conversation
    ON messages(conversation_id);

-- ----------------------------------------------------------------
-- Tokens (persisted so they can be revoked)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS tokens (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    access_token       TEXT NOT NULL,
    refresh_token      TEXT NOT NULL,
    ai_id              INTEGER NOT NULL,      -- FK -> agents(id)
    issued_at          TEXT NOT NULL,
    access_expires_at  TEXT NOT NULL,
    refresh_expires_at TEXT NOT NULL,
    is_revoked         INTEGER NOT NULL DEFAULT 0,
    revoked_at         TEXT,

    FOREIGN KEY (ai_id) REFERENCES agents(id)
);

CREATE INDEX IF NOT EXISTS idx_tokens_access  ON tokens(access_token);
CREATE INDEX IF NOT EXISTS idx_tokens_refresh ON tokens(refresh_token);
CREATE INDEX IF NOT EXISTS idx_tokens_ai      ON tokens(ai_id);

-- ----------------------------------------------------------------
-- Project permissions
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS permissions (
    ai_id      INTEGER NOT NULL,              -- FK -> agents(id)
    project    TEXT NOT NULL,
    role       TEXT NOT NULL,                 -- admin | member | viewer | contributor
    granted_by INTEGER,
    granted_at TEXT NOT NULL,

    PRIMARY KEY (ai_id, project),
    FOREIGN KEY (ai_id) REFERENCES agents(id)
);

-- ----------------------------------------------------------------
-- Work sessions (Request API surface)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS work_sessions (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    ai_id        INTEGER NOT NULL,            -- FK -> agents(id)
    session_type TEXT NOT NULL,
    project      TEXT NOT NULL DEFAULT '',
    metadata     TEXT NOT NULL DEFAULT '{}',  -- canonical JSON object
    started_at   TEXT NOT NULL,
    ended_at     TEXT,

    FOREIGN KEY (ai_id) REFERENCES agents(id)
);

-- ----------------------------------------------------------------
-- Collaboration requests
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS collab_requests (
    id           TEXT PRIMARY KEY NOT NULL,   -- UUID v4
    requester_id INTEGER NOT NULL,            -- FK -> agents(id)
    target_ai_id INTEGER NOT NULL,            -- FK -> agents(id)
    request_type TEXT NOT NULL,
    title        TEXT NOT NULL,
    description  TEXT NOT NULL DEFAULT '',
    status       TEXT NOT NULL DEFAULT 'pending',
    created_at   TEXT NOT NULL,

    FOREIGN KEY (requester_id) REFERENCES agents(id),
    FOREIGN KEY (target_ai_id) REFERENCES agents(id)
);

-- ----------------------------------------------------------------
-- Brain states (one row per agent, upsert-by-ai_id)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS brain_states (
    ai_id              INTEGER PRIMARY KEY NOT NULL,  -- FK -> agents(id)
    current_task       TEXT NOT NULL DEFAULT '',
    last_thought       TEXT NOT NULL DEFAULT '',
    last_insight       TEXT NOT NULL DEFAULT '',
    current_cycle      TEXT NOT NULL DEFAULT '',
    cycle_count        INTEGER NOT NULL DEFAULT 0,
    last_activity      TEXT NOT NULL,
    checkpoint_data    TEXT NOT NULL DEFAULT '{}',    -- canonical JSON object
    session_identifier TEXT NOT NULL DEFAULT '',

    FOREIGN KEY (ai_id) REFERENCES agents(id)
);

-- ----------------------------------------------------------------
-- Auth audit (append-only)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS auth_audit (
    id         INTEGER PRIMARY KEY AUTOINCREMENT,
    ai_id      INTEGER NOT NULL,
    ai_name    TEXT NOT NULL DEFAULT '',
    project    TEXT NOT NULL DEFAULT '',
    success    INTEGER NOT NULL,              -- boolean 0/1
    details    TEXT NOT NULL DEFAULT '',
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_auth_audit_ai ON auth_audit(ai_id, created_at DESC);

-- ----------------------------------------------------------------
-- Hub session log (connects / disconnects)
-- ----------------------------------------------------------------
CREATE TABLE IF NOT EXISTS hub_sessions (
    id                 INTEGER PRIMARY KEY AUTOINCREMENT,
    ai_id              INTEGER NOT NULL,      -- FK -> agents(id)
    session_identifier TEXT NOT NULL,
    project            TEXT NOT NULL DEFAULT '',
    connected_at       TEXT NOT NULL,
    disconnected_at    TEXT,
    close_reason       TEXT,

    FOREIGN KEY (ai_id) REFERENCES agents(id)
);

CREATE INDEX IF NOT EXISTS idx_hub_sessions_ai ON hub_sessions(ai_id, connected_at DESC);
"#;

/// Apply the initial migration.
pub fn up(conn: &Connection) -> Result<(), rusqlite::Error> {
    conn.execute_batch(UP_SQL)
}
