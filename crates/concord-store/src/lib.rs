//! # concord-store
//!
//! Durable state for the Concord hub, backed by SQLite.
//!
//! The crate exposes a synchronous [`Database`] handle that wraps a
//! `rusqlite::Connection` and provides typed CRUD helpers for every domain
//! model: agent profiles, conversations, messages, tokens, permissions,
//! work sessions, collaboration requests, brain states, and the auth audit
//! log. The store is the only component that persists anything.

pub mod agents;
pub mod audit;
pub mod brain;
pub mod collab;
pub mod conversations;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod models;
pub mod permissions;
pub mod tokens;
pub mod work_sessions;

mod error;
mod sql;

pub use database::Database;
pub use error::StoreError;
pub use models::*;
