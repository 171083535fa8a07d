//! # concord-server
//!
//! The Concord hub process: WebSocket presence/messaging hub, Request
//! API, token authority, liveness loop, and host-level process lock.

pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod hub;
pub mod liveness;
pub mod lock;
pub mod permissions;
pub mod rate_limit;
pub mod registry;
pub mod state;
