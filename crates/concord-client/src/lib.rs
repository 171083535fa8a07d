//! # concord-client
//!
//! Reference implementation of an agent's side of the Concord protocol:
//! Request API client, stream connection with reconnect/backoff/heartbeat
//! discipline, and the brain-state cache that makes an agent resumable
//! after a crash.

pub mod api;
pub mod brain;
pub mod config;
pub mod connection;
pub mod events;

mod error;

pub use api::ApiClient;
pub use brain::BrainCache;
pub use config::ClientConfig;
pub use connection::AgentClient;
pub use error::ClientError;
pub use events::AgentEvent;
