//! # concord-shared
//!
//! Types shared between the Concord hub, the store, and agent clients:
//! the wire protocol frames, the compact token codec, core domain enums,
//! and protocol-wide constants.

pub mod constants;
pub mod error;
pub mod frames;
pub mod token;
pub mod types;

pub use error::TokenError;
pub use frames::Frame;
pub use token::{SigningKey, TokenPayload, TokenType};
