//! Core types, config, errors, and session-code model for Scene Relay.

pub mod config;
pub mod error;
pub mod pairing;
pub mod protocol;
pub mod session;
pub mod session_store;
