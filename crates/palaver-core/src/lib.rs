//! Core types, config, errors, and session model for Palaver.

pub mod config;
pub mod error;
pub mod session;
pub mod session_store;
pub mod types;
