//! # Core Module
//!
//! Core domain types, configuration, and text utilities for the recado bot.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Add response module with message truncation utilities
//! - 1.0.0: Initial creation with config module

pub mod config;
pub mod response;

// Re-export commonly used items
pub use config::Config;
pub use response::{chunk_for_message, truncate_for_message, MESSAGE_LIMIT};
