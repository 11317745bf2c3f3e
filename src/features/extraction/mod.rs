//! # Reminder Extraction Feature
//!
//! Heuristic Brazilian-Portuguese extraction of reminder intent, content,
//! date/time and recurrence from free-form chat text.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Monthly day-of-month detection ahead of the keyword table
//! - 1.1.0: Time shorthand rewriting ("18h30", "9 e 30", "as 18")
//! - 1.0.0: Initial normalizer, phrase tables and fuzzy parser

pub mod dateparse;
pub mod extractor;
pub mod normalizer;
pub mod phrases;

pub use extractor::{
    extract_assistant_confirmation, extract_reminder_details, parse_datetime_reply,
    ExtractedReminder,
};
pub use normalizer::normalize;
