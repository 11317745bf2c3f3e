//! # Reminders Feature
//!
//! Reminder lifecycle: creation and cancellation sessions, recurrence
//! computation, and due-reminder dispatch.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.2.0: Cancellation sessions with listed-option "todos" handling
//! - 1.1.0: Monthly day-of-month anchoring
//! - 1.0.0: Initial creation sessions and dispatch loop

pub mod dispatcher;
pub mod recurrence;
pub mod sessions;

pub use dispatcher::ReminderDispatcher;
pub use recurrence::next_occurrence;
pub use sessions::{ReminderEngine, SessionStore};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// How a reminder repeats after it fires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Recurrence {
    None,
    Daily,
    Weekly,
    Monthly,
    Yearly,
}

impl Recurrence {
    pub fn as_str(&self) -> &'static str {
        match self {
            Recurrence::None => "none",
            Recurrence::Daily => "daily",
            Recurrence::Weekly => "weekly",
            Recurrence::Monthly => "monthly",
            Recurrence::Yearly => "yearly",
        }
    }

    pub fn parse(value: &str) -> Recurrence {
        match value {
            "daily" => Recurrence::Daily,
            "weekly" => Recurrence::Weekly,
            "monthly" => Recurrence::Monthly,
            "yearly" => Recurrence::Yearly,
            _ => Recurrence::None,
        }
    }
}

/// A persisted reminder. Never physically deleted; cancellation and dispatch
/// flip `is_active` so the audit history survives.
#[derive(Debug, Clone)]
pub struct Reminder {
    pub id: String,
    pub chat_id: String,
    pub content: String,
    pub reminder_time_utc: DateTime<Utc>,
    pub recurrence: Recurrence,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub last_sent_at: Option<DateTime<Utc>>,
    pub original_message_id: String,
    /// Anchor time-of-day in UTC, preserved across recurring reschedules.
    pub original_hour_utc: u32,
    pub original_minute_utc: u32,
    pub original_day_of_month: Option<u32>,
    pub timezone: String,
}
