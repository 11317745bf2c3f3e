// Feature modules of the recado bot

pub mod aggregator;
pub mod extraction;
pub mod reengagement;
pub mod reminders;

pub use aggregator::{BufferedMessage, ClaimedBuffer, MessageAggregator};
pub use extraction::{extract_reminder_details, normalize, ExtractedReminder};
pub use reengagement::{ReengagementChecker, ReengagementPolicy};
pub use reminders::{next_occurrence, Recurrence, Reminder, ReminderDispatcher, ReminderEngine};
