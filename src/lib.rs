// Core layer - shared types and configuration
pub mod core;

// Features layer - all feature modules
pub mod features;

// Infrastructure
pub mod database;
pub mod gateway;
pub mod llm;

// Application layer
pub mod router;
pub mod webhook;

// Re-export core config
pub use core::Config;

// Re-export feature items
pub use features::{
    // Aggregation
    BufferedMessage, ClaimedBuffer, MessageAggregator,
    // Extraction
    extract_reminder_details, normalize, ExtractedReminder,
    // Re-engagement
    ReengagementChecker, ReengagementPolicy,
    // Reminders
    next_occurrence, Recurrence, Reminder, ReminderDispatcher, ReminderEngine,
};

// Re-export infrastructure items
pub use database::Database;
pub use gateway::{MessageGateway, WhapiClient};
pub use llm::{GeminiClient, TextGenerator};

// Re-export application items
pub use router::{InboundMessage, MessageRouter};
pub use webhook::WebhookServer;
