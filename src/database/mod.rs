//! # Database
//!
//! SQLite persistence for processed-message dedup, pending message buffers,
//! reminders, conversation history/context/summaries and re-engagement logs.
//!
//! All timestamps are stored as unix seconds (UTC). Reminders are never
//! physically deleted; lifecycle transitions flip `is_active`.
//!
//! - **Version**: 1.3.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.3.0: Re-engagement log table
//! - 1.2.0: Conversation summaries with bulk summarized marking
//! - 1.1.0: Guarded-update claim for pending buffers
//! - 1.0.0: Initial schema

use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use log::info;
use sqlite::{Connection, State};

use crate::features::reminders::{Recurrence, Reminder};

const SCHEMA: &str = "
    CREATE TABLE IF NOT EXISTS processed_messages (
        message_id   TEXT PRIMARY KEY,
        chat_id      TEXT NOT NULL,
        text_content TEXT,
        message_type TEXT NOT NULL,
        from_name    TEXT,
        processed_at INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS pending_buffers (
        chat_id     TEXT PRIMARY KEY,
        messages    TEXT NOT NULL,
        last_update INTEGER NOT NULL,
        processing  INTEGER NOT NULL DEFAULT 0,
        from_name   TEXT
    );
    CREATE TABLE IF NOT EXISTS reminders (
        id                   TEXT PRIMARY KEY,
        chat_id              TEXT NOT NULL,
        content              TEXT NOT NULL,
        reminder_time_utc    INTEGER NOT NULL,
        recurrence           TEXT NOT NULL DEFAULT 'none',
        is_active            INTEGER NOT NULL DEFAULT 1,
        created_at           INTEGER NOT NULL,
        last_sent_at         INTEGER,
        cancelled_at         INTEGER,
        original_message_id  TEXT NOT NULL,
        original_hour_utc    INTEGER NOT NULL,
        original_minute_utc  INTEGER NOT NULL,
        original_day_of_month INTEGER,
        timezone             TEXT NOT NULL,
        error_log            TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_reminders_due
        ON reminders (is_active, reminder_time_utc);
    CREATE TABLE IF NOT EXISTS conversation_history (
        id           INTEGER PRIMARY KEY AUTOINCREMENT,
        chat_id      TEXT NOT NULL,
        message_text TEXT NOT NULL,
        is_bot       INTEGER NOT NULL,
        timestamp    INTEGER NOT NULL,
        summarized   INTEGER NOT NULL DEFAULT 0
    );
    CREATE INDEX IF NOT EXISTS idx_history_chat
        ON conversation_history (chat_id, timestamp);
    CREATE TABLE IF NOT EXISTS conversation_contexts (
        chat_id           TEXT PRIMARY KEY,
        last_updated      INTEGER NOT NULL,
        last_user_message TEXT,
        last_bot_response TEXT
    );
    CREATE TABLE IF NOT EXISTS conversation_summaries (
        chat_id              TEXT PRIMARY KEY,
        summary              TEXT NOT NULL,
        last_updated         INTEGER NOT NULL,
        last_chunk_timestamp INTEGER NOT NULL
    );
    CREATE TABLE IF NOT EXISTS reengagement_logs (
        chat_id      TEXT PRIMARY KEY,
        last_sent    INTEGER NOT NULL,
        message_sent TEXT
    );
";

/// A stored conversation turn.
#[derive(Debug, Clone)]
pub struct HistoryEntry {
    pub id: i64,
    pub message_text: String,
    pub is_bot: bool,
    pub timestamp: i64,
}

/// A pending buffer ready for inspection by the aggregator scan.
#[derive(Debug, Clone)]
pub struct PendingBuffer {
    pub chat_id: String,
    pub messages_json: String,
    pub last_update: i64,
    pub from_name: Option<String>,
}

/// Stored long-term summary of a conversation.
#[derive(Debug, Clone)]
pub struct ConversationSummary {
    pub summary: String,
    pub last_chunk_timestamp: i64,
}

/// Thread-safe handle over a single SQLite connection. Cheap to clone; all
/// clones share the connection behind a mutex which is never held across an
/// await point.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

fn ts(dt: DateTime<Utc>) -> i64 {
    dt.timestamp()
}

fn dt(secs: i64) -> Result<DateTime<Utc>> {
    DateTime::from_timestamp(secs, 0).ok_or_else(|| anyhow!("timestamp out of range: {secs}"))
}

impl Database {
    pub async fn new(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database at {path}"))?;
        conn.execute("PRAGMA journal_mode = WAL; PRAGMA foreign_keys = ON;")
            .context("failed to set pragmas")?;
        conn.execute(SCHEMA).context("failed to apply schema")?;
        info!("Database ready at {path}");
        Ok(Database {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    fn lock(&self) -> MutexGuard<'_, Connection> {
        // A poisoned mutex means a panic mid-statement; propagating the
        // panic is the only sane option left.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }

    // --- processed messages (dedup) ---

    /// Record a message id as processed. Returns `false` when the id was
    /// already present (duplicate webhook delivery).
    pub async fn try_mark_processed(
        &self,
        message_id: &str,
        chat_id: &str,
        text_content: Option<&str>,
        message_type: &str,
        from_name: Option<&str>,
    ) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT OR IGNORE INTO processed_messages
             (message_id, chat_id, text_content, message_type, from_name, processed_at)
             VALUES (?, ?, ?, ?, ?, ?)",
        )?;
        stmt.bind((1, message_id))?;
        stmt.bind((2, chat_id))?;
        stmt.bind((3, text_content))?;
        stmt.bind((4, message_type))?;
        stmt.bind((5, from_name))?;
        stmt.bind((6, ts(Utc::now())))?;
        stmt.next()?;
        Ok(conn.change_count() == 1)
    }

    // --- pending buffers ---

    /// Append one serialized message to a chat's pending buffer, creating
    /// the buffer if absent. The `processing` flag of an existing buffer is
    /// preserved so an in-flight drain is not disturbed.
    pub async fn append_pending(
        &self,
        chat_id: &str,
        message_json: &str,
        from_name: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        conn.execute("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<()> {
            let existing: Option<String> = {
                let mut stmt =
                    conn.prepare("SELECT messages FROM pending_buffers WHERE chat_id = ?")?;
                stmt.bind((1, chat_id))?;
                if stmt.next()? == State::Row {
                    Some(stmt.read::<String, _>(0)?)
                } else {
                    None
                }
            };
            let merged = match existing {
                Some(json) => {
                    let mut list: Vec<serde_json::Value> = serde_json::from_str(&json)
                        .context("corrupt pending buffer json")?;
                    list.push(serde_json::from_str(message_json)?);
                    serde_json::to_string(&list)?
                }
                None => format!("[{message_json}]"),
            };
            let mut stmt = conn.prepare(
                "INSERT INTO pending_buffers (chat_id, messages, last_update, processing, from_name)
                 VALUES (?, ?, ?, 0, ?)
                 ON CONFLICT(chat_id) DO UPDATE SET
                     messages = excluded.messages,
                     last_update = excluded.last_update,
                     from_name = COALESCE(excluded.from_name, pending_buffers.from_name)",
            )?;
            stmt.bind((1, chat_id))?;
            stmt.bind((2, merged.as_str()))?;
            stmt.bind((3, ts(now)))?;
            stmt.bind((4, from_name))?;
            stmt.next()?;
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK");
                Err(e)
            }
        }
    }

    /// Buffers that are unclaimed and quiet for at least `debounce_secs`.
    pub async fn quiescent_buffers(
        &self,
        now: DateTime<Utc>,
        debounce_secs: i64,
    ) -> Result<Vec<PendingBuffer>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id, messages, last_update, from_name FROM pending_buffers
             WHERE processing = 0 AND last_update <= ?",
        )?;
        stmt.bind((1, ts(now) - debounce_secs))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(PendingBuffer {
                chat_id: stmt.read(0)?,
                messages_json: stmt.read(1)?,
                last_update: stmt.read(2)?,
                from_name: stmt.read::<Option<String>, _>(3)?,
            });
        }
        Ok(out)
    }

    /// Atomically flip a buffer's `processing` flag from 0 to 1. The guarded
    /// update makes exactly one concurrent caller win.
    pub async fn claim_buffer(&self, chat_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "UPDATE pending_buffers SET processing = 1, last_update = ?
             WHERE chat_id = ? AND processing = 0",
        )?;
        stmt.bind((1, ts(now)))?;
        stmt.bind((2, chat_id))?;
        stmt.next()?;
        Ok(conn.change_count() == 1)
    }

    /// Release a claimed buffer without consuming it (drain failed; the
    /// messages stay and will be retried on a later scan).
    pub async fn release_buffer(&self, chat_id: &str) -> Result<()> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("UPDATE pending_buffers SET processing = 0 WHERE chat_id = ?")?;
        stmt.bind((1, chat_id))?;
        stmt.next()?;
        Ok(())
    }

    pub async fn delete_buffer(&self, chat_id: &str) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare("DELETE FROM pending_buffers WHERE chat_id = ?")?;
        stmt.bind((1, chat_id))?;
        stmt.next()?;
        Ok(())
    }

    pub async fn get_buffer(&self, chat_id: &str) -> Result<Option<PendingBuffer>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id, messages, last_update, from_name FROM pending_buffers
             WHERE chat_id = ?",
        )?;
        stmt.bind((1, chat_id))?;
        if stmt.next()? == State::Row {
            Ok(Some(PendingBuffer {
                chat_id: stmt.read(0)?,
                messages_json: stmt.read(1)?,
                last_update: stmt.read(2)?,
                from_name: stmt.read::<Option<String>, _>(3)?,
            }))
        } else {
            Ok(None)
        }
    }

    // --- reminders ---

    pub async fn save_reminder(&self, reminder: &Reminder) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT INTO reminders
             (id, chat_id, content, reminder_time_utc, recurrence, is_active, created_at,
              last_sent_at, original_message_id, original_hour_utc, original_minute_utc,
              original_day_of_month, timezone)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )?;
        stmt.bind((1, reminder.id.as_str()))?;
        stmt.bind((2, reminder.chat_id.as_str()))?;
        stmt.bind((3, reminder.content.as_str()))?;
        stmt.bind((4, ts(reminder.reminder_time_utc)))?;
        stmt.bind((5, reminder.recurrence.as_str()))?;
        stmt.bind((6, reminder.is_active as i64))?;
        stmt.bind((7, ts(reminder.created_at)))?;
        stmt.bind((8, reminder.last_sent_at.map(ts)))?;
        stmt.bind((9, reminder.original_message_id.as_str()))?;
        stmt.bind((10, reminder.original_hour_utc as i64))?;
        stmt.bind((11, reminder.original_minute_utc as i64))?;
        stmt.bind((12, reminder.original_day_of_month.map(|d| d as i64)))?;
        stmt.bind((13, reminder.timezone.as_str()))?;
        stmt.next()?;
        Ok(())
    }

    fn read_reminder(stmt: &sqlite::Statement<'_>) -> Result<Reminder> {
        Ok(Reminder {
            id: stmt.read(0)?,
            chat_id: stmt.read(1)?,
            content: stmt.read(2)?,
            reminder_time_utc: dt(stmt.read(3)?)?,
            recurrence: Recurrence::parse(&stmt.read::<String, _>(4)?),
            is_active: stmt.read::<i64, _>(5)? != 0,
            created_at: dt(stmt.read(6)?)?,
            last_sent_at: stmt.read::<Option<i64>, _>(7)?.map(dt).transpose()?,
            original_message_id: stmt.read(8)?,
            original_hour_utc: stmt.read::<i64, _>(9)? as u32,
            original_minute_utc: stmt.read::<i64, _>(10)? as u32,
            original_day_of_month: stmt.read::<Option<i64>, _>(11)?.map(|d| d as u32),
            timezone: stmt.read(12)?,
        })
    }

    const REMINDER_COLUMNS: &'static str =
        "id, chat_id, content, reminder_time_utc, recurrence, is_active, created_at,
         last_sent_at, original_message_id, original_hour_utc, original_minute_utc,
         original_day_of_month, timezone";

    /// Active reminders for one chat, earliest due first.
    pub async fn active_reminders_for_chat(&self, chat_id: &str) -> Result<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders WHERE chat_id = ? AND is_active = 1
             ORDER BY reminder_time_utc ASC",
            Self::REMINDER_COLUMNS
        ))?;
        stmt.bind((1, chat_id))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(Self::read_reminder(&stmt)?);
        }
        Ok(out)
    }

    /// All active reminders due at or before `now`.
    pub async fn due_reminders(&self, now: DateTime<Utc>) -> Result<Vec<Reminder>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM reminders WHERE is_active = 1 AND reminder_time_utc <= ?
             ORDER BY reminder_time_utc ASC",
            Self::REMINDER_COLUMNS
        ))?;
        stmt.bind((1, ts(now)))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(Self::read_reminder(&stmt)?);
        }
        Ok(out)
    }

    /// Deactivate one reminder. `error` lands in the error log column,
    /// `cancelled` stamps the cancellation time instead of a send time.
    pub async fn deactivate_reminder(
        &self,
        id: &str,
        error: Option<&str>,
        cancelled: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let sql = if cancelled {
            "UPDATE reminders SET is_active = 0, cancelled_at = ?, error_log = ? WHERE id = ?"
        } else {
            "UPDATE reminders SET is_active = 0, last_sent_at = ?, error_log = ? WHERE id = ?"
        };
        let mut stmt = conn.prepare(sql)?;
        stmt.bind((1, ts(now)))?;
        stmt.bind((2, error))?;
        stmt.bind((3, id))?;
        stmt.next()?;
        Ok(())
    }

    /// Move a recurring reminder to its next occurrence after a successful
    /// send, keeping it active.
    pub async fn reschedule_reminder(
        &self,
        id: &str,
        next_time_utc: DateTime<Utc>,
        sent_at: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "UPDATE reminders SET reminder_time_utc = ?, last_sent_at = ? WHERE id = ?",
        )?;
        stmt.bind((1, ts(next_time_utc)))?;
        stmt.bind((2, ts(sent_at)))?;
        stmt.bind((3, id))?;
        stmt.next()?;
        Ok(())
    }

    /// Deactivate every active reminder for a chat. Returns how many were
    /// flipped.
    pub async fn deactivate_all_for_chat(&self, chat_id: &str, now: DateTime<Utc>) -> Result<usize> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "UPDATE reminders SET is_active = 0, cancelled_at = ?
             WHERE chat_id = ? AND is_active = 1",
        )?;
        stmt.bind((1, ts(now)))?;
        stmt.bind((2, chat_id))?;
        stmt.next()?;
        Ok(conn.change_count())
    }

    // --- conversation history / context / summaries ---

    pub async fn save_history(
        &self,
        chat_id: &str,
        message_text: &str,
        is_bot: bool,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT INTO conversation_history (chat_id, message_text, is_bot, timestamp)
             VALUES (?, ?, ?, ?)",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, message_text))?;
        stmt.bind((3, is_bot as i64))?;
        stmt.bind((4, ts(now)))?;
        stmt.next()?;
        Ok(())
    }

    /// Most recent turns for a chat, oldest first.
    pub async fn recent_history(&self, chat_id: &str, limit: usize) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message_text, is_bot, timestamp FROM
             (SELECT id, message_text, is_bot, timestamp FROM conversation_history
              WHERE chat_id = ? ORDER BY timestamp DESC, id DESC LIMIT ?)
             ORDER BY timestamp ASC, id ASC",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, limit as i64))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(HistoryEntry {
                id: stmt.read(0)?,
                message_text: stmt.read(1)?,
                is_bot: stmt.read::<i64, _>(2)? != 0,
                timestamp: stmt.read(3)?,
            });
        }
        Ok(out)
    }

    /// Oldest unsummarized turns for a chat, up to `limit`.
    pub async fn unsummarized_history(
        &self,
        chat_id: &str,
        limit: usize,
    ) -> Result<Vec<HistoryEntry>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, message_text, is_bot, timestamp FROM conversation_history
             WHERE chat_id = ? AND summarized = 0
             ORDER BY timestamp ASC, id ASC LIMIT ?",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, limit as i64))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(HistoryEntry {
                id: stmt.read(0)?,
                message_text: stmt.read(1)?,
                is_bot: stmt.read::<i64, _>(2)? != 0,
                timestamp: stmt.read(3)?,
            });
        }
        Ok(out)
    }

    /// Mark a batch of history rows as folded into the summary.
    pub async fn mark_summarized(&self, ids: &[i64]) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let conn = self.lock();
        conn.execute("BEGIN IMMEDIATE")?;
        let result = (|| -> Result<()> {
            let mut stmt =
                conn.prepare("UPDATE conversation_history SET summarized = 1 WHERE id = ?")?;
            for id in ids {
                stmt.reset()?;
                stmt.bind((1, *id))?;
                stmt.next()?;
            }
            Ok(())
        })();
        match result {
            Ok(()) => {
                conn.execute("COMMIT")?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK");
                Err(e)
            }
        }
    }

    pub async fn upsert_context(
        &self,
        chat_id: &str,
        last_user_message: Option<&str>,
        last_bot_response: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT INTO conversation_contexts
             (chat_id, last_updated, last_user_message, last_bot_response)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                 last_updated = excluded.last_updated,
                 last_user_message = COALESCE(excluded.last_user_message,
                                              conversation_contexts.last_user_message),
                 last_bot_response = COALESCE(excluded.last_bot_response,
                                              conversation_contexts.last_bot_response)",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, ts(now)))?;
        stmt.bind((3, last_user_message))?;
        stmt.bind((4, last_bot_response))?;
        stmt.next()?;
        Ok(())
    }

    pub async fn get_summary(&self, chat_id: &str) -> Result<Option<ConversationSummary>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT summary, last_chunk_timestamp FROM conversation_summaries WHERE chat_id = ?",
        )?;
        stmt.bind((1, chat_id))?;
        if stmt.next()? == State::Row {
            Ok(Some(ConversationSummary {
                summary: stmt.read(0)?,
                last_chunk_timestamp: stmt.read(1)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn upsert_summary(
        &self,
        chat_id: &str,
        summary: &str,
        last_chunk_timestamp: i64,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT INTO conversation_summaries
             (chat_id, summary, last_updated, last_chunk_timestamp)
             VALUES (?, ?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                 summary = excluded.summary,
                 last_updated = excluded.last_updated,
                 last_chunk_timestamp = excluded.last_chunk_timestamp",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, summary))?;
        stmt.bind((3, ts(now)))?;
        stmt.bind((4, last_chunk_timestamp))?;
        stmt.next()?;
        Ok(())
    }

    // --- re-engagement ---

    /// Chats whose last context update is older than `inactive_cutoff` but
    /// newer than `stale_cutoff` (long-dead chats are not nudged).
    pub async fn inactive_chats(
        &self,
        inactive_cutoff: DateTime<Utc>,
        stale_cutoff: DateTime<Utc>,
    ) -> Result<Vec<String>> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT chat_id FROM conversation_contexts
             WHERE last_updated < ? AND last_updated >= ?",
        )?;
        stmt.bind((1, ts(inactive_cutoff)))?;
        stmt.bind((2, ts(stale_cutoff)))?;
        let mut out = Vec::new();
        while stmt.next()? == State::Row {
            out.push(stmt.read(0)?);
        }
        Ok(out)
    }

    pub async fn last_reengagement(&self, chat_id: &str) -> Result<Option<i64>> {
        let conn = self.lock();
        let mut stmt =
            conn.prepare("SELECT last_sent FROM reengagement_logs WHERE chat_id = ?")?;
        stmt.bind((1, chat_id))?;
        if stmt.next()? == State::Row {
            Ok(Some(stmt.read(0)?))
        } else {
            Ok(None)
        }
    }

    pub async fn record_reengagement(
        &self,
        chat_id: &str,
        message: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "INSERT INTO reengagement_logs (chat_id, last_sent, message_sent)
             VALUES (?, ?, ?)
             ON CONFLICT(chat_id) DO UPDATE SET
                 last_sent = excluded.last_sent,
                 message_sent = excluded.message_sent",
        )?;
        stmt.bind((1, chat_id))?;
        stmt.bind((2, ts(now)))?;
        stmt.bind((3, message))?;
        stmt.next()?;
        Ok(())
    }
}
