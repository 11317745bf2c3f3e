//! # Message Aggregator Feature
//!
//! Debounce buffer for inbound messages. Rapid-fire turns from one chat are
//! collected into a single pending buffer and handed downstream as one unit
//! once the chat goes quiet, so the reply reads them together instead of
//! answering each fragment.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.2.0: Drain loads the buffer content after the claim, not the scan snapshot
//! - 1.1.0: Media placeholders in the combined text
//! - 1.0.0: Initial buffer, claim and drain cycle

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};

use crate::database::Database;

/// One inbound message parked in a pending buffer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BufferedMessage {
    pub message_id: String,
    /// Body text, media caption, or empty for captionless media.
    pub text: String,
    /// Provider message type ("text", "image", "audio", ...).
    pub message_type: String,
    pub timestamp: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub link: Option<String>,
}

impl BufferedMessage {
    /// Render this message for the combined prompt. Media turns become a
    /// bracketed placeholder with the caption when present.
    fn render(&self) -> String {
        if self.message_type == "text" {
            self.text.clone()
        } else if self.text.is_empty() {
            format!("[{}]", self.message_type)
        } else {
            format!("[{}] {}", self.message_type, self.text)
        }
    }
}

/// A buffer this process has claimed exclusively, messages in arrival order.
#[derive(Debug, Clone)]
pub struct ClaimedBuffer {
    pub chat_id: String,
    pub from_name: Option<String>,
    pub messages: Vec<BufferedMessage>,
}

impl ClaimedBuffer {
    /// All messages joined into one prompt body, arrival order.
    pub fn combined_text(&self) -> String {
        self.messages
            .iter()
            .map(BufferedMessage::render)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Id of the newest message, used as the reply-to anchor.
    pub fn last_message_id(&self) -> Option<&str> {
        self.messages.last().map(|m| m.message_id.as_str())
    }
}

pub struct MessageAggregator {
    db: Database,
    debounce_secs: i64,
}

impl MessageAggregator {
    pub fn new(db: Database, debounce_secs: i64) -> Self {
        MessageAggregator { db, debounce_secs }
    }

    /// Park a message in its chat's buffer, restarting the debounce window.
    pub async fn append(
        &self,
        chat_id: &str,
        message: &BufferedMessage,
        from_name: Option<&str>,
    ) -> Result<()> {
        let json = serde_json::to_string(message)?;
        self.db.append_pending(chat_id, &json, from_name, Utc::now()).await?;
        debug!("Buffered message {} for {chat_id}", message.message_id);
        Ok(())
    }

    /// Claim every buffer that has been quiet for the debounce window.
    /// The guarded update in the store makes each buffer go to exactly one
    /// caller; losing a claim race is not an error.
    pub async fn claim_ready(&self, now: DateTime<Utc>) -> Result<Vec<ClaimedBuffer>> {
        let candidates = self.db.quiescent_buffers(now, self.debounce_secs).await?;
        let mut claimed = Vec::new();

        for candidate in candidates {
            if !self.db.claim_buffer(&candidate.chat_id, now).await? {
                debug!("Lost the claim race for {}", candidate.chat_id);
                continue;
            }
            if let Some(buffer) = self.load_claimed(&candidate.chat_id).await? {
                claimed.push(buffer);
            }
        }
        Ok(claimed)
    }

    /// Load the content of a buffer this caller just claimed. Reads the row
    /// again rather than reusing the scan snapshot: a message appended
    /// between the scan and the claim is in the row but not in the snapshot,
    /// and draining the snapshot would delete it unprocessed.
    async fn load_claimed(&self, chat_id: &str) -> Result<Option<ClaimedBuffer>> {
        let Some(row) = self.db.get_buffer(chat_id).await? else {
            return Ok(None);
        };
        let mut messages: Vec<BufferedMessage> = match serde_json::from_str(&row.messages_json) {
            Ok(messages) => messages,
            Err(e) => {
                // A corrupt buffer can never drain; drop it rather than
                // wedging the scan forever.
                warn!("Dropping corrupt buffer for {chat_id}: {e}");
                self.db.delete_buffer(chat_id).await?;
                return Ok(None);
            }
        };
        if messages.is_empty() {
            self.db.delete_buffer(chat_id).await?;
            return Ok(None);
        }
        messages.sort_by_key(|m| m.timestamp);
        info!("Claimed buffer for {chat_id} with {} message(s)", messages.len());
        Ok(Some(ClaimedBuffer {
            chat_id: chat_id.to_string(),
            from_name: row.from_name,
            messages,
        }))
    }

    /// Drain finished: the buffer's messages were handled.
    pub async fn complete(&self, chat_id: &str) -> Result<()> {
        self.db.delete_buffer(chat_id).await
    }

    /// Drain failed: release the claim so a later scan retries the buffer.
    pub async fn abort(&self, chat_id: &str) -> Result<()> {
        warn!("Releasing claimed buffer for {chat_id} after a failed drain");
        self.db.release_buffer(chat_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn message(id: &str, text: &str, timestamp: i64) -> BufferedMessage {
        BufferedMessage {
            message_id: id.to_string(),
            text: text.to_string(),
            message_type: "text".to_string(),
            timestamp,
            link: None,
        }
    }

    async fn harness() -> (MessageAggregator, Database) {
        let db = Database::new(":memory:").await.unwrap();
        (MessageAggregator::new(db.clone(), 15), db)
    }

    #[tokio::test]
    async fn test_burst_drains_as_one_buffer_in_order() {
        let (aggregator, _) = harness().await;
        aggregator.append("c1", &message("m2", "tudo bem?", 200), None).await.unwrap();
        aggregator.append("c1", &message("m1", "oi", 100), Some("Ana")).await.unwrap();

        // Still inside the debounce window: nothing to claim.
        assert!(aggregator.claim_ready(Utc::now()).await.unwrap().is_empty());

        let later = Utc::now() + Duration::seconds(20);
        let claimed = aggregator.claim_ready(later).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].chat_id, "c1");
        assert_eq!(claimed[0].combined_text(), "oi\ntudo bem?");
        assert_eq!(claimed[0].last_message_id(), Some("m2"));
        assert_eq!(claimed[0].from_name.as_deref(), Some("Ana"));
    }

    #[tokio::test]
    async fn test_claimed_buffer_is_not_claimed_twice() {
        let (aggregator, _) = harness().await;
        aggregator.append("c1", &message("m1", "oi", 100), None).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        assert_eq!(aggregator.claim_ready(later).await.unwrap().len(), 1);
        assert!(aggregator.claim_ready(later).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_complete_deletes_and_new_message_starts_fresh() {
        let (aggregator, db) = harness().await;
        aggregator.append("c1", &message("m1", "oi", 100), None).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        aggregator.claim_ready(later).await.unwrap();
        aggregator.complete("c1").await.unwrap();
        assert!(db.get_buffer("c1").await.unwrap().is_none());

        aggregator.append("c1", &message("m2", "de novo", 300), None).await.unwrap();
        let buffer = db.get_buffer("c1").await.unwrap().unwrap();
        let messages: Vec<BufferedMessage> =
            serde_json::from_str(&buffer.messages_json).unwrap();
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].message_id, "m2");
    }

    #[tokio::test]
    async fn test_abort_releases_for_retry() {
        let (aggregator, _) = harness().await;
        aggregator.append("c1", &message("m1", "oi", 100), None).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        assert_eq!(aggregator.claim_ready(later).await.unwrap().len(), 1);
        aggregator.abort("c1").await.unwrap();

        let retry = later + Duration::seconds(20);
        let claimed = aggregator.claim_ready(retry).await.unwrap();
        assert_eq!(claimed.len(), 1);
        assert_eq!(claimed[0].messages.len(), 1);
    }

    #[tokio::test]
    async fn test_message_appended_after_claim_still_drains() {
        let (aggregator, db) = harness().await;
        aggregator.append("c1", &message("m1", "oi", 100), None).await.unwrap();

        // Win the claim, then let one more message land in the row before
        // the content is loaded. Appends preserve the processing flag, so
        // this interleaving is legal.
        let now = Utc::now() + Duration::seconds(20);
        assert!(db.claim_buffer("c1", now).await.unwrap());
        aggregator.append("c1", &message("m2", "esqueci de falar", 200), None).await.unwrap();

        let buffer = aggregator.load_claimed("c1").await.unwrap().unwrap();
        assert_eq!(buffer.messages.len(), 2);
        assert_eq!(buffer.combined_text(), "oi\nesqueci de falar");
        assert_eq!(buffer.last_message_id(), Some("m2"));
    }

    #[tokio::test]
    async fn test_media_placeholders_in_combined_text() {
        let (aggregator, _) = harness().await;
        let mut audio = message("m1", "", 100);
        audio.message_type = "audio".to_string();
        let mut image = message("m2", "olha isso", 200);
        image.message_type = "image".to_string();
        aggregator.append("c1", &audio, None).await.unwrap();
        aggregator.append("c1", &image, None).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        let claimed = aggregator.claim_ready(later).await.unwrap();
        assert_eq!(claimed[0].combined_text(), "[audio]\n[image] olha isso");
    }
}
