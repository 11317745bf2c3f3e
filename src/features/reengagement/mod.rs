//! # Re-engagement Feature
//!
//! Periodic nudge for chats that went quiet. A chat is eligible when its
//! last activity falls inside a window (old enough to count as inactive,
//! recent enough to still be worth nudging) and it has not been nudged
//! again within the anti-spam gap.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.5.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.0.0: Initial inactivity check with generated nudges

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Utc};
use log::{debug, info, warn};
use rand::Rng;

use crate::database::Database;
use crate::features::extraction::phrases::FALLBACK_REENGAGEMENT_MESSAGES;
use crate::gateway::MessageGateway;
use crate::llm::TextGenerator;

#[derive(Debug, Clone, Copy)]
pub struct ReengagementPolicy {
    /// Hours of silence before a chat counts as inactive.
    pub inactive_hours: i64,
    /// Hours of silence after which a chat is too stale to nudge.
    pub stale_hours: i64,
    /// Minimum hours between two nudges to the same chat.
    pub min_gap_hours: i64,
}

pub struct ReengagementChecker {
    db: Database,
    gateway: Arc<dyn MessageGateway>,
    generator: Arc<dyn TextGenerator>,
    policy: ReengagementPolicy,
}

impl ReengagementChecker {
    pub fn new(
        db: Database,
        gateway: Arc<dyn MessageGateway>,
        generator: Arc<dyn TextGenerator>,
        policy: ReengagementPolicy,
    ) -> Self {
        ReengagementChecker {
            db,
            gateway,
            generator,
            policy,
        }
    }

    async fn nudge_text(&self) -> String {
        let prompt = "Escreva uma mensagem curta e simpática em português para retomar \
                      contato com alguém que não conversa com você há alguns dias. \
                      Uma frase, sem assinatura.";
        match self.generator.generate(prompt).await {
            Ok(text) if !text.trim().is_empty() => text.trim().to_string(),
            _ => {
                let idx = rand::rng().random_range(0..FALLBACK_REENGAGEMENT_MESSAGES.len());
                FALLBACK_REENGAGEMENT_MESSAGES[idx].to_string()
            }
        }
    }

    /// Run one re-engagement pass. Returns how many chats were nudged.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<usize> {
        let inactive_cutoff = now - Duration::hours(self.policy.inactive_hours);
        let stale_cutoff = now - Duration::hours(self.policy.stale_hours);
        let candidates = self.db.inactive_chats(inactive_cutoff, stale_cutoff).await?;
        let mut nudged = 0;

        for chat_id in candidates {
            if let Some(last_sent) = self.db.last_reengagement(&chat_id).await? {
                let gap = now.timestamp() - last_sent;
                if gap < self.policy.min_gap_hours * 3600 {
                    debug!("Skipping re-engagement for {chat_id}, nudged {gap}s ago");
                    continue;
                }
            }

            let text = self.nudge_text().await;
            match self.gateway.send_message(&chat_id, &text, None).await {
                Ok(()) => {
                    info!("Sent re-engagement nudge to {chat_id}");
                    self.db.record_reengagement(&chat_id, &text, now).await?;
                    self.db.save_history(&chat_id, &text, true, now).await?;
                    nudged += 1;
                }
                Err(e) => warn!("Failed to nudge {chat_id}: {e:#}"),
            }
        }
        Ok(nudged)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use crate::llm::testing::FakeGenerator;

    const POLICY: ReengagementPolicy = ReengagementPolicy {
        inactive_hours: 48,
        stale_hours: 72,
        min_gap_hours: 23,
    };

    async fn harness(replies: &[&str]) -> (ReengagementChecker, Database, Arc<FakeGateway>) {
        let db = Database::new(":memory:").await.unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let generator = Arc::new(FakeGenerator::scripted(replies));
        let checker = ReengagementChecker::new(db.clone(), gateway.clone(), generator, POLICY);
        (checker, db, gateway)
    }

    #[tokio::test]
    async fn test_inactive_chat_gets_nudged_once() {
        let (checker, db, gateway) = harness(&["Oi! Sumiu, tudo certo?"]).await;
        let now = Utc::now();
        db.upsert_context("c1", Some("oi"), None, now - Duration::hours(50))
            .await
            .unwrap();

        assert_eq!(checker.run_cycle(now).await.unwrap(), 1);
        assert_eq!(gateway.sent_to("c1"), vec!["Oi! Sumiu, tudo certo?".to_string()]);

        // Anti-spam gap: a second pass right after sends nothing.
        assert_eq!(checker.run_cycle(now).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_active_and_stale_chats_are_skipped() {
        let (checker, db, gateway) = harness(&[]).await;
        let now = Utc::now();
        db.upsert_context("active", Some("oi"), None, now - Duration::hours(1))
            .await
            .unwrap();
        db.upsert_context("stale", Some("oi"), None, now - Duration::hours(200))
            .await
            .unwrap();

        assert_eq!(checker.run_cycle(now).await.unwrap(), 0);
        assert!(gateway.sent_to("active").is_empty());
        assert!(gateway.sent_to("stale").is_empty());
    }

    #[tokio::test]
    async fn test_generator_failure_falls_back_to_canned_text() {
        let (checker, db, gateway) = harness(&[]).await;
        let now = Utc::now();
        db.upsert_context("c1", Some("oi"), None, now - Duration::hours(50))
            .await
            .unwrap();

        assert_eq!(checker.run_cycle(now).await.unwrap(), 1);
        let sent = gateway.sent_to("c1");
        assert!(FALLBACK_REENGAGEMENT_MESSAGES.contains(&sent[0].as_str()));
    }
}
