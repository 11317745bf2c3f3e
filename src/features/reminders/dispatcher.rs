//! Due-reminder dispatch loop body.
//!
//! One cycle queries everything active and due, delivers each reminder and
//! applies the lifecycle transition: one-shot reminders deactivate, recurring
//! ones move to their next occurrence. A failed send leaves the reminder
//! untouched so the next cycle retries it, which makes delivery
//! at-least-once.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.4.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.1.0: Data-integrity guards deactivate malformed rows
//! - 1.0.0: Initial dispatch cycle

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use log::{error, info, warn};
use rand::Rng;

use super::{next_occurrence, Recurrence, Reminder};
use crate::database::Database;
use crate::gateway::MessageGateway;

const DELIVERY_TEMPLATES: &[&str] = &[
    "⏰ Lembrete: {content}",
    "⏰ Oi! Passando para te lembrar: {content}",
    "⏰ Não esquece: {content}",
];

pub struct ReminderDispatcher {
    db: Database,
    gateway: Arc<dyn MessageGateway>,
}

impl ReminderDispatcher {
    pub fn new(db: Database, gateway: Arc<dyn MessageGateway>) -> Self {
        ReminderDispatcher { db, gateway }
    }

    fn compose(reminder: &Reminder) -> String {
        let template = DELIVERY_TEMPLATES[rand::rng().random_range(0..DELIVERY_TEMPLATES.len())];
        template.replace("{content}", &reminder.content)
    }

    /// Run one dispatch cycle against `now`. Returns how many reminders were
    /// delivered. Per-reminder failures are logged and skipped so one bad
    /// row cannot stall the rest of the batch.
    pub async fn run_cycle(&self, now: DateTime<Utc>) -> Result<usize> {
        let due = self.db.due_reminders(now).await?;
        let mut delivered = 0;

        for reminder in due {
            // Rows missing routing or payload cannot be delivered and would
            // come due forever; deactivate them with an annotation.
            if reminder.chat_id.is_empty() {
                warn!("Reminder {} has no chat_id, deactivating", reminder.id);
                self.db
                    .deactivate_reminder(&reminder.id, Some("missing chat_id"), false, now)
                    .await?;
                continue;
            }
            if reminder.content.trim().is_empty() {
                warn!("Reminder {} has no content, deactivating", reminder.id);
                self.db
                    .deactivate_reminder(&reminder.id, Some("missing content"), false, now)
                    .await?;
                continue;
            }

            let message = Self::compose(&reminder);
            match self
                .gateway
                .send_message(&reminder.chat_id, &message, None)
                .await
            {
                Ok(()) => {
                    delivered += 1;
                    info!("Delivered reminder {} to {}", reminder.id, reminder.chat_id);
                    self.db
                        .save_history(&reminder.chat_id, &message, true, now)
                        .await?;
                    self.apply_post_send_transition(&reminder, now).await?;
                }
                Err(e) => {
                    // Left active with an unchanged due time; the next cycle
                    // retries it.
                    error!(
                        "Failed to deliver reminder {} to {}: {e:#}",
                        reminder.id, reminder.chat_id
                    );
                }
            }
        }
        Ok(delivered)
    }

    async fn apply_post_send_transition(&self, reminder: &Reminder, now: DateTime<Utc>) -> Result<()> {
        if reminder.recurrence == Recurrence::None {
            return self.db.deactivate_reminder(&reminder.id, None, false, now).await;
        }
        match next_occurrence(
            reminder.reminder_time_utc,
            reminder.recurrence,
            reminder.original_hour_utc,
            reminder.original_minute_utc,
            now,
        ) {
            Some(next) => self.db.reschedule_reminder(&reminder.id, next, now).await,
            None => {
                warn!(
                    "Could not compute the next occurrence for reminder {}, deactivating",
                    reminder.id
                );
                self.db
                    .deactivate_reminder(&reminder.id, Some("no next occurrence"), false, now)
                    .await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use chrono::{Duration, TimeZone, Timelike};

    fn reminder(id: &str, due: DateTime<Utc>, recurrence: Recurrence) -> Reminder {
        Reminder {
            id: id.to_string(),
            chat_id: "c1".to_string(),
            content: "pagar a conta".to_string(),
            reminder_time_utc: due,
            recurrence,
            is_active: true,
            created_at: due,
            last_sent_at: None,
            original_message_id: "m1".to_string(),
            original_hour_utc: due.hour(),
            original_minute_utc: due.minute(),
            original_day_of_month: None,
            timezone: "America/Sao_Paulo".to_string(),
        }
    }

    async fn harness() -> (ReminderDispatcher, Database, Arc<FakeGateway>) {
        let db = Database::new(":memory:").await.unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let dispatcher = ReminderDispatcher::new(db.clone(), gateway.clone());
        (dispatcher, db, gateway)
    }

    #[tokio::test]
    async fn test_one_shot_reminder_deactivates_after_send() {
        let (dispatcher, db, gateway) = harness().await;
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        db.save_reminder(&reminder("r1", now - Duration::minutes(1), Recurrence::None))
            .await
            .unwrap();

        assert_eq!(dispatcher.run_cycle(now).await.unwrap(), 1);
        assert!(gateway.sent_to("c1")[0].contains("pagar a conta"));
        assert!(db.active_reminders_for_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_recurring_reminder_reschedules() {
        let (dispatcher, db, _) = harness().await;
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 12, 30, 0).unwrap();
        db.save_reminder(&reminder("r1", due, Recurrence::Daily)).await.unwrap();

        let now = due + Duration::minutes(1);
        assert_eq!(dispatcher.run_cycle(now).await.unwrap(), 1);

        let active = db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(
            active[0].reminder_time_utc,
            Utc.with_ymd_and_hms(2024, 3, 11, 12, 30, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn test_failed_send_leaves_reminder_due() {
        let (dispatcher, db, gateway) = harness().await;
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        db.save_reminder(&reminder("r1", due, Recurrence::None)).await.unwrap();

        gateway.set_failing(true);
        let now = due + Duration::minutes(1);
        assert_eq!(dispatcher.run_cycle(now).await.unwrap(), 0);

        let active = db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].reminder_time_utc, due);

        // Next cycle retries and succeeds.
        gateway.set_failing(false);
        assert_eq!(dispatcher.run_cycle(now + Duration::minutes(1)).await.unwrap(), 1);
        assert!(db.active_reminders_for_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_content_row_is_deactivated_not_sent() {
        let (dispatcher, db, gateway) = harness().await;
        let due = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        let mut broken = reminder("r1", due, Recurrence::None);
        broken.content = " ".to_string();
        db.save_reminder(&broken).await.unwrap();

        assert_eq!(dispatcher.run_cycle(due + Duration::minutes(1)).await.unwrap(), 0);
        assert!(gateway.sent_to("c1").is_empty());
        assert!(db.active_reminders_for_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_not_yet_due_is_untouched() {
        let (dispatcher, db, gateway) = harness().await;
        let now = Utc.with_ymd_and_hms(2024, 3, 10, 12, 0, 0).unwrap();
        db.save_reminder(&reminder("r1", now + Duration::hours(1), Recurrence::None))
            .await
            .unwrap();

        assert_eq!(dispatcher.run_cycle(now).await.unwrap(), 0);
        assert!(gateway.sent_to("c1").is_empty());
        assert_eq!(db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }
}
