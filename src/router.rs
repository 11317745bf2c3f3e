//! # Message Router
//!
//! Inbound routing and the drain side of the debounce cycle. Every message
//! runs through dedup, open-session routing and intent detection before it
//! is parked in the pending buffer; drained buffers become one generative
//! reply per chat.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.2.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: History summarization after drains
//! - 1.1.0: Assistant-confirmation reminder seeding
//! - 1.0.0: Initial routing order and drain

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, TimeZone, Utc};
use chrono_tz::Tz;
use log::{debug, error, info, warn};

use crate::database::Database;
use crate::features::aggregator::{BufferedMessage, ClaimedBuffer, MessageAggregator};
use crate::features::reminders::ReminderEngine;
use crate::gateway::MessageGateway;
use crate::llm::TextGenerator;

const GENERATION_FALLBACK: &str =
    "Desculpe, ocorreu um erro ao tentar gerar uma resposta. Por favor, tente novamente.";

/// One inbound message as delivered by the webhook.
#[derive(Debug, Clone)]
pub struct InboundMessage {
    pub message_id: String,
    pub chat_id: String,
    pub text: Option<String>,
    pub message_type: String,
    pub from_name: Option<String>,
    pub from_me: bool,
    pub timestamp: i64,
    pub link: Option<String>,
}

pub struct MessageRouter {
    db: Database,
    aggregator: MessageAggregator,
    engine: Arc<ReminderEngine>,
    gateway: Arc<dyn MessageGateway>,
    generator: Arc<dyn TextGenerator>,
    timezone: Tz,
    history_limit: usize,
    summarize_threshold: usize,
}

impl MessageRouter {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db: Database,
        aggregator: MessageAggregator,
        engine: Arc<ReminderEngine>,
        gateway: Arc<dyn MessageGateway>,
        generator: Arc<dyn TextGenerator>,
        timezone: Tz,
        history_limit: usize,
        summarize_threshold: usize,
    ) -> Self {
        MessageRouter {
            db,
            aggregator,
            engine,
            gateway,
            generator,
            timezone,
            history_limit,
            summarize_threshold,
        }
    }

    /// Route one inbound message. Order matters: dedup, open sessions,
    /// cancel intent, reminder intent, and only then the pending buffer.
    pub async fn on_inbound_message(&self, msg: InboundMessage) -> Result<()> {
        if msg.from_me {
            return Ok(());
        }

        let text = msg.text.clone().unwrap_or_default();
        let fresh = self
            .db
            .try_mark_processed(
                &msg.message_id,
                &msg.chat_id,
                msg.text.as_deref(),
                &msg.message_type,
                msg.from_name.as_deref(),
            )
            .await?;
        if !fresh {
            debug!("Skipping duplicate message {}", msg.message_id);
            return Ok(());
        }

        if !text.is_empty() {
            self.db
                .save_history(&msg.chat_id, &text, false, Utc::now())
                .await?;
            self.db
                .upsert_context(&msg.chat_id, Some(&text), None, Utc::now())
                .await?;
        }

        if self
            .engine
            .handle_session_turn(&msg.chat_id, &text, &msg.message_id)
            .await?
        {
            return Ok(());
        }

        if self.engine.is_cancel_request(&text) {
            return self
                .engine
                .initiate_cancellation(&msg.chat_id, &text, &msg.message_id)
                .await;
        }
        if self.engine.is_reminder_request(&text) {
            return self
                .engine
                .initiate_creation(&msg.chat_id, &text, &msg.message_id)
                .await;
        }

        let buffered = BufferedMessage {
            message_id: msg.message_id,
            text,
            message_type: msg.message_type,
            timestamp: msg.timestamp,
            link: msg.link,
        };
        self.aggregator
            .append(&msg.chat_id, &buffered, msg.from_name.as_deref())
            .await
    }

    /// Claim and drain every buffer whose debounce window has elapsed.
    /// One failing chat does not block the others.
    pub async fn process_pending(&self, now: DateTime<Utc>) -> Result<usize> {
        let claimed = self.aggregator.claim_ready(now).await?;
        let mut drained = 0;
        for buffer in claimed {
            let chat_id = buffer.chat_id.clone();
            match self.drain(buffer, now).await {
                Ok(()) => drained += 1,
                Err(e) => {
                    error!("Drain failed for {chat_id}: {e:#}");
                    self.aggregator.abort(&chat_id).await?;
                }
            }
        }
        Ok(drained)
    }

    async fn drain(&self, buffer: ClaimedBuffer, now: DateTime<Utc>) -> Result<()> {
        let combined = buffer.combined_text();
        if combined.trim().is_empty() {
            return self.aggregator.complete(&buffer.chat_id).await;
        }
        let reply_to = buffer.last_message_id().map(|s| s.to_string());

        let prompt = self
            .build_context_prompt(&buffer.chat_id, &combined, now, buffer.from_name.as_deref())
            .await;
        let reply = match self.generator.generate(&prompt).await {
            Ok(reply) => reply,
            Err(e) => {
                warn!("Generation failed for {}: {e:#}", buffer.chat_id);
                GENERATION_FALLBACK.to_string()
            }
        };

        // The model may itself have promised a reminder; in that case the
        // engine sends its own confirmation and the raw reply is dropped.
        let seeded = self
            .engine
            .process_assistant_reply(
                &buffer.chat_id,
                &reply,
                &combined,
                reply_to.as_deref().unwrap_or(""),
            )
            .await?;
        if !seeded {
            self.gateway
                .send_message(&buffer.chat_id, &reply, reply_to.as_deref())
                .await?;
            self.db
                .save_history(&buffer.chat_id, &reply, true, now)
                .await?;
            self.db
                .upsert_context(&buffer.chat_id, None, Some(&reply), now)
                .await?;
        }

        self.aggregator.complete(&buffer.chat_id).await?;
        if let Err(e) = self.maybe_summarize(&buffer.chat_id).await {
            warn!("Summarization failed for {}: {e:#}", buffer.chat_id);
        }
        Ok(())
    }

    /// Prompt assembly: long-term summary, recent turns with roles and
    /// timestamps, then the new interaction.
    async fn build_context_prompt(
        &self,
        chat_id: &str,
        input: &str,
        now: DateTime<Utc>,
        from_name: Option<&str>,
    ) -> String {
        let user = from_name.unwrap_or("Usuário");
        let now_local = now.with_timezone(&self.timezone);
        let stamp = now_local.format("%Y-%m-%d %H:%M:%S %Z");

        let summary = self.db.get_summary(chat_id).await.ok().flatten();
        let history = self
            .db
            .recent_history(chat_id, self.history_limit)
            .await
            .unwrap_or_default();

        if summary.is_none() && history.is_empty() {
            return format!("{user} (em {stamp}): {input}");
        }

        let mut parts = Vec::new();
        if let Some(summary) = summary {
            parts.push(format!(
                "### Resumo de conversas anteriores ###\n{}\n",
                summary.summary
            ));
        }
        if !history.is_empty() {
            let lines: Vec<String> = history
                .iter()
                .map(|entry| {
                    let role = if entry.is_bot { "Assistente" } else { user };
                    let when = match Utc.timestamp_opt(entry.timestamp, 0).single() {
                        Some(dt) => dt
                            .with_timezone(&self.timezone)
                            .format("%Y-%m-%d %H:%M:%S %Z")
                            .to_string(),
                        None => "data desconhecida".to_string(),
                    };
                    format!("{role} (em {when}): {}", entry.message_text)
                })
                .collect();
            parts.push(format!(
                "### Histórico recente da conversa (use para referência, não responda diretamente a elas) ###\n{}\n",
                lines.join("\n")
            ));
        }
        parts.push(
            "### Nova interação (responda apenas a esta nova interação) ###\n\
             Considere os timestamps das mensagens do histórico e da mensagem atual. \
             Se uma mensagem do histórico for significativamente antiga, avalie se o tópico ainda é relevante. \
             Use o histórico e o resumo como contexto apenas se pertinentes para a nova interação."
                .to_string(),
        );
        parts.push(format!("{user} (em {stamp}): {input}"));
        parts.join("\n")
    }

    /// Fold old turns into the long-term summary once enough have piled up.
    async fn maybe_summarize(&self, chat_id: &str) -> Result<()> {
        let pending = self
            .db
            .unsummarized_history(chat_id, self.summarize_threshold)
            .await?;
        if pending.len() < self.summarize_threshold {
            return Ok(());
        }

        let existing = self.db.get_summary(chat_id).await?;
        let transcript: Vec<String> = pending
            .iter()
            .map(|entry| {
                let role = if entry.is_bot { "Assistente" } else { "Usuário" };
                format!("{role}: {}", entry.message_text)
            })
            .collect();

        let mut prompt = String::from(
            "Resuma a conversa abaixo em um parágrafo conciso em português, \
             preservando fatos, preferências e compromissos mencionados.\n\n",
        );
        if let Some(existing) = &existing {
            prompt.push_str(&format!("Resumo anterior:\n{}\n\n", existing.summary));
        }
        prompt.push_str(&format!("Conversa:\n{}\n\nResumo:", transcript.join("\n")));

        let summary = self.generator.generate(&prompt).await?;
        let last_chunk_timestamp = pending.last().map(|e| e.timestamp).unwrap_or_default();
        self.db
            .upsert_summary(chat_id, summary.trim(), last_chunk_timestamp, Utc::now())
            .await?;
        let ids: Vec<i64> = pending.iter().map(|e| e.id).collect();
        self.db.mark_summarized(&ids).await?;
        info!("Summarized {} turns for {chat_id}", ids.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use crate::llm::testing::FakeGenerator;
    use chrono::Duration;

    const TZ: Tz = chrono_tz::America::Sao_Paulo;

    struct Harness {
        router: MessageRouter,
        engine: Arc<ReminderEngine>,
        gateway: Arc<FakeGateway>,
        db: Database,
    }

    fn inbound(id: &str, chat_id: &str, text: &str) -> InboundMessage {
        InboundMessage {
            message_id: id.to_string(),
            chat_id: chat_id.to_string(),
            text: Some(text.to_string()),
            message_type: "text".to_string(),
            from_name: Some("Ana".to_string()),
            from_me: false,
            timestamp: Utc::now().timestamp(),
            link: None,
        }
    }

    async fn harness(replies: &[&str]) -> Harness {
        let db = Database::new(":memory:").await.unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let generator = Arc::new(FakeGenerator::scripted(replies));
        let engine = Arc::new(ReminderEngine::new(
            db.clone(),
            gateway.clone(),
            generator.clone(),
            TZ,
        ));
        let aggregator = MessageAggregator::new(db.clone(), 15);
        let router = MessageRouter::new(
            db.clone(),
            aggregator,
            engine.clone(),
            gateway.clone(),
            generator,
            TZ,
            20,
            100,
        );
        Harness {
            router,
            engine,
            gateway,
            db,
        }
    }

    #[tokio::test]
    async fn test_duplicate_message_is_dropped() {
        let h = harness(&[]).await;
        h.router.on_inbound_message(inbound("m1", "c1", "oi")).await.unwrap();
        h.router.on_inbound_message(inbound("m1", "c1", "oi")).await.unwrap();

        let buffer = h.db.get_buffer("c1").await.unwrap().unwrap();
        let messages: Vec<BufferedMessage> =
            serde_json::from_str(&buffer.messages_json).unwrap();
        assert_eq!(messages.len(), 1);
    }

    #[tokio::test]
    async fn test_own_messages_are_ignored() {
        let h = harness(&[]).await;
        let mut msg = inbound("m1", "c1", "oi");
        msg.from_me = true;
        h.router.on_inbound_message(msg).await.unwrap();
        assert!(h.db.get_buffer("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_reminder_intent_bypasses_buffer() {
        let h = harness(&["pagar a conta"]).await;
        h.router
            .on_inbound_message(inbound("m1", "c1", "me lembra de pagar a conta amanhã às 10:00"))
            .await
            .unwrap();

        assert!(h.db.get_buffer("c1").await.unwrap().is_none());
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_session_turn_is_consumed_before_intents() {
        let h = harness(&["pagar a conta"]).await;
        h.router
            .on_inbound_message(inbound("m1", "c1", "me lembra de pagar a conta"))
            .await
            .unwrap();
        assert!(h.engine.has_open_session("c1"));

        // This turn answers the session prompt; it must not land in the
        // pending buffer even though it carries no reminder keywords.
        h.router
            .on_inbound_message(inbound("m2", "c1", "amanhã às 10:00"))
            .await
            .unwrap();
        assert!(h.db.get_buffer("c1").await.unwrap().is_none());
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_drain_generates_reply_and_clears_buffer() {
        let h = harness(&["Olá, Ana! Tudo ótimo por aqui."]).await;
        h.router.on_inbound_message(inbound("m1", "c1", "oi")).await.unwrap();
        h.router.on_inbound_message(inbound("m2", "c1", "tudo bem?")).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        assert_eq!(h.router.process_pending(later).await.unwrap(), 1);
        assert_eq!(h.gateway.sent_to("c1"), vec!["Olá, Ana! Tudo ótimo por aqui.".to_string()]);
        assert!(h.db.get_buffer("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_generation_failure_sends_fallback() {
        let h = harness(&[]).await;
        h.router.on_inbound_message(inbound("m1", "c1", "oi")).await.unwrap();

        let later = Utc::now() + Duration::seconds(20);
        h.router.process_pending(later).await.unwrap();
        assert_eq!(h.gateway.sent_to("c1"), vec![GENERATION_FALLBACK.to_string()]);
    }

    #[tokio::test]
    async fn test_send_failure_releases_buffer_for_retry() {
        let h = harness(&["resposta", "resposta depois"]).await;
        h.router.on_inbound_message(inbound("m1", "c1", "oi")).await.unwrap();

        h.gateway.set_failing(true);
        let later = Utc::now() + Duration::seconds(20);
        assert_eq!(h.router.process_pending(later).await.unwrap(), 0);
        assert!(h.db.get_buffer("c1").await.unwrap().is_some());

        h.gateway.set_failing(false);
        let retry = later + Duration::seconds(20);
        assert_eq!(h.router.process_pending(retry).await.unwrap(), 1);
        assert!(h.db.get_buffer("c1").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_assistant_reminder_reply_seeds_instead_of_sending() {
        let h = harness(&[
            "Pode deixar! Agendei um lembrete: *pagar o boleto* amanhã às 10:00",
            "pagar o boleto",
        ])
        .await;
        h.router
            .on_inbound_message(inbound("m1", "c1", "pode me avisar do boleto amanhã às 10:00?"))
            .await
            .unwrap();

        let later = Utc::now() + Duration::seconds(20);
        h.router.process_pending(later).await.unwrap();

        let active = h.db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "pagar o boleto");
        // Only the engine's confirmation was sent, not the raw reply.
        let sent = h.gateway.sent_to("c1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("pagar o boleto"));
    }

    #[tokio::test]
    async fn test_prompt_carries_history_and_summary() {
        let h = harness(&["resumo antigo", "ok"]).await;
        let now = Utc::now();
        h.db.upsert_summary("c1", "Ana gosta de café.", now.timestamp(), now)
            .await
            .unwrap();
        h.db.save_history("c1", "bom dia", false, now - Duration::minutes(5))
            .await
            .unwrap();

        let prompt = h
            .router
            .build_context_prompt("c1", "e aí?", now, Some("Ana"))
            .await;
        assert!(prompt.contains("Ana gosta de café."));
        assert!(prompt.contains("Ana (em"));
        assert!(prompt.contains("bom dia"));
        assert!(prompt.contains("e aí?"));
    }
}
