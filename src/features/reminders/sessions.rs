//! Reminder creation and cancellation sessions.
//!
//! At most one session of each kind is open per chat. Sessions live in
//! memory only; a restart simply drops them and the user starts over.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: true
//!
//! ## Changelog
//! - 1.2.0: Sessions seeded from assistant confirmations
//! - 1.1.0: Cancellation sessions with listed-option handling
//! - 1.0.0: Creation sessions

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Duration, Timelike, Utc};
use chrono_tz::Tz;
use dashmap::DashMap;
use log::{error, info, warn};
use rand::Rng;
use uuid::Uuid;

use crate::core::response::summary_snippet;
use crate::database::Database;
use crate::features::extraction::phrases::{
    all_qualifier, cancel_keywords, request_keywords, CONFIRMATION_TEMPLATES, SESSION_CANCEL_WORDS,
};
use crate::features::extraction::{
    extract_assistant_confirmation, extract_reminder_details, normalize, parse_datetime_reply,
    ExtractedReminder,
};
use crate::features::reminders::{Recurrence, Reminder};
use crate::gateway::MessageGateway;
use crate::llm::{refine_reminder_content, TextGenerator};

const PROMPT_CONTENT: &str = "Ok! Qual é o conteúdo do lembrete?";
const PROMPT_DATETIME: &str = "Entendido. Para quando devo agendar?";
const PROMPT_DATETIME_RETRY: &str =
    "Não entendi a data/hora. Tente: hoje 14:30, amanhã 09:00, 25/12 18:00.";
const PROMPT_CONTENT_RETRY: &str =
    "O conteúdo do lembrete não pode ser vazio. Por favor, me diga o que devo lembrar.";
const CREATION_CANCELLED: &str = "Criação de lembrete cancelada.";
const NO_ACTIVE_REMINDERS: &str = "Você não tem lembretes ativos.";
const NOTHING_CANCELLED: &str = "Ok, nenhum lembrete cancelado.";
const INVALID_CHOICE: &str = "Escolha inválida. Digite o número, 'todos' ou 'nenhum'.";
const SAVE_FAILED: &str = "Desculpe, não consegui salvar seu lembrete. Tente novamente.";

/// How many reminders a cancellation prompt lists at most.
const CANCELLATION_LIST_CAP: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CreationState {
    AwaitingContent,
    AwaitingDatetime,
}

#[derive(Debug, Clone)]
struct CreationSession {
    content: Option<String>,
    datetime_utc: Option<DateTime<Utc>>,
    recurrence: Recurrence,
    day_of_month: Option<u32>,
    state: CreationState,
    original_message_id: String,
    last_interaction: DateTime<Utc>,
}

#[derive(Debug, Clone)]
struct CancellationOption {
    reminder_id: String,
    summary: String,
}

#[derive(Debug, Clone)]
struct CancellationSession {
    options: Vec<CancellationOption>,
    original_message_id: String,
    last_interaction: DateTime<Utc>,
}

/// In-memory store of open sessions, keyed by chat id.
#[derive(Default)]
pub struct SessionStore {
    creation: DashMap<String, CreationSession>,
    cancellation: DashMap<String, CancellationSession>,
}

impl SessionStore {
    pub fn new() -> Self {
        SessionStore::default()
    }

    pub fn has_open_session(&self, chat_id: &str) -> bool {
        self.creation.contains_key(chat_id) || self.cancellation.contains_key(chat_id)
    }

    /// Drop sessions idle longer than `timeout_secs`. Returns how many of
    /// each kind were removed.
    pub fn sweep_stale(&self, now: DateTime<Utc>, timeout_secs: i64) -> (usize, usize) {
        let cutoff = now - Duration::seconds(timeout_secs);
        let before_creation = self.creation.len();
        self.creation.retain(|chat_id, s| {
            let keep = s.last_interaction >= cutoff;
            if !keep {
                info!("Creation session for {chat_id} expired");
            }
            keep
        });
        let before_cancellation = self.cancellation.len();
        self.cancellation.retain(|chat_id, s| {
            let keep = s.last_interaction >= cutoff;
            if !keep {
                info!("Cancellation session for {chat_id} expired");
            }
            keep
        });
        (
            before_creation - self.creation.len(),
            before_cancellation - self.cancellation.len(),
        )
    }
}

/// Reminder lifecycle engine: intent detection, multi-turn sessions and
/// persistence of completed reminders.
pub struct ReminderEngine {
    db: Database,
    gateway: Arc<dyn MessageGateway>,
    generator: Arc<dyn TextGenerator>,
    timezone: Tz,
    sessions: SessionStore,
}

impl ReminderEngine {
    pub fn new(
        db: Database,
        gateway: Arc<dyn MessageGateway>,
        generator: Arc<dyn TextGenerator>,
        timezone: Tz,
    ) -> Self {
        ReminderEngine {
            db,
            gateway,
            generator,
            timezone,
            sessions: SessionStore::new(),
        }
    }

    pub fn is_reminder_request(&self, text: &str) -> bool {
        !text.is_empty() && request_keywords().is_match(&normalize(text))
    }

    pub fn is_cancel_request(&self, text: &str) -> bool {
        !text.is_empty() && cancel_keywords().is_match(&normalize(text))
    }

    pub fn has_open_session(&self, chat_id: &str) -> bool {
        self.sessions.has_open_session(chat_id)
    }

    pub fn sweep_stale_sessions(&self, timeout_secs: i64) -> (usize, usize) {
        self.sessions.sweep_stale(Utc::now(), timeout_secs)
    }

    fn now_local(&self) -> DateTime<Tz> {
        Utc::now().with_timezone(&self.timezone)
    }

    async fn send_and_log(&self, chat_id: &str, text: &str, reply_to: Option<&str>) -> Result<()> {
        self.gateway.send_message(chat_id, text, reply_to).await?;
        self.db.save_history(chat_id, text, true, Utc::now()).await
    }

    /// Route a turn into whichever session is open for this chat. Returns
    /// `true` when the turn was consumed by a session.
    pub async fn handle_session_turn(
        &self,
        chat_id: &str,
        text: &str,
        message_id: &str,
    ) -> Result<bool> {
        if self.sessions.cancellation.contains_key(chat_id) {
            self.handle_cancellation_turn(chat_id, text, message_id).await?;
            return Ok(true);
        }
        if self.sessions.creation.contains_key(chat_id) {
            self.handle_creation_turn(chat_id, text, message_id).await?;
            return Ok(true);
        }
        Ok(false)
    }

    // --- creation ---

    /// Start a creation flow from a user utterance that matched the request
    /// keywords. Missing fields open a session; a fully resolved utterance
    /// persists immediately.
    pub async fn initiate_creation(&self, chat_id: &str, text: &str, message_id: &str) -> Result<()> {
        info!("Initiating reminder creation for {chat_id}");
        self.sessions.creation.remove(chat_id);

        let details = extract_reminder_details(text, self.now_local());
        self.seed_creation(chat_id, details, message_id).await
    }

    /// Start a creation flow seeded from an assistant confirmation, filling
    /// gaps from the user's own utterance. Returns `true` when the reply
    /// did announce a reminder and a flow was started.
    pub async fn process_assistant_reply(
        &self,
        chat_id: &str,
        assistant_text: &str,
        user_text: &str,
        message_id: &str,
    ) -> Result<bool> {
        let now_local = self.now_local();
        let Some(mut details) = extract_assistant_confirmation(assistant_text, now_local) else {
            return Ok(false);
        };
        info!("Assistant reply for {chat_id} announced a reminder, seeding a session");

        let from_user = extract_reminder_details(user_text, now_local);
        if details.content.is_none() {
            details.content = from_user.content;
        }
        if details.datetime_utc.is_none() {
            details.datetime_utc = from_user.datetime_utc;
            if details.recurrence == Recurrence::None {
                details.recurrence = from_user.recurrence;
            }
            if details.day_of_month.is_none() {
                details.day_of_month = from_user.day_of_month;
            }
        }

        self.sessions.creation.remove(chat_id);
        self.seed_creation(chat_id, details, message_id).await?;
        Ok(true)
    }

    async fn seed_creation(
        &self,
        chat_id: &str,
        details: ExtractedReminder,
        message_id: &str,
    ) -> Result<()> {
        let missing_state = if details.content.is_none() {
            Some(CreationState::AwaitingContent)
        } else if details.datetime_utc.is_none() {
            Some(CreationState::AwaitingDatetime)
        } else {
            None
        };

        match missing_state {
            Some(state) => {
                let prompt = match state {
                    CreationState::AwaitingContent => PROMPT_CONTENT,
                    CreationState::AwaitingDatetime => PROMPT_DATETIME,
                };
                self.sessions.creation.insert(
                    chat_id.to_string(),
                    CreationSession {
                        content: details.content,
                        datetime_utc: details.datetime_utc,
                        recurrence: details.recurrence,
                        day_of_month: details.day_of_month,
                        state,
                        original_message_id: message_id.to_string(),
                        last_interaction: Utc::now(),
                    },
                );
                self.send_and_log(chat_id, prompt, Some(message_id)).await
            }
            None => {
                let content = details.content.unwrap_or_default();
                let datetime_utc = details.datetime_utc.unwrap_or_else(Utc::now);
                self.finalize_reminder(
                    chat_id,
                    &content,
                    datetime_utc,
                    details.recurrence,
                    details.day_of_month,
                    message_id,
                )
                .await
            }
        }
    }

    async fn handle_creation_turn(&self, chat_id: &str, text: &str, message_id: &str) -> Result<()> {
        let Some(mut session) = self.sessions.creation.get(chat_id).map(|s| s.clone()) else {
            warn!("No open creation session for {chat_id}");
            return Ok(());
        };
        session.last_interaction = Utc::now();

        let normalized = normalize(text);
        if SESSION_CANCEL_WORDS.contains(&normalized.as_str()) {
            self.sessions.creation.remove(chat_id);
            return self.send_and_log(chat_id, CREATION_CANCELLED, Some(message_id)).await;
        }

        match session.state {
            CreationState::AwaitingContent => {
                let trimmed = text.trim();
                if trimmed.is_empty() {
                    self.sessions.creation.insert(chat_id.to_string(), session);
                    return self
                        .send_and_log(chat_id, PROMPT_CONTENT_RETRY, Some(message_id))
                        .await;
                }
                session.content = Some(trimmed.to_string());
            }
            CreationState::AwaitingDatetime => {
                match parse_datetime_reply(text, session.day_of_month, self.now_local()) {
                    Some(dt) => session.datetime_utc = Some(dt),
                    None => {
                        self.sessions.creation.insert(chat_id.to_string(), session);
                        return self
                            .send_and_log(chat_id, PROMPT_DATETIME_RETRY, Some(message_id))
                            .await;
                    }
                }
            }
        }

        // Recompute what is still missing; the other field may have been
        // absent all along.
        if session.content.is_none() {
            session.state = CreationState::AwaitingContent;
            self.sessions.creation.insert(chat_id.to_string(), session);
            return self.send_and_log(chat_id, PROMPT_CONTENT, Some(message_id)).await;
        }
        if session.datetime_utc.is_none() {
            session.state = CreationState::AwaitingDatetime;
            self.sessions.creation.insert(chat_id.to_string(), session);
            return self.send_and_log(chat_id, PROMPT_DATETIME, Some(message_id)).await;
        }

        self.sessions.creation.remove(chat_id);
        let content = session.content.unwrap_or_default();
        let datetime_utc = session.datetime_utc.unwrap_or_else(Utc::now);
        self.finalize_reminder(
            chat_id,
            &content,
            datetime_utc,
            session.recurrence,
            session.day_of_month,
            &session.original_message_id,
        )
        .await
    }

    /// Refine, persist and confirm a fully resolved reminder.
    async fn finalize_reminder(
        &self,
        chat_id: &str,
        content: &str,
        datetime_utc: DateTime<Utc>,
        recurrence: Recurrence,
        day_of_month: Option<u32>,
        message_id: &str,
    ) -> Result<()> {
        let refined = refine_reminder_content(self.generator.as_ref(), content).await;

        let reminder = Reminder {
            id: Uuid::new_v4().to_string(),
            chat_id: chat_id.to_string(),
            content: refined.clone(),
            reminder_time_utc: datetime_utc,
            recurrence,
            is_active: true,
            created_at: Utc::now(),
            last_sent_at: None,
            original_message_id: message_id.to_string(),
            original_hour_utc: datetime_utc.hour(),
            original_minute_utc: datetime_utc.minute(),
            original_day_of_month: day_of_month,
            timezone: self.timezone.name().to_string(),
        };

        if let Err(e) = self.db.save_reminder(&reminder).await {
            error!("Failed to save reminder for {chat_id}: {e:#}");
            let _ = self.send_and_log(chat_id, SAVE_FAILED, Some(message_id)).await;
            return Err(e);
        }

        let local = datetime_utc.with_timezone(&self.timezone);
        let template = CONFIRMATION_TEMPLATES
            [rand::rng().random_range(0..CONFIRMATION_TEMPLATES.len())];
        let mut confirmation = template
            .replace("{datetime}", &local.format("%d/%m/%Y às %H:%M").to_string())
            .replace("{content}", &refined);
        if recurrence != Recurrence::None {
            confirmation.push_str(&format!(" (Recorrência: {})", recurrence.as_str()));
        }
        info!("Reminder {} saved for {chat_id}, due {}", reminder.id, datetime_utc);
        self.send_and_log(chat_id, &confirmation, Some(message_id)).await
    }

    // --- cancellation ---

    /// Start a cancellation flow. An "all"-qualified request deactivates
    /// every active reminder immediately; otherwise the active reminders
    /// are listed and a choice session opens.
    pub async fn initiate_cancellation(
        &self,
        chat_id: &str,
        text: &str,
        message_id: &str,
    ) -> Result<()> {
        info!("Initiating reminder cancellation for {chat_id}");
        self.sessions.cancellation.remove(chat_id);

        if all_qualifier().is_match(&normalize(text)) {
            let count = self.db.deactivate_all_for_chat(chat_id, Utc::now()).await?;
            let reply = if count > 0 {
                format!("{count} lembrete(s) cancelados.")
            } else {
                NO_ACTIVE_REMINDERS.to_string()
            };
            return self.send_and_log(chat_id, &reply, Some(message_id)).await;
        }

        let active = self.db.active_reminders_for_chat(chat_id).await?;
        if active.is_empty() {
            return self.send_and_log(chat_id, NO_ACTIVE_REMINDERS, Some(message_id)).await;
        }

        let mut options = Vec::new();
        let mut lines = vec!["Qual lembrete cancelar?".to_string()];
        for (i, reminder) in active.iter().take(CANCELLATION_LIST_CAP).enumerate() {
            let local = reminder.reminder_time_utc.with_timezone(&self.timezone);
            let summary = format!(
                "'{}' ({})",
                summary_snippet(&reminder.content, 30),
                local.format("%d/%m %H:%M")
            );
            lines.push(format!("{}. {summary}", i + 1));
            options.push(CancellationOption {
                reminder_id: reminder.id.clone(),
                summary,
            });
        }
        if options.len() == 1 {
            lines.push("\nDigite '1' ou 'sim' para cancelar, ou 'não'.".to_string());
        } else {
            lines.push("\nDigite o número, 'todos' (listados) ou 'nenhum'.".to_string());
        }

        self.sessions.cancellation.insert(
            chat_id.to_string(),
            CancellationSession {
                options,
                original_message_id: message_id.to_string(),
                last_interaction: Utc::now(),
            },
        );
        self.send_and_log(chat_id, &lines.join("\n"), Some(message_id)).await
    }

    async fn handle_cancellation_turn(
        &self,
        chat_id: &str,
        text: &str,
        message_id: &str,
    ) -> Result<()> {
        let Some(mut session) = self.sessions.cancellation.get(chat_id).map(|s| s.clone()) else {
            warn!("No open cancellation session for {chat_id}");
            return Ok(());
        };
        session.last_interaction = Utc::now();
        let input = normalize(text);
        let reply_to = session.original_message_id.clone();

        if SESSION_CANCEL_WORDS.contains(&input.as_str())
            || matches!(input.as_str(), "nenhum" | "nao")
        {
            self.sessions.cancellation.remove(chat_id);
            return self.send_and_log(chat_id, NOTHING_CANCELLED, Some(&reply_to)).await;
        }

        if input == "todos" {
            // "todos" inside a session only covers the listed options; the
            // list may have been capped.
            let mut cancelled = 0;
            for option in &session.options {
                self.db
                    .deactivate_reminder(&option.reminder_id, None, true, Utc::now())
                    .await?;
                cancelled += 1;
            }
            self.sessions.cancellation.remove(chat_id);
            let reply = format!("{cancelled} lembretes da lista cancelados.");
            return self.send_and_log(chat_id, &reply, Some(&reply_to)).await;
        }

        let choice = if session.options.len() == 1 && matches!(input.as_str(), "sim" | "s" | "1") {
            Some(0)
        } else {
            input
                .parse::<usize>()
                .ok()
                .filter(|n| (1..=session.options.len()).contains(n))
                .map(|n| n - 1)
        };

        match choice {
            Some(idx) => {
                let option = &session.options[idx];
                self.db
                    .deactivate_reminder(&option.reminder_id, None, true, Utc::now())
                    .await?;
                self.sessions.cancellation.remove(chat_id);
                let reply = format!("Lembrete {} cancelado.", option.summary);
                self.send_and_log(chat_id, &reply, Some(&reply_to)).await
            }
            None => {
                // Invalid input keeps the session open for another try.
                self.sessions.cancellation.insert(chat_id.to_string(), session);
                self.send_and_log(chat_id, INVALID_CHOICE, Some(message_id)).await
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::testing::FakeGateway;
    use crate::llm::testing::FakeGenerator;

    const TZ: Tz = chrono_tz::America::Sao_Paulo;

    struct Harness {
        engine: ReminderEngine,
        gateway: Arc<FakeGateway>,
        db: Database,
    }

    async fn harness(replies: &[&str]) -> Harness {
        let db = Database::new(":memory:").await.unwrap();
        let gateway = Arc::new(FakeGateway::new());
        let generator = Arc::new(FakeGenerator::scripted(replies));
        let engine = ReminderEngine::new(db.clone(), gateway.clone(), generator, TZ);
        Harness { engine, gateway, db }
    }

    #[tokio::test]
    async fn test_full_utterance_persists_without_session() {
        let h = harness(&["pagar a conta"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta amanhã às 18:30", "m1")
            .await
            .unwrap();

        assert!(!h.engine.has_open_session("c1"));
        let active = h.db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "pagar a conta");
        let sent = h.gateway.sent_to("c1");
        assert_eq!(sent.len(), 1);
        assert!(sent[0].contains("pagar a conta"));
    }

    #[tokio::test]
    async fn test_missing_datetime_opens_session_then_completes() {
        let h = harness(&["pagar a conta"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta", "m1")
            .await
            .unwrap();

        assert!(h.engine.has_open_session("c1"));
        assert_eq!(h.gateway.sent_to("c1"), vec![PROMPT_DATETIME.to_string()]);

        let consumed = h
            .engine
            .handle_session_turn("c1", "amanhã às 10:00", "m2")
            .await
            .unwrap();
        assert!(consumed);
        assert!(!h.engine.has_open_session("c1"));
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_datetime_parse_failure_reprompts() {
        let h = harness(&[]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta", "m1")
            .await
            .unwrap();
        h.engine
            .handle_session_turn("c1", "sei la quando", "m2")
            .await
            .unwrap();

        assert!(h.engine.has_open_session("c1"));
        assert_eq!(h.gateway.sent_to("c1").last().unwrap(), PROMPT_DATETIME_RETRY);
    }

    #[tokio::test]
    async fn test_cancel_word_destroys_creation_session() {
        let h = harness(&[]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta", "m1")
            .await
            .unwrap();
        h.engine.handle_session_turn("c1", "cancelar", "m2").await.unwrap();

        assert!(!h.engine.has_open_session("c1"));
        assert_eq!(h.gateway.sent_to("c1").last().unwrap(), CREATION_CANCELLED);
        assert!(h.db.active_reminders_for_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_missing_content_prompts_and_takes_turn_verbatim() {
        let h = harness(&["pagar a conta de luz"]).await;
        h.engine
            .initiate_creation("c1", "me lembra amanhã às 10:00", "m1")
            .await
            .unwrap();
        assert_eq!(h.gateway.sent_to("c1"), vec![PROMPT_CONTENT.to_string()]);

        h.engine
            .handle_session_turn("c1", "pagar a conta de luz", "m2")
            .await
            .unwrap();
        let active = h.db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "pagar a conta de luz");
    }

    #[tokio::test]
    async fn test_cancel_all_before_session_deactivates_everything() {
        let h = harness(&["a", "b", "c"]).await;
        for text in [
            "me lembra de pagar a conta amanhã às 10:00",
            "me lembra de tomar remedio amanhã às 11:00",
            "me lembra de ligar pro medico amanhã às 12:00",
        ] {
            h.engine.initiate_creation("c1", text, "m").await.unwrap();
        }
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 3);

        h.engine
            .initiate_cancellation("c1", "cancelar todos os meus lembretes", "m4")
            .await
            .unwrap();

        assert!(!h.engine.has_open_session("c1"));
        assert!(h.db.active_reminders_for_chat("c1").await.unwrap().is_empty());
        assert!(h.gateway.sent_to("c1").last().unwrap().contains("3 lembrete(s)"));
    }

    #[tokio::test]
    async fn test_cancellation_numeric_choice() {
        let h = harness(&["a", "b"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta amanhã às 10:00", "m1")
            .await
            .unwrap();
        h.engine
            .initiate_creation("c1", "me lembra de tomar remedio amanhã às 11:00", "m2")
            .await
            .unwrap();

        h.engine.initiate_cancellation("c1", "cancelar lembrete", "m3").await.unwrap();
        assert!(h.engine.has_open_session("c1"));

        // Invalid input re-prompts and keeps the session open.
        h.engine.handle_session_turn("c1", "talvez", "m4").await.unwrap();
        assert!(h.engine.has_open_session("c1"));
        assert_eq!(h.gateway.sent_to("c1").last().unwrap(), INVALID_CHOICE);

        h.engine.handle_session_turn("c1", "2", "m5").await.unwrap();
        assert!(!h.engine.has_open_session("c1"));
        let active = h.db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
    }

    #[tokio::test]
    async fn test_single_option_yes_shortcut() {
        let h = harness(&["a"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta amanhã às 10:00", "m1")
            .await
            .unwrap();
        h.engine.initiate_cancellation("c1", "cancelar lembrete", "m2").await.unwrap();

        h.engine.handle_session_turn("c1", "sim", "m3").await.unwrap();
        assert!(!h.engine.has_open_session("c1"));
        assert!(h.db.active_reminders_for_chat("c1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancellation_none_word_aborts() {
        let h = harness(&["a"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta amanhã às 10:00", "m1")
            .await
            .unwrap();
        h.engine.initiate_cancellation("c1", "cancelar lembrete", "m2").await.unwrap();
        h.engine.handle_session_turn("c1", "nenhum", "m3").await.unwrap();

        assert!(!h.engine.has_open_session("c1"));
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_cancellation_accepts_both_cancel_word_forms() {
        let h = harness(&["a"]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta amanhã às 10:00", "m1")
            .await
            .unwrap();
        h.engine.initiate_cancellation("c1", "cancelar lembrete", "m2").await.unwrap();
        h.engine.handle_session_turn("c1", "cancela", "m3").await.unwrap();

        assert!(!h.engine.has_open_session("c1"));
        assert_eq!(h.gateway.sent_to("c1").last().unwrap(), NOTHING_CANCELLED);
        assert_eq!(h.db.active_reminders_for_chat("c1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_stale_session_sweep() {
        let h = harness(&[]).await;
        h.engine
            .initiate_creation("c1", "me lembra de pagar a conta", "m1")
            .await
            .unwrap();
        assert!(h.engine.has_open_session("c1"));

        // Not stale yet.
        let (creation, _) = h.engine.sweep_stale_sessions(300);
        assert_eq!(creation, 0);

        // Everything is stale with a zero timeout.
        let (creation, _) = h.engine.sweep_stale_sessions(-1);
        assert_eq!(creation, 1);
        assert!(!h.engine.has_open_session("c1"));
    }

    #[tokio::test]
    async fn test_assistant_reply_seeds_and_persists() {
        let h = harness(&["pagar o boleto"]).await;
        let seeded = h
            .engine
            .process_assistant_reply(
                "c1",
                "Pode deixar! Agendei um lembrete para amanhã às 10:00.",
                "me lembra de pagar o boleto amanhã às 10:00",
                "m1",
            )
            .await
            .unwrap();

        assert!(seeded);
        assert!(!h.engine.has_open_session("c1"));
        let active = h.db.active_reminders_for_chat("c1").await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].content, "pagar o boleto");
    }

    #[tokio::test]
    async fn test_plain_reply_is_not_seeded() {
        let h = harness(&[]).await;
        let seeded = h
            .engine
            .process_assistant_reply("c1", "O clima amanhã será ótimo!", "como fica o tempo?", "m1")
            .await
            .unwrap();
        assert!(!seeded);
        assert!(h.gateway.sent_to("c1").is_empty());
    }

    #[tokio::test]
    async fn test_intent_detection() {
        let h = harness(&[]).await;
        assert!(h.engine.is_reminder_request("Me lembra de pagar a conta"));
        assert!(!h.engine.is_reminder_request("bom dia!"));
        assert!(h.engine.is_cancel_request("cancelar lembrete"));
        assert!(!h.engine.is_cancel_request("cancelar a pizza"));
    }
}
