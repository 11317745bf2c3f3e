//! Phrase tables and compiled patterns for the reminder intent pipeline.
//!
//! Everything here is tuned for Brazilian-Portuguese phrasing. Correctness of
//! the extractor is defined relative to these tables, not to natural language
//! in general.
//!
//! - **Version**: 1.1.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.1.0: Added assistant-confirmation detection patterns
//! - 1.0.0: Initial phrase tables extracted from the router

use std::sync::OnceLock;

use regex::Regex;

use crate::features::reminders::Recurrence;

/// Leading prepositions/pronouns stripped repeatedly from the start of the
/// payload before parsing.
pub const LEADING_STOP_WORDS: &[&str] = &[
    "de", "para", "que", "sobre", "do", "da", "dos", "das", "me", "mim", "nos", "pra", "pro",
    "pros", "pras",
];

/// Words popped from the tail of the candidate content after the date/time
/// spans have been consumed.
pub const TRAILING_STOP_WORDS: &[&str] = &[
    "as", "hs", "hrs", "horas", "hora", "em", "no", "na", "nos", "nas", "para", "de", "do", "da",
    "dos", "das", "pelas", "pelos", "a", "o", "amanha", "hoje", "la", "por", "volta", "depois",
    "antes", "proximo", "proxima",
];

/// Recurrence keyword table. Longest literal match wins when several phrases
/// are present in one utterance.
pub const RECURRENCE_KEYWORDS: &[(&str, Recurrence)] = &[
    ("diariamente", Recurrence::Daily),
    ("todo dia", Recurrence::Daily),
    ("todos os dias", Recurrence::Daily),
    ("semanalmente", Recurrence::Weekly),
    ("toda semana", Recurrence::Weekly),
    ("todas as semanas", Recurrence::Weekly),
    ("mensalmente", Recurrence::Monthly),
    ("todo mes", Recurrence::Monthly),
    ("todos os meses", Recurrence::Monthly),
    ("anualmente", Recurrence::Yearly),
    ("todo ano", Recurrence::Yearly),
    ("todos os anos", Recurrence::Yearly),
];

/// Weekday names translated to the forms the date parser recognizes.
pub const WEEKDAYS_PT: &[(&str, &str)] = &[
    ("segunda-feira", "monday"),
    ("terca-feira", "tuesday"),
    ("quarta-feira", "wednesday"),
    ("quinta-feira", "thursday"),
    ("sexta-feira", "friday"),
    ("segunda", "monday"),
    ("terca", "tuesday"),
    ("quarta", "wednesday"),
    ("quinta", "thursday"),
    ("sexta", "friday"),
    ("sabado", "saturday"),
    ("domingo", "sunday"),
];

/// Confirmation templates used when a reminder is persisted. `{datetime}` and
/// `{content}` are interpolated; one template is picked at random.
pub const CONFIRMATION_TEMPLATES: &[&str] = &[
    "Claro! Lembrete agendado para {datetime}:\n\n*{content}*",
    "Entendido! Seu lembrete para {datetime} está configurado:\n\n*{content}*",
    "Anotado! Te lembrarei em {datetime} sobre o seguinte:\n\n*{content}*",
    "Perfeito! Lembrete definido para {datetime}:\n\n*{content}*",
    "Confirmado! Agendei seu lembrete para {datetime}:\n\n*{content}*",
];

/// Fallback nudges when the generative service cannot produce a
/// re-engagement message.
pub const FALLBACK_REENGAGEMENT_MESSAGES: &[&str] = &[
    "Oi! Está tudo bem por aí? Posso ajudar com algo?",
    "Oi! Como posso ajudar você hoje?",
];

/// Phrases that cancel an open creation session outright.
pub const SESSION_CANCEL_WORDS: &[&str] = &["cancelar", "cancela"];

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hardcoded pattern"))
}

/// Reminder-request trigger phrases ("me lembre de", "criar um lembrete", ...).
/// Matched against normalized text.
pub fn request_keywords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"(?x)\b(?:
            lembrete|
            me\s+lembr(?:a|ar|e)|
            anota?\s+ai|
            anote\s+ai|
            agend(?:a|ar)\s+um\s+lembrete|
            cria(?:r)?\s+um\s+lembrete|
            preciso\s+de\s+um\s+lembrete|
            quero\s+um\s+lembrete|
            defina\s+um\s+lembrete|
            marcar\s+um\s+lembrete|
            me\s+lembre\s+de|
            lembr(?:a|e|ar)\s+de|
            lembre-me\s+de|
            me\s+avise\s+de|
            me\s+recorde\s+de
        )\b",
    )
}

/// Cancellation-request keywords ("cancelar lembrete", "remover todos os
/// meus lembretes", ...). Matched against normalized text.
pub fn cancel_keywords() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"(?x)
        (?:cancelar|cancela|excluir|exclui|remover|remove)\s+
        (?:o\s+|meu\s+|um\s+)?
        (?:lembrete|agendamento)
        (?:\s+de\s+.*|\s+com\s+id\s+\w+)?
        |
        (?:cancelar|cancela|excluir|exclui|remover|remove)\s+
        todos\s+(?:os\s+)?(?:meus\s+)?lembretes
        ",
    )
}

/// "todo dia 10", "mensalmente dia 5", "dia 12 de cada mes": day-of-month
/// recurrence. Capture group 1 or 2 carries the day number.
pub fn monthly_day() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"(?x)\b(?:
            (?:todo\s+dia|mensalmente\s+(?:no\s+)?dia|dia)
            \s+(\d{1,2})
            (?:\s+(?:de\s+cada\s+mes|por\s+mes))?
        |
            (?:todo\s+mes|mensalmente)\s+dia\s+(\d{1,2})
        )\b",
    )
}

/// "todos" qualifier inside a cancellation request.
pub fn all_qualifier() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(&RE, r"\btodos\b")
}

/// Patterns that recognize an assistant reply announcing a reminder
/// ("agendei um lembrete", "vou te lembrar", ...). Matched against
/// normalized text.
pub fn assistant_confirmation() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    re(
        &RE,
        r"(?x)(?:
            lembrete\s+(?:esta|foi|sera)\s+(?:agendado|criado|anotado|marcado|definido|configurado|certinho|pronto|ok)
            |
            (?:agendei|criei|anotei|marquei|defini|configurei)\s+(?:um\s+|o\s+)?lembrete
            |
            (?:vou\s+(?:te\s+)?lembrar|lembrarei|te\s+lembrarei|vou\s+(?:te\s+)?avisar|avisarei)
            |
            (?:esta|ta)\s+(?:confirmado|anotado|agendado)
            |
            (?:nao\s+(?:vou\s+)?esquecer|pode\s+deixar|deixa\s+comigo)
            |
            lembrete\s+(?:de\s+|para\s+|sobre\s+)?.+?(?:as|para)\s+\d{1,2}(?::\d{2})?
            |
            te\s+(?:lembro|aviso|alerto|notifico)\s+(?:de\s+|para\s+|sobre\s+)?
            |
            (?:anotado|agendado|marcado)\s+para
        )",
    )
}
