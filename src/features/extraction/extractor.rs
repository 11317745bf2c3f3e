//! Reminder detail extraction pipeline.
//!
//! Runs over a normalized working copy of the utterance, consuming matched
//! spans step by step: trigger phrases, leading stop-words, recurrence,
//! relative-date and time-shorthand rewrites, then a fuzzy day-first parse.
//! Whatever the parser does not consume becomes the candidate content.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false

use std::sync::OnceLock;

use chrono::{
    DateTime, Datelike, Duration, LocalResult, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Utc,
};
use chrono_tz::Tz;
use log::debug;
use regex::Regex;

use super::dateparse::parse_fuzzy;
use super::normalizer::normalize;
use super::phrases::{
    monthly_day, request_keywords, LEADING_STOP_WORDS, RECURRENCE_KEYWORDS, TRAILING_STOP_WORDS,
    WEEKDAYS_PT,
};
use crate::features::reminders::Recurrence;

/// Result of running the extraction pipeline over one utterance.
#[derive(Debug, Clone, PartialEq)]
pub struct ExtractedReminder {
    pub content: Option<String>,
    pub datetime_utc: Option<DateTime<Utc>>,
    pub recurrence: Recurrence,
    pub day_of_month: Option<u32>,
    /// The only temporal signal was a bare clock time; the date was implied.
    pub time_explicitly_provided: bool,
}

impl ExtractedReminder {
    fn empty() -> Self {
        ExtractedReminder {
            content: None,
            datetime_utc: None,
            recurrence: Recurrence::None,
            day_of_month: None,
            time_explicitly_provided: false,
        }
    }
}

fn re(cell: &'static OnceLock<Regex>, pattern: &str) -> &'static Regex {
    cell.get_or_init(|| Regex::new(pattern).expect("hardcoded pattern"))
}

/// Resolve a local wall-clock instant in `tz`. DST-ambiguous times take the
/// earlier offset; times inside a spring-forward gap are pushed one hour.
fn localize(naive: NaiveDateTime, tz: Tz) -> Option<DateTime<Tz>> {
    match tz.from_local_datetime(&naive) {
        LocalResult::Single(dt) => Some(dt),
        LocalResult::Ambiguous(earlier, _) => Some(earlier),
        LocalResult::None => tz.from_local_datetime(&(naive + Duration::hours(1))).earliest(),
    }
}

/// Find `phrase` in `haystack` on word boundaries. Returns the byte span of
/// the match. Both sides are assumed already normalized.
fn find_phrase(haystack: &str, phrase: &str) -> Option<(usize, usize)> {
    let mut from = 0;
    while let Some(rel) = haystack[from..].find(phrase) {
        let start = from + rel;
        let end = start + phrase.len();
        let before_ok = start == 0
            || !haystack[..start]
                .chars()
                .next_back()
                .is_some_and(|c| c.is_alphanumeric());
        let after_ok = end == haystack.len()
            || !haystack[end..].chars().next().is_some_and(|c| c.is_alphanumeric());
        if before_ok && after_ok {
            return Some((start, end));
        }
        from = end;
    }
    None
}

fn remove_span(text: &str, span: (usize, usize)) -> String {
    let mut out = String::with_capacity(text.len());
    out.push_str(&text[..span.0]);
    out.push(' ');
    out.push_str(&text[span.1..]);
    normalize(&out)
}

/// Repeatedly pop leading stop-words (prepositions/pronouns) off the start.
fn strip_leading_stop_words(text: &str) -> String {
    let mut rest = text.trim_start();
    loop {
        let Some(first) = rest.split_whitespace().next() else {
            break;
        };
        if LEADING_STOP_WORDS.contains(&first) {
            rest = rest[first.len()..].trim_start();
        } else {
            break;
        }
    }
    rest.to_string()
}

/// Rewrite relative dates, weekday names and time shorthand into forms the
/// fuzzy parser recognizes. Input must already be normalized.
fn rewrite_for_parsing(text: &str, now_local: DateTime<Tz>) -> String {
    let mut out = text.to_string();

    // "depois de amanha" before "amanha", or the inner word gets rewritten
    // out from under the longer phrase.
    static AFTER_TOMORROW: OnceLock<Regex> = OnceLock::new();
    static TOMORROW: OnceLock<Regex> = OnceLock::new();
    static TODAY: OnceLock<Regex> = OnceLock::new();
    let today = now_local.date_naive();
    out = re(&AFTER_TOMORROW, r"\bdepois de amanha\b")
        .replace_all(&out, (today + Duration::days(2)).format("%Y-%m-%d").to_string())
        .into_owned();
    out = re(&TOMORROW, r"\bamanha\b")
        .replace_all(&out, (today + Duration::days(1)).format("%Y-%m-%d").to_string())
        .into_owned();
    out = re(&TODAY, r"\bhoje\b")
        .replace_all(&out, today.format("%Y-%m-%d").to_string())
        .into_owned();

    for (pt, en) in WEEKDAYS_PT {
        if let Some(span) = find_phrase(&out, pt) {
            out = format!("{}{}{}", &out[..span.0], en, &out[span.1..]);
        }
    }

    static NEXT: OnceLock<Regex> = OnceLock::new();
    out = re(&NEXT, r"\bproxim[ao]\s+").replace_all(&out, "next ").into_owned();

    // "9 e 30" -> "9:30"
    static H_E_M: OnceLock<Regex> = OnceLock::new();
    out = re(&H_E_M, r"\b(\d{1,2})\s*e\s*(\d{1,2})\b")
        .replace_all(&out, "$1:$2")
        .into_owned();

    // "18h30" -> "18:30", "18h" -> "18:00"
    static H_MM: OnceLock<Regex> = OnceLock::new();
    static H_BARE: OnceLock<Regex> = OnceLock::new();
    out = re(&H_MM, r"\b(\d{1,2})h(\d{2})\b").replace_all(&out, "$1:$2").into_owned();
    out = re(&H_BARE, r"\b(\d{1,2})h\b").replace_all(&out, "$1:00").into_owned();

    // "as 18:30" -> "18:30" first, so the bare-hour rule below only sees
    // hours that still need ":00" appended.
    static AS_TIME: OnceLock<Regex> = OnceLock::new();
    static AS_HOUR: OnceLock<Regex> = OnceLock::new();
    out = re(&AS_TIME, r"\bas\s+(\d{1,2}:)").replace_all(&out, "$1").into_owned();
    out = re(&AS_HOUR, r"\bas\s+(\d{1,2})\b").replace_all(&out, "$1:00").into_owned();

    normalize(&out)
}

/// Day-of-month anchor for monthly reminders: the given day in the current
/// month if that instant is still ahead, otherwise the first following month
/// that has the day.
fn anchor_monthly(day: u32, time: NaiveTime, now_local: DateTime<Tz>) -> Option<NaiveDateTime> {
    let now_naive = now_local.naive_local();
    let mut year = now_local.year();
    let mut month = now_local.month();
    // Day 31 can skip several months in a row; 48 iterations is far more
    // than any valid day needs.
    for _ in 0..48 {
        if let Some(date) = NaiveDate::from_ymd_opt(year, month, day) {
            let candidate = NaiveDateTime::new(date, time);
            if candidate > now_naive {
                return Some(candidate);
            }
        }
        month += 1;
        if month > 12 {
            month = 1;
            year += 1;
        }
    }
    None
}

/// Pop trailing stop-words and surviving trigger phrases off the candidate
/// content. Returns `None` when nothing meaningful survives.
fn clean_content(raw: &str) -> Option<String> {
    let mut words: Vec<&str> = raw.split_whitespace().collect();
    while let Some(last) = words.last() {
        if TRAILING_STOP_WORDS.contains(last) {
            words.pop();
        } else {
            break;
        }
    }
    let joined = words.join(" ");
    let cleaned = normalize(&request_keywords().replace_all(&joined, ""));
    if cleaned.is_empty()
        || TRAILING_STOP_WORDS.contains(&cleaned.as_str())
        || LEADING_STOP_WORDS.contains(&cleaned.as_str())
    {
        None
    } else {
        Some(cleaned)
    }
}

/// Extract reminder content, schedule and recurrence from one utterance.
///
/// `now_local` is the current instant in the bot's target time zone; all
/// relative dates resolve against it and the returned instant is UTC.
pub fn extract_reminder_details(text: &str, now_local: DateTime<Tz>) -> ExtractedReminder {
    let mut details = ExtractedReminder::empty();

    let normalized = normalize(text);
    let without_triggers = normalize(&request_keywords().replace_all(&normalized, ""));
    let payload = strip_leading_stop_words(&without_triggers);
    debug!("extraction payload after trigger/stop-word strip: '{payload}'");
    if payload.is_empty() {
        return details;
    }

    let mut working = payload;

    // Day-of-month recurrence takes precedence over the keyword table so
    // "todo dia 5" does not degrade into plain daily.
    if let Some(caps) = monthly_day().captures(&working) {
        let day: Option<u32> = caps
            .get(1)
            .or_else(|| caps.get(2))
            .and_then(|m| m.as_str().parse().ok());
        if let (Some(day), Some(full)) = (day.filter(|d| (1..=31).contains(d)), caps.get(0)) {
            details.recurrence = Recurrence::Monthly;
            details.day_of_month = Some(day);
            working = remove_span(&working, (full.start(), full.end()));
        }
    }
    if details.day_of_month.is_none() {
        let mut best: Option<(usize, usize, Recurrence)> = None;
        for (phrase, rec) in RECURRENCE_KEYWORDS {
            if let Some((start, end)) = find_phrase(&working, phrase) {
                if best.map_or(true, |(bs, be, _)| end - start > be - bs) {
                    best = Some((start, end, *rec));
                }
            }
        }
        if let Some((start, end, rec)) = best {
            details.recurrence = rec;
            working = remove_span(&working, (start, end));
        }
    }

    let rewritten = rewrite_for_parsing(&working, now_local);
    debug!("extraction text after rewrite: '{rewritten}'");

    let tz = now_local.timezone();
    let content_source: String;
    match parse_fuzzy(&rewritten, now_local.naive_local()) {
        Some(parsed) => {
            let mut local = parsed.datetime;
            if parsed.time_present && !parsed.date_explicit {
                details.time_explicitly_provided = true;
                if local <= now_local.naive_local() && local.date() == now_local.date_naive() {
                    local += Duration::days(1);
                }
            }
            if let Some(day) = details.day_of_month {
                if let Some(anchored) = anchor_monthly(day, local.time(), now_local) {
                    local = anchored;
                }
            }
            details.datetime_utc =
                localize(local, tz).map(|dt| dt.with_timezone(&Utc));
            content_source = parsed.unconsumed.join(" ");
        }
        None => {
            // A monthly day is a date signal on its own even when the rest
            // of the text carries no time; the schedule lands at midnight.
            if let Some(day) = details.day_of_month {
                let midnight = NaiveTime::from_hms_opt(0, 0, 0).expect("midnight");
                details.datetime_utc = anchor_monthly(day, midnight, now_local)
                    .and_then(|naive| localize(naive, tz))
                    .map(|dt| dt.with_timezone(&Utc));
            }
            content_source = working;
        }
    }

    details.content = clean_content(&content_source);
    details
}

/// Extract reminder details from an assistant reply that announced a
/// reminder ("Agendei um lembrete para ...").
///
/// Returns `None` when the reply does not read as a reminder confirmation.
/// Content is only trusted when the reply marks it out with quotes or
/// asterisks; free-running confirmation prose is too noisy to mine, so the
/// caller fills the gap from the user's own utterance instead.
pub fn extract_assistant_confirmation(
    text: &str,
    now_local: DateTime<Tz>,
) -> Option<ExtractedReminder> {
    use super::phrases::assistant_confirmation;

    let normalized = normalize(text);
    if !assistant_confirmation().is_match(&normalized) {
        return None;
    }

    let mut details = extract_reminder_details(text, now_local);

    static MARKED_CONTENT: OnceLock<Regex> = OnceLock::new();
    details.content = re(&MARKED_CONTENT, r#"[*"']([^*"']{3,})[*"']"#)
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| normalize(m.as_str()))
        .filter(|c| !c.is_empty());
    Some(details)
}

/// Parse a date/time-only follow-up turn from an open creation session.
///
/// Same rewrite and fuzzy-parse steps as the full pipeline, without content
/// handling. `day_of_month` re-anchors the result for monthly reminders.
pub fn parse_datetime_reply(
    text: &str,
    day_of_month: Option<u32>,
    now_local: DateTime<Tz>,
) -> Option<DateTime<Utc>> {
    let rewritten = rewrite_for_parsing(&normalize(text), now_local);
    let parsed = parse_fuzzy(&rewritten, now_local.naive_local())?;

    let mut local = parsed.datetime;
    if parsed.time_present
        && !parsed.date_explicit
        && local <= now_local.naive_local()
        && local.date() == now_local.date_naive()
    {
        local += Duration::days(1);
    }
    if let Some(day) = day_of_month {
        local = anchor_monthly(day, local.time(), now_local)?;
    }
    localize(local, now_local.timezone()).map(|dt| dt.with_timezone(&Utc))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Timelike;

    const TZ: Tz = chrono_tz::America::Sao_Paulo;

    fn now() -> DateTime<Tz> {
        // 2024-03-10 09:00 local, a Sunday.
        TZ.with_ymd_and_hms(2024, 3, 10, 9, 0, 0).unwrap()
    }

    fn local(dt: DateTime<Utc>) -> NaiveDateTime {
        dt.with_timezone(&TZ).naive_local()
    }

    #[test]
    fn test_full_round_trip_tomorrow_with_time() {
        let details = extract_reminder_details("lembra de pagar a conta amanhã às 18:30", now());
        assert_eq!(details.content.as_deref(), Some("pagar a conta"));
        assert_eq!(details.recurrence, Recurrence::None);
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(
            dt,
            NaiveDate::from_ymd_opt(2024, 3, 11)
                .unwrap()
                .and_hms_opt(18, 30, 0)
                .unwrap()
        );
    }

    #[test]
    fn test_monthly_day_anchor_rolls_to_next_month() {
        let late = TZ.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap();
        let details = extract_reminder_details("todo dia 5 lembrar de pagar o aluguel", late);
        assert_eq!(details.recurrence, Recurrence::Monthly);
        assert_eq!(details.day_of_month, Some(5));
        assert_eq!(details.content.as_deref(), Some("pagar o aluguel"));
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 4, 5).unwrap());
    }

    #[test]
    fn test_past_bare_time_rolls_to_tomorrow() {
        let details = extract_reminder_details("me lembra de tomar remedio às 8", now());
        assert!(details.time_explicitly_provided);
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
        assert_eq!((dt.hour(), dt.minute()), (8, 0));
    }

    #[test]
    fn test_future_bare_time_stays_today() {
        let details = extract_reminder_details("me lembra de ligar pro medico às 15h", now());
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(dt.date(), now().date_naive());
        assert_eq!(dt.hour(), 15);
        assert_eq!(details.content.as_deref(), Some("ligar pro medico"));
    }

    #[test]
    fn test_time_shorthand_h_e_m() {
        let details = extract_reminder_details("me lembre de sair amanhã as 9 e 30", now());
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!((dt.hour(), dt.minute()), (9, 30));
        assert_eq!(details.content.as_deref(), Some("sair"));
    }

    #[test]
    fn test_recurrence_longest_phrase_wins() {
        let details =
            extract_reminder_details("me lembra de beber agua todos os dias às 10:00", now());
        assert_eq!(details.recurrence, Recurrence::Daily);
        assert_eq!(details.content.as_deref(), Some("beber agua"));
    }

    #[test]
    fn test_weekday_and_next_qualifier() {
        let details = extract_reminder_details("me lembre da reuniao próxima sexta às 14:00", now());
        let dt = local(details.datetime_utc.unwrap());
        // now() is Sunday 2024-03-10; next friday is the 15th.
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 15).unwrap());
        assert_eq!(details.content.as_deref(), Some("reuniao"));
    }

    #[test]
    fn test_no_temporal_signal_keeps_text_as_content() {
        let details = extract_reminder_details("me lembra de comprar leite", now());
        assert!(details.datetime_utc.is_none());
        assert_eq!(details.content.as_deref(), Some("comprar leite"));
    }

    #[test]
    fn test_no_content_survives_cleanup() {
        let details = extract_reminder_details("me lembra amanhã às 10:00", now());
        assert!(details.datetime_utc.is_some());
        assert!(details.content.is_none());
    }

    #[test]
    fn test_day_after_tomorrow_rewritten_before_tomorrow() {
        let details = extract_reminder_details("me lembre de viajar depois de amanhã às 7:00", now());
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 12).unwrap());
    }

    #[test]
    fn test_parse_datetime_reply_roll_forward() {
        let dt = parse_datetime_reply("às 8", None, now()).unwrap();
        assert_eq!(local(dt).date(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());
    }

    #[test]
    fn test_parse_datetime_reply_failure() {
        assert!(parse_datetime_reply("não sei ainda", None, now()).is_none());
    }

    #[test]
    fn test_assistant_confirmation_extraction() {
        let details = extract_assistant_confirmation(
            "Pronto! Agendei um lembrete para amanhã às 10:00: *pagar o boleto*",
            now(),
        )
        .unwrap();
        assert_eq!(details.content.as_deref(), Some("pagar o boleto"));
        let dt = local(details.datetime_utc.unwrap());
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 3, 11).unwrap());

        assert!(extract_assistant_confirmation("O clima hoje está ótimo.", now()).is_none());
    }

    #[test]
    fn test_parse_datetime_reply_monthly_reanchor() {
        let late = TZ.with_ymd_and_hms(2024, 3, 20, 9, 0, 0).unwrap();
        let dt = parse_datetime_reply("às 10:00", Some(5), late).unwrap();
        let dt = dt.with_timezone(&TZ).naive_local();
        assert_eq!(dt.date(), NaiveDate::from_ymd_opt(2024, 4, 5).unwrap());
        assert_eq!(dt.hour(), 10);
    }
}
