//! Fuzzy day-first date/time parsing.
//!
//! Works over text the pipeline has already normalized and rewritten
//! (relative words replaced with `YYYY-MM-DD`, weekday names translated,
//! time shorthand expanded). Consumes the tokens it recognizes and hands the
//! rest back so the caller can rebuild the reminder content from them.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.3.0
//! - **Toggleable**: false

use chrono::{Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Weekday};

/// Outcome of a fuzzy parse: the assembled local instant plus what was left
/// over, with flags describing which components were actually written.
#[derive(Debug, Clone, PartialEq)]
pub struct FuzzyDateTime {
    pub datetime: NaiveDateTime,
    /// Tokens that carried no date/time information, in input order.
    pub unconsumed: Vec<String>,
    /// A calendar-date signal was present (numeric date, ISO date, weekday).
    pub date_explicit: bool,
    /// A clock time was present.
    pub time_present: bool,
}

fn parse_iso_date(token: &str) -> Option<NaiveDate> {
    let parts: Vec<&str> = token.split('-').collect();
    if parts.len() != 3 || parts[0].len() != 4 {
        return None;
    }
    let year: i32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let day: u32 = parts[2].parse().ok()?;
    NaiveDate::from_ymd_opt(year, month, day)
}

/// Day-first numeric date: `25/12`, `25-12-2024`, `25/12/24`.
fn parse_numeric_date(token: &str, reference: NaiveDate) -> Option<NaiveDate> {
    let parts: Vec<&str> = if token.contains('/') {
        token.split('/').collect()
    } else if token.contains('-') {
        token.split('-').collect()
    } else {
        return None;
    };
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let year: i32 = match parts.get(2) {
        Some(y) => {
            let raw: i32 = y.parse().ok()?;
            if y.len() <= 2 {
                // Two-digit years land in the 2000s below the usual cutoff.
                if raw < 70 {
                    2000 + raw
                } else {
                    1900 + raw
                }
            } else {
                raw
            }
        }
        None => reference.year(),
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

fn parse_time(token: &str) -> Option<NaiveTime> {
    let parts: Vec<&str> = token.split(':').collect();
    if parts.len() < 2 || parts.len() > 3 {
        return None;
    }
    let hour: u32 = parts[0].parse().ok()?;
    let minute: u32 = parts[1].parse().ok()?;
    let second: u32 = match parts.get(2) {
        Some(s) => s.parse().ok()?,
        None => 0,
    };
    NaiveTime::from_hms_opt(hour, minute, second)
}

fn parse_weekday(token: &str) -> Option<Weekday> {
    match token {
        "monday" => Some(Weekday::Mon),
        "tuesday" => Some(Weekday::Tue),
        "wednesday" => Some(Weekday::Wed),
        "thursday" => Some(Weekday::Thu),
        "friday" => Some(Weekday::Fri),
        "saturday" => Some(Weekday::Sat),
        "sunday" => Some(Weekday::Sun),
        _ => None,
    }
}

/// Date of the next `weekday` counting from `reference` inclusive; with
/// `strictly_next` the same weekday lands a full week ahead instead of today.
fn upcoming_weekday(reference: NaiveDate, weekday: Weekday, strictly_next: bool) -> NaiveDate {
    let ahead = (weekday.num_days_from_monday() as i64
        - reference.weekday().num_days_from_monday() as i64)
        .rem_euclid(7);
    let ahead = if ahead == 0 && strictly_next { 7 } else { ahead };
    reference + Duration::days(ahead)
}

/// Fuzzy parse of `text` relative to `reference` (local wall clock).
///
/// Missing components default to the reference date at midnight, matching a
/// day-first parse with a zeroed default. Returns `None` when no date or time
/// token is present at all, or when an explicit date token is invalid.
pub fn parse_fuzzy(text: &str, reference: NaiveDateTime) -> Option<FuzzyDateTime> {
    let mut date: Option<NaiveDate> = None;
    let mut time: Option<NaiveTime> = None;
    let mut date_explicit = false;
    let mut unconsumed: Vec<String> = Vec::new();

    let tokens: Vec<&str> = text.split_whitespace().collect();
    let mut i = 0;
    while i < tokens.len() {
        let token = tokens[i]
            .trim_matches(|c: char| matches!(c, ',' | '.' | '!' | '?' | ';'))
            .trim_end_matches(':');
        if token.is_empty() {
            i += 1;
            continue;
        }

        // "next monday" consumes both tokens.
        if token == "next" {
            if let Some(weekday) = tokens.get(i + 1).and_then(|t| parse_weekday(t)) {
                date = Some(upcoming_weekday(reference.date(), weekday, true));
                date_explicit = true;
                i += 2;
                continue;
            }
        }
        if let Some(weekday) = parse_weekday(token) {
            date = Some(upcoming_weekday(reference.date(), weekday, false));
            date_explicit = true;
            i += 1;
            continue;
        }
        if let Some(d) = parse_iso_date(token) {
            date = Some(d);
            date_explicit = true;
            i += 1;
            continue;
        }
        if let Some(t) = parse_time(token) {
            time = Some(t);
            i += 1;
            continue;
        }
        if token.contains('/') || (token.contains('-') && token.chars().next()?.is_ascii_digit()) {
            match parse_numeric_date(token, reference.date()) {
                Some(d) => {
                    date = Some(d);
                    date_explicit = true;
                    i += 1;
                    continue;
                }
                // A thing that looks like a date but isn't one is a parse
                // failure, not content.
                None => return None,
            }
        }

        unconsumed.push(tokens[i].to_string());
        i += 1;
    }

    if date.is_none() && time.is_none() {
        return None;
    }

    let time_present = time.is_some();
    let date = date.unwrap_or_else(|| reference.date());
    let time = time.unwrap_or_else(|| NaiveTime::from_hms_opt(0, 0, 0).expect("midnight"));
    Some(FuzzyDateTime {
        datetime: NaiveDateTime::new(date, time),
        unconsumed,
        date_explicit,
        time_present,
    })
}
