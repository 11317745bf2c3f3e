//! Environment-driven configuration.
//!
//! Every knob comes from the process environment (`.env` is loaded by the
//! binary before this runs). Required variables fail fast at startup with a
//! message naming the variable; everything else has a default.
//!
//! - **Version**: 1.2.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false
//!
//! ## Changelog
//! - 1.2.0: Re-engagement and summarization knobs
//! - 1.1.0: Debounce and polling intervals
//! - 1.0.0: Initial creation

use anyhow::{Context, Result};
use chrono_tz::Tz;

#[derive(Debug, Clone)]
pub struct Config {
    /// Whapi.cloud API bearer token.
    pub whapi_token: String,
    /// Whapi.cloud API base URL.
    pub whapi_api_url: String,
    /// Gemini API key.
    pub gemini_api_key: String,
    /// Gemini model id used for replies and refinement.
    pub gemini_model: String,
    /// Optional persona/system context prepended to every prompt.
    /// Literal `\n` sequences in the variable become real newlines.
    pub gemini_context: String,
    pub database_path: String,
    pub log_level: String,
    /// IANA zone every user-facing date/time resolves in.
    pub timezone: Tz,
    /// Bind address for the inbound webhook listener.
    pub webhook_bind: String,
    /// Seconds a buffer must stay quiet before it is drained.
    pub debounce_secs: i64,
    /// Seconds between pending-buffer scans.
    pub pending_scan_secs: u64,
    /// Seconds between due-reminder polls.
    pub reminder_check_secs: u64,
    /// Seconds of inactivity after which an open session expires.
    pub session_timeout_secs: i64,
    /// Seconds between stale-session sweeps.
    pub session_sweep_secs: u64,
    /// Conversation turns included verbatim in the reply prompt.
    pub history_limit: usize,
    /// Unsummarized turns that trigger a summarization pass.
    pub summarize_threshold: usize,
    /// Hours of silence before a chat is considered inactive.
    pub reengagement_inactive_hours: i64,
    /// Hours of silence after which a chat is too stale to nudge.
    pub reengagement_stale_hours: i64,
    /// Minimum hours between two nudges to the same chat.
    pub reengagement_min_gap_hours: i64,
    /// Seconds between re-engagement checks.
    pub reengagement_check_secs: u64,
}

fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: std::str::FromStr>(name: &str, default: T) -> T {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let whapi_token =
            std::env::var("WHAPI_TOKEN").context("WHAPI_TOKEN must be set")?;
        let gemini_api_key =
            std::env::var("GEMINI_API_KEY").context("GEMINI_API_KEY must be set")?;

        let timezone_name = var_or("TARGET_TIMEZONE", "America/Sao_Paulo");
        let timezone: Tz = timezone_name
            .parse()
            .map_err(|e| anyhow::anyhow!("invalid TARGET_TIMEZONE '{timezone_name}': {e}"))?;

        Ok(Config {
            whapi_token,
            whapi_api_url: var_or("WHAPI_API_URL", "https://gate.whapi.cloud"),
            gemini_api_key,
            gemini_model: var_or("GEMINI_MODEL", "gemini-1.5-flash"),
            gemini_context: var_or("GEMINI_CONTEXT", "").replace("\\n", "\n"),
            database_path: var_or("DATABASE_PATH", "recado.db"),
            log_level: var_or("LOG_LEVEL", "info"),
            timezone,
            webhook_bind: var_or("WEBHOOK_BIND", "0.0.0.0:8080"),
            debounce_secs: parsed_or("MESSAGE_DEBOUNCE_SECS", 15),
            pending_scan_secs: parsed_or("PENDING_SCAN_SECS", 3),
            reminder_check_secs: parsed_or("REMINDER_CHECK_SECS", 60),
            session_timeout_secs: parsed_or("SESSION_TIMEOUT_SECS", 300),
            session_sweep_secs: parsed_or("SESSION_SWEEP_SECS", 60),
            history_limit: parsed_or("HISTORY_LIMIT", 20),
            summarize_threshold: parsed_or("SUMMARIZE_THRESHOLD", 100),
            reengagement_inactive_hours: parsed_or("REENGAGEMENT_INACTIVE_HOURS", 48),
            reengagement_stale_hours: parsed_or("REENGAGEMENT_STALE_HOURS", 72),
            reengagement_min_gap_hours: parsed_or("REENGAGEMENT_MIN_GAP_HOURS", 23),
            reengagement_check_secs: parsed_or("REENGAGEMENT_CHECK_SECS", 3600),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_or_falls_back_on_garbage() {
        std::env::set_var("TEST_PARSED_OR_KNOB", "not-a-number");
        assert_eq!(parsed_or("TEST_PARSED_OR_KNOB", 15i64), 15);
        std::env::remove_var("TEST_PARSED_OR_KNOB");
    }

    #[test]
    fn test_var_or_default() {
        assert_eq!(var_or("TEST_VAR_OR_UNSET", "fallback"), "fallback");
    }
}
