//! Outbound text utilities for the WhatsApp gateway
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.2.0
//!
//! ## Changelog
//! - 1.0.0: Extracted from the gateway send path

/// WhatsApp text message body limit
pub const MESSAGE_LIMIT: usize = 4096;

/// Chunk text into pieces that fit the message limit (UTF-8 safe, line-aware)
///
/// This function splits text respecting:
/// - UTF-8 character boundaries (never splits mid-character)
/// - Line boundaries when possible (prefers splitting at newlines)
/// - Falls back to byte-aware character splitting for very long lines
pub fn chunk_text(text: &str, max_size: usize) -> Vec<String> {
    if text.len() <= max_size {
        return vec![text.to_string()];
    }

    let mut chunks = Vec::new();
    let mut current = String::new();

    for line in text.lines() {
        let line_with_newline = format!("{line}\n");
        if current.len() + line_with_newline.len() > max_size {
            if !current.is_empty() {
                chunks.push(current.trim_end().to_string());
                current = String::new();
            }
            // Handle lines longer than max_size (byte-aware)
            if line_with_newline.len() > max_size {
                chunks.extend(chunk_long_line(line, max_size));
            } else {
                current = line_with_newline;
            }
        } else {
            current.push_str(&line_with_newline);
        }
    }
    if !current.is_empty() {
        chunks.push(current.trim_end().to_string());
    }
    chunks
}

/// Split a single long line into chunks respecting UTF-8 boundaries
fn chunk_long_line(line: &str, max_size: usize) -> Vec<String> {
    let mut result = Vec::new();
    let mut current = String::new();

    for ch in line.chars() {
        let ch_len = ch.len_utf8();
        if current.len() + ch_len > max_size && !current.is_empty() {
            result.push(current);
            current = String::new();
        }
        current.push(ch);
    }

    if !current.is_empty() {
        result.push(current);
    }

    result
}

/// Chunk text for message bodies (4096 byte limit)
pub fn chunk_for_message(text: &str) -> Vec<String> {
    chunk_text(text, MESSAGE_LIMIT)
}

/// Truncate text to fit the message limit, adding ellipsis if needed
pub fn truncate_for_message(text: &str) -> String {
    if text.len() <= MESSAGE_LIMIT {
        return text.to_string();
    }
    // Find a safe UTF-8 boundary with room for "..."
    let mut end = MESSAGE_LIMIT - 3;
    while !text.is_char_boundary(end) && end > 0 {
        end -= 1;
    }
    format!("{}...", &text[..end])
}

/// Short single-line preview used when listing reminders for cancellation.
pub fn summary_snippet(text: &str, max_chars: usize) -> String {
    let flat = text.split_whitespace().collect::<Vec<_>>().join(" ");
    if flat.chars().count() <= max_chars {
        return flat;
    }
    let cut: String = flat.chars().take(max_chars.saturating_sub(3)).collect();
    format!("{cut}...")
}
