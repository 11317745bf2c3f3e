//! Accent/case-insensitive text normalization used by every keyword matcher.
//!
//! - **Version**: 1.0.0
//! - **Since**: 0.1.0
//! - **Toggleable**: false

/// Fold a single character to its ASCII lowercase equivalent.
///
/// Covers the accented characters that occur in Brazilian-Portuguese input.
/// The mapping is 1:1 on purpose: callers that match against a folded copy of
/// a string can apply the resulting byte spans back to the raw text.
pub fn fold_char(c: char) -> char {
    // Lowercase before consulting the table. ASCII lowercasing alone would
    // leave 'Ó', 'Ã', ... unmatched below.
    let lower = if c.is_ascii() {
        c.to_ascii_lowercase()
    } else {
        c.to_lowercase().next().unwrap_or(c)
    };
    match lower {
        'á' | 'â' | 'ã' | 'à' | 'ä' => 'a',
        'é' | 'ê' | 'è' | 'ë' => 'e',
        'í' | 'î' | 'ì' | 'ï' => 'i',
        'ó' | 'ô' | 'õ' | 'ò' | 'ö' => 'o',
        'ú' | 'û' | 'ù' | 'ü' => 'u',
        'ç' => 'c',
        'ñ' => 'n',
        other => other,
    }
}

/// Fold diacritics and lowercase without touching whitespace.
///
/// Unlike [`normalize`], this keeps every whitespace run intact, so token
/// positions survive the fold.
pub fn fold(text: &str) -> String {
    text.chars().map(fold_char).collect()
}

/// Normalize text for keyword and stop-word comparison: diacritics folded,
/// lowercased, whitespace collapsed to single spaces, trimmed.
///
/// Total function: empty input yields the empty string. Never use the result
/// for user-facing display.
pub fn normalize(text: &str) -> String {
    let folded = fold(text);
    let mut out = String::with_capacity(folded.len());
    let mut last_was_space = true; // leading whitespace is dropped
    for c in folded.chars() {
        if c.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(c);
            last_was_space = false;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}
