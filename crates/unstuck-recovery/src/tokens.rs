//! Token budget helpers
//!
//! Lengths are estimated at four characters per token. All truncation
//! happens on `char` boundaries so results are always valid UTF-8.

/// Approximate characters per token
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimated token count of `text`, rounded up
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Characters that fit in `tokens`
pub fn budget_chars(tokens: usize) -> usize {
    tokens.saturating_mul(CHARS_PER_TOKEN)
}

/// Keep at most `max_tokens` worth of the start of `text`
pub fn truncate_head(text: &str, max_tokens: usize) -> String {
    truncate_head_chars(text, budget_chars(max_tokens))
}

/// Keep at most `max_tokens` worth of the end of `text`
pub fn truncate_tail(text: &str, max_tokens: usize) -> String {
    let max_chars = budget_chars(max_tokens);
    let total = text.chars().count();
    if total <= max_chars {
        return text.to_string();
    }
    text.chars().skip(total - max_chars).collect()
}

/// Keep at most `max_chars` characters of the start of `text`
pub fn truncate_head_chars(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((byte_index, _)) => text[..byte_index].to_string(),
        None => text.to_string(),
    }
}

/// The most recent half of `text`, by characters
pub fn recent_half(text: &str) -> String {
    let total = text.chars().count();
    text.chars().skip(total / 2).collect()
}
