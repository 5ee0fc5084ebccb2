//! Token estimation by character-length proxy.
//!
//! A fixed characters-per-token ratio keeps budget accounting deterministic
//! and portable across model tokenizers. The ratio is an approximation for
//! prose; budget callers treat it as a ceiling-ish estimate, never an exact
//! count.

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Estimate the token cost of a text (ceiling division, chars not bytes).
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

/// Clip a text to a token budget.
///
/// Returns the (possibly shortened) text and whether clipping occurred.
/// Cuts on a char boundary; never exceeds `max_tokens` by more than the
/// estimator's rounding.
pub fn clip_to_budget(text: &str, max_tokens: usize) -> (String, bool) {
    let max_chars = max_tokens.saturating_mul(CHARS_PER_TOKEN);
    let char_count = text.chars().count();
    if char_count <= max_chars {
        return (text.to_string(), false);
    }
    let clipped: String = text.chars().take(max_chars).collect();
    (clipped, true)
}
