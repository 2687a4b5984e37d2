//! Token budget estimation for tool responses.
//!
//! Tokens are approximated as one per four characters. This is not a real
//! tokenizer; the ceiling sits below the consumer's hard limit so that this
//! crate always truncates first.

/// Approximate characters per token.
pub const CHARS_PER_TOKEN: usize = 4;

/// Ceiling enforced on every serialized response.
pub const MAX_RESPONSE_TOKENS: usize = 22_000;

/// Hard limit of the downstream consumer. Responses above this are rejected.
pub const CONSUMER_HARD_LIMIT_TOKENS: usize = 25_000;

/// Outcome of [`check_budget`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BudgetCheck {
    pub over_limit: bool,
    pub estimated_tokens: usize,
    pub total_pages: Option<usize>,
    pub message: Option<String>,
}

/// Estimated token count for `text`: `ceil(chars / 4)`.
pub fn estimate_tokens(text: &str) -> usize {
    text.chars().count().div_ceil(CHARS_PER_TOKEN)
}

pub fn check_budget(text: &str) -> BudgetCheck {
    let estimated_tokens = estimate_tokens(text);
    if estimated_tokens <= MAX_RESPONSE_TOKENS {
        return BudgetCheck {
            over_limit: false,
            estimated_tokens,
            total_pages: None,
            message: None,
        };
    }

    let total_pages = estimated_tokens.div_ceil(MAX_RESPONSE_TOKENS);
    BudgetCheck {
        over_limit: true,
        estimated_tokens,
        total_pages: Some(total_pages),
        message: Some(format!(
            "Response is approximately {} tokens, which exceeds the limit of {} tokens. \
             It would need {} pages to be returned in full.",
            estimated_tokens, MAX_RESPONSE_TOKENS, total_pages
        )),
    }
}

/// Characters of accessibility snapshot kept when a snapshot is over budget.
/// 20% of the budget is left for the warning block appended after it.
pub const fn snapshot_char_limit() -> usize {
    MAX_RESPONSE_TOKENS * CHARS_PER_TOKEN * 8 / 10
}

/// Characters kept by the last-resort truncation of a fully assembled response.
pub const fn emergency_char_limit() -> usize {
    MAX_RESPONSE_TOKENS * CHARS_PER_TOKEN * 9 / 10
}

/// Returns the longest prefix of `text` that holds at most `max_chars` chars.
pub(crate) fn char_prefix(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((byte_idx, _)) => &text[..byte_idx],
        None => text,
    }
}
