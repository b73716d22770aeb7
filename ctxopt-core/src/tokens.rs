//! Token counting for result statistics and `ctx.utils.countTokens`.
//!
//! The BPE encoder is built once per process and shared read-only across
//! concurrent executions. If it cannot be built, counts fall back to a
//! characters/4 estimate instead of failing the execution.

use std::sync::LazyLock;

use tiktoken_rs::CoreBPE;
use tracing::warn;

static ENCODER: LazyLock<Option<CoreBPE>> = LazyLock::new(|| match tiktoken_rs::cl100k_base() {
    Ok(bpe) => Some(bpe),
    Err(error) => {
        warn!(%error, "failed to load cl100k_base tokenizer; using approximate token counts");
        None
    }
});

/// Count tokens in `text`, approximating when the tokenizer is unavailable.
pub fn count_tokens(text: &str) -> usize {
    if text.is_empty() {
        return 0;
    }
    match ENCODER.as_ref() {
        Some(bpe) => bpe.encode_with_special_tokens(text).len(),
        None => estimate_tokens(text),
    }
}

/// Estimate token count from string: 1 token ≈ 4 bytes.
pub fn estimate_tokens(text: &str) -> usize {
    text.len().div_ceil(4)
}

/// Whether the real tokenizer loaded.
pub fn tokenizer_available() -> bool {
    ENCODER.is_some()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_estimate_tokens() {
        assert_eq!(estimate_tokens(""), 0);
        assert_eq!(estimate_tokens("test"), 1);
        assert_eq!(estimate_tokens("hello world"), 3);
        assert_eq!(estimate_tokens("a".repeat(100).as_str()), 25);
    }

    #[test]
    fn counts_are_positive_for_text() {
        assert_eq!(count_tokens(""), 0);
        let count = count_tokens("fn main() { println!(\"hello\"); }");
        assert!(count > 0);
        if !tokenizer_available() {
            assert_eq!(count, estimate_tokens("fn main() { println!(\"hello\"); }"));
        }
    }
}
