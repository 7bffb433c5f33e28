use crate::compaction::{estimate_tokens, Compactor};

fn first_words(text: &str, max_tokens: usize) -> String {
    text.split_whitespace()
        .take(max_tokens)
        .collect::<Vec<_>>()
        .join(" ")
}

/// Keeps the first `max_tokens` words.
#[derive(Debug, Default, Clone, Copy)]
pub struct TruncateCompactor;

impl Compactor for TruncateCompactor {
    fn compact(&self, text: &str, max_tokens: usize) -> String {
        if estimate_tokens(text) <= max_tokens {
            return text.to_string();
        }
        first_words(text, max_tokens)
    }
}

/// Keeps the first naive sentence, then truncates by words if still too long.
#[derive(Debug, Default, Clone, Copy)]
pub struct SummaryCompactor;

impl Compactor for SummaryCompactor {
    fn compact(&self, text: &str, max_tokens: usize) -> String {
        if estimate_tokens(text) <= max_tokens {
            return text.to_string();
        }

        let summary = match text.split_once(". ") {
            Some((first, _)) => format!("{first}."),
            None => text.to_string(),
        };

        if estimate_tokens(&summary) <= max_tokens {
            summary
        } else {
            first_words(&summary, max_tokens)
        }
    }
}
