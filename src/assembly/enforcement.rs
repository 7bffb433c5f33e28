use tracing::debug;

use crate::compaction::{estimate_tokens, Compactor};
use crate::types::assembly_result::Message;
use crate::types::declarations::Policy;

/// Rendered prompt material before the input budget is applied.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Draft {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
}

impl Draft {
    pub fn token_count(&self) -> usize {
        estimate_tokens(&self.system_prompt)
            + self
                .history
                .iter()
                .map(|m| estimate_tokens(&m.content))
                .sum::<usize>()
            + estimate_tokens(&self.user_message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Enforced {
    pub draft: Draft,
    pub token_count: usize,
    /// True when anything was dropped or compacted.
    pub compacted: bool,
    pub history_dropped: usize,
}

/// Bring a draft within `input_budget.max_tokens`.
///
/// Without a max, or within it, the draft is untouched. Over budget with a
/// tolerating overflow mode, it is returned as-is. Under `compact`, the oldest
/// history entries go first, then the system prompt is compacted by exactly
/// the remaining deficit.
pub fn enforce_budget(draft: Draft, policy: Option<&Policy>, compactor: &dyn Compactor) -> Enforced {
    let token_count = draft.token_count();
    let untouched = |draft: Draft| Enforced {
        draft,
        token_count,
        compacted: false,
        history_dropped: 0,
    };

    let Some(max_tokens) = policy.and_then(Policy::input_max_tokens) else {
        return untouched(draft);
    };
    if token_count <= max_tokens {
        return untouched(draft);
    }
    if !policy.is_some_and(Policy::compacts_on_overflow) {
        debug!(token_count, max_tokens, "over input budget, overflow tolerated");
        return untouched(draft);
    }

    let mut draft = draft;
    let mut total = token_count;
    let mut history_dropped = 0;

    while total > max_tokens && !draft.history.is_empty() {
        let dropped = draft.history.remove(0);
        total -= estimate_tokens(&dropped.content);
        history_dropped += 1;
    }

    if total > max_tokens {
        let deficit = total - max_tokens;
        let target = estimate_tokens(&draft.system_prompt).saturating_sub(deficit);
        draft.system_prompt = compactor.compact(&draft.system_prompt, target);
        total = draft.token_count();
    }

    debug!(
        before = token_count,
        after = total,
        max_tokens,
        history_dropped,
        "compacted to input budget"
    );

    Enforced {
        draft,
        token_count: total,
        compacted: true,
        history_dropped,
    }
}
