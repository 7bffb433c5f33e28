use std::cmp::Ordering;

use tracing::trace;

use crate::types::declarations::{Budget, Policy};
use crate::types::error::Result;

const DEFAULT_WEIGHT: f64 = 1.0;

fn floor_tokens(value: f64) -> usize {
    if value.is_finite() && value > 0.0 {
        value.floor() as usize
    } else {
        0
    }
}

fn weight_or_default(weight: Option<f64>) -> f64 {
    match weight {
        Some(w) if w.is_finite() && w >= 0.0 => w,
        Some(_) => 0.0,
        None => DEFAULT_WEIGHT,
    }
}

/// Resolve the token cap of a single pack.
///
/// Precedence:
/// 1. `override.max_tokens`
/// 2. `override.ratio * input_budget.max_tokens`
/// 3. `pack_budget.default_max_tokens * weight`
/// 4. `pack_budget.default_ratio * input_budget.max_tokens * weight`
/// 5. unlimited (`None`)
///
/// Weight defaults to 1.0 and is not clamped from above.
pub fn resolve_pack_budget(
    budget_override: Option<&Budget>,
    policy: Option<&Policy>,
    weight: Option<f64>,
) -> Result<Option<usize>> {
    let input_max = policy.and_then(Policy::input_max_tokens);

    if let Some(budget) = budget_override {
        budget.validate("pack budget override")?;
        if let Some(max_tokens) = budget.max_tokens {
            return Ok(Some(max_tokens));
        }
        if let (Some(ratio), Some(input_max)) = (budget.ratio, input_max) {
            return Ok(Some(floor_tokens(input_max as f64 * ratio)));
        }
    }

    let weight = weight_or_default(weight);
    let Some(pack_budget) = policy.and_then(|p| p.pack_budget.as_ref()) else {
        return Ok(None);
    };

    if let Some(default_max) = pack_budget.default_max_tokens {
        return Ok(Some(floor_tokens(default_max as f64 * weight)));
    }
    if let (Some(ratio), Some(input_max)) = (pack_budget.default_ratio, input_max) {
        return Ok(Some(floor_tokens(ratio * input_max as f64 * weight)));
    }
    Ok(None)
}

/// The shared pool a set of packs is carved from, before any regeneration scaling.
pub fn pool_total(policy: Option<&Policy>, total_override: Option<usize>) -> Option<usize> {
    if total_override.is_some() {
        return total_override;
    }
    let policy = policy?;
    let pack_budget = policy.pack_budget.as_ref()?;
    if let Some(default_max) = pack_budget.default_max_tokens {
        return Some(default_max);
    }
    let ratio = pack_budget.default_ratio?;
    let input_max = policy.input_max_tokens()?;
    Some(floor_tokens(ratio * input_max as f64))
}

/// A pack competing for the shared pool.
#[derive(Debug, Clone, PartialEq)]
pub struct AllocationEntry {
    pub name: String,
    pub weight: f64,
    pub priority: i64,
}

impl AllocationEntry {
    pub fn new(name: impl Into<String>, weight: Option<f64>, priority: Option<i64>) -> Self {
        Self {
            name: name.into(),
            weight: weight_or_default(weight),
            priority: priority.unwrap_or(0),
        }
    }
}

/// Outcome of splitting a pool across packs.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Allocation {
    /// `None` when no pool could be resolved: packs are then uncapped.
    pub pool: Option<usize>,
    /// Cap per entry, in the order the entries were given. A pack listed
    /// twice gets a share for each entry.
    pub shares: Vec<usize>,
}

impl Allocation {
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Cap for the entry at `index` in the original entry list. Entries left
    /// out once the pool ran dry get zero.
    pub fn cap_at(&self, index: usize) -> Option<usize> {
        self.pool?;
        Some(self.shares.get(index).copied().unwrap_or(0))
    }
}

/// Split a token pool across weighted, prioritized packs.
///
/// Entries are ordered by priority (desc), then weight (desc), then
/// declaration order. Each takes `floor(total * weight / sum(weights))`, at
/// least 1 and at most what is left. The rounding remainder goes to the first
/// entry in that order.
pub fn allocate_many(
    entries: &[AllocationEntry],
    policy: Option<&Policy>,
    total_override: Option<usize>,
) -> Allocation {
    let Some(total) = pool_total(policy, total_override) else {
        return Allocation::unbounded();
    };

    let mut order: Vec<usize> = (0..entries.len()).collect();
    order.sort_by(|&a, &b| {
        let (a, b) = (&entries[a], &entries[b]);
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.weight.partial_cmp(&a.weight).unwrap_or(Ordering::Equal))
    });

    let weight_sum: f64 = entries.iter().map(|e| e.weight).sum();
    let equal_split = weight_sum <= 0.0;

    let mut shares = vec![0; entries.len()];
    let mut remaining = total;

    for &index in &order {
        if remaining == 0 {
            break;
        }
        let share = if equal_split {
            total / entries.len()
        } else {
            floor_tokens(total as f64 * entries[index].weight / weight_sum)
        };
        let share = share.max(1).min(remaining);

        remaining -= share;
        shares[index] = share;
        trace!(pack = %entries[index].name, share, "pack share");
    }

    if remaining > 0 {
        if let Some(&first) = order.first() {
            shares[first] += remaining;
        }
    }

    trace!(total, packs = entries.len(), "allocated pack budgets");

    Allocation {
        pool: Some(total),
        shares,
    }
}
