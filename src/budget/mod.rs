pub mod allocation;

pub use allocation::{
    allocate_many, pool_total, resolve_pack_budget, Allocation, AllocationEntry,
};

/// Characters assumed per token when turning a token cap into a character ceiling.
pub const CHARS_PER_TOKEN: usize = 4;

/// Halve a ceiling for a tightened render, never below 1.
pub fn halve(value: usize) -> usize {
    (value / 2).max(1)
}
