pub mod strategies;

pub use strategies::{SummaryCompactor, TruncateCompactor};

use crate::types::declarations::{CompactorRef, Declarations, Policy};
use crate::types::error::{AssemblyError, Result};

/// Token estimate used throughout assembly: whitespace-delimited word count.
///
/// A deterministic stand-in for a real tokenizer.
pub fn estimate_tokens(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Shrinks text so that `estimate_tokens(output) <= max_tokens` where feasible.
pub trait Compactor {
    fn compact(&self, text: &str, max_tokens: usize) -> String;
}

/// The closed set of built-in strategies a policy can select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompactorKind {
    Truncate,
    Summary,
}

impl CompactorKind {
    pub fn parse(kind: &str) -> Result<Self> {
        match kind {
            "truncate" => Ok(CompactorKind::Truncate),
            "summary" => Ok(CompactorKind::Summary),
            other => Err(AssemblyError::UnsupportedCompactor(other.to_string())),
        }
    }

    /// Pick the compactor a policy asks for. No policy, or no compactor in it,
    /// means truncation.
    pub fn resolve(policy: Option<&Policy>, declarations: &Declarations) -> Result<Self> {
        let Some(reference) = policy.and_then(|p| p.compactor.as_ref()) else {
            return Ok(CompactorKind::Truncate);
        };

        match reference {
            CompactorRef::Inline(config) => Self::parse(&config.kind),
            CompactorRef::Named(name) => {
                let declaration = declarations
                    .compactor(name)
                    .ok_or_else(|| AssemblyError::UnknownCompactor(name.clone()))?;
                let kind = declaration
                    .kind()
                    .ok_or_else(|| AssemblyError::UnsupportedCompactor(format!("{name} (no type)")))?;
                Self::parse(kind)
            }
        }
    }
}

impl Compactor for CompactorKind {
    fn compact(&self, text: &str, max_tokens: usize) -> String {
        match self {
            CompactorKind::Truncate => TruncateCompactor.compact(text, max_tokens),
            CompactorKind::Summary => SummaryCompactor.compact(text, max_tokens),
        }
    }
}
