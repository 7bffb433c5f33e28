use tracing::debug;

use crate::pack::merge::{merge, DEFAULT_JOIN};
use crate::types::declarations::Expansion;
use crate::types::error::{AssemblyError, Result};
use crate::types::retrieval::{ContextPack, ContextRetrieverRequest, Retriever};

/// How far a retrieval may page to fill its character target.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ExpansionPlan {
    pub max_pages: usize,
    pub min_fill_ratio: f64,
    pub target_chars: Option<usize>,
}

impl ExpansionPlan {
    pub fn new(expansion: &Expansion, target_chars: Option<usize>) -> Self {
        Self {
            max_pages: expansion.max_pages.max(1),
            min_fill_ratio: expansion.min_fill_ratio,
            target_chars,
        }
    }

    /// A plan that issues exactly one call.
    pub fn single_page() -> Self {
        Self {
            max_pages: 1,
            min_fill_ratio: 1.0,
            target_chars: None,
        }
    }

    fn fill_threshold(&self, target: usize) -> usize {
        (self.min_fill_ratio * target as f64).ceil() as usize
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    PageCap,
    NoTarget,
    Exhausted,
    Filled,
}

/// Merged pages plus why paging stopped.
#[derive(Debug, Clone, PartialEq)]
pub struct Expanded {
    pub pack: ContextPack,
    pub pages: usize,
    pub stop: StopReason,
}

/// Fetch pages sequentially until the page cap, an exhausted result, or the
/// fill threshold is reached. Page N+1 starts at `offset + limit` of page N.
pub fn expand(
    retriever: &dyn Retriever,
    mut request: ContextRetrieverRequest,
    plan: &ExpansionPlan,
) -> Result<Expanded> {
    let mut pages: Vec<ContextPack> = Vec::new();

    let stop = loop {
        let page = retriever
            .retrieve(&request)
            .map_err(AssemblyError::Retrieval)?;
        let exhausted = page.evidence_count < request.limit;
        pages.push(page);

        if pages.len() >= plan.max_pages {
            break StopReason::PageCap;
        }
        let Some(target) = plan.target_chars else {
            break StopReason::NoTarget;
        };
        if exhausted {
            break StopReason::Exhausted;
        }
        let filled = merge(&pages, DEFAULT_JOIN).text.chars().count();
        if filled >= plan.fill_threshold(target) {
            break StopReason::Filled;
        }

        request.offset += request.limit;
    };

    debug!(pages = pages.len(), stop = ?stop, "retrieval expansion finished");

    Ok(Expanded {
        pack: merge(&pages, DEFAULT_JOIN),
        pages: pages.len(),
        stop,
    })
}
