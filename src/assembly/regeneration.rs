/// State of one render attempt in the regeneration loop.
///
/// Each attempt gets a fresh record from [`RegenerationState::next`]; nothing
/// is mutated in place.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RegenerationState {
    /// Zero-based attempt index.
    pub attempt: usize,
    /// Multiplier applied to the shared pack pool. Halves on every retry.
    pub scale: f64,
}

impl RegenerationState {
    pub fn initial() -> Self {
        Self {
            attempt: 0,
            scale: 1.0,
        }
    }

    pub fn next(self) -> Self {
        Self {
            attempt: self.attempt + 1,
            scale: self.scale / 2.0,
        }
    }

    /// Retries render with halved retrieval ceilings.
    pub fn tighten(&self) -> bool {
        self.attempt > 0
    }

    pub fn scaled_total(&self, total: Option<usize>) -> Option<usize> {
        total.map(|t| (t as f64 * self.scale).floor() as usize)
    }

    pub fn is_last(&self, max_iterations: usize) -> bool {
        self.attempt + 1 >= max_iterations
    }

    /// Whether another attempt should follow this one.
    pub fn should_retry(&self, compacted: bool, compacts_on_overflow: bool, max_iterations: usize) -> bool {
        compacted && compacts_on_overflow && !self.is_last(max_iterations)
    }
}
