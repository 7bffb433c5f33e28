use thiserror::Error;

/// Error surfaced by a retriever. Passed through the engine untouched.
pub type RetrievalError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, Error)]
pub enum AssemblyError {
    #[error("Unknown context: {0}")]
    UnknownContext(String),

    #[error("Unknown pack: {0}")]
    UnknownPack(String),

    #[error("Unknown corpus: {0}")]
    UnknownCorpus(String),

    #[error("Unknown compactor: {0}")]
    UnknownCompactor(String),

    #[error("Unsupported compactor type: {0}")]
    UnsupportedCompactor(String),

    #[error("Context {0} declares both messages and packs")]
    AmbiguousMode(String),

    #[error("Context {0} declares neither messages nor packs")]
    MissingMode(String),

    #[error("Context {0} is used as a nested pack but contains a history insert")]
    NestedHistoryInsert(String),

    #[error("Invalid budget for {0}: exactly one of ratio or max_tokens is required")]
    InvalidBudget(String),

    #[error("Invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("Invalid directive: {0}")]
    InvalidDirective(String),

    #[error("Pack cycle detected: {0}")]
    PackCycle(String),

    #[error(transparent)]
    Retrieval(RetrievalError),
}

impl AssemblyError {
    /// Configuration errors are caller bugs and are never worth retrying.
    pub fn is_configuration(&self) -> bool {
        !matches!(self, AssemblyError::Retrieval(_))
    }
}

pub type Result<T> = std::result::Result<T, AssemblyError>;
