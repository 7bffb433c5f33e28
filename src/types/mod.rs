pub mod assembly_result;
pub mod declarations;
pub mod error;
pub mod retrieval;

pub use assembly_result::{AssemblyMetadata, ContextAssemblyResult, Message, Role};
pub use declarations::{
    Budget, CompactorConfig, CompactorDeclaration, CompactorRef, ContentDirective, ContentSource,
    ContextDeclaration, ContextInsert, ContextMode, CorpusDeclaration, Declarations, Expansion,
    HistoryInsert, InputBudget, MessageDirective, OverflowMode, PackBudgetPolicy, PackReference,
    Policy, RetrieverDeclaration,
};
pub use error::{AssemblyError, Result, RetrievalError};
pub use retrieval::{Block, ContextPack, ContextRetrieverRequest, Retriever};
