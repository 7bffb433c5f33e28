//! Deterministic, token-budgeted prompt context assembly for LLM calls.
//!
//! `context-assembly` turns a declarative context plan, a retriever, and
//! per-call inputs (base system prompt, history, user message) into a system
//! prompt, trimmed history, and user message that fit an input budget. Pack
//! budgets are allocated by weight and priority, retrieval pages until a pack
//! is filled, packs may nest other contexts, and over-budget output is
//! compacted and re-rendered a bounded number of times. Identical inputs
//! always produce identical outputs; the only side effects are retriever calls.

pub mod assembly;
pub mod budget;
pub mod compaction;
pub mod pack;
pub mod template;
pub mod types;

pub use assembly::{AssemblyRequest, ContextAssembler};
pub use template::TemplateContext;
pub use types::{AssemblyError, ContextAssemblyResult, ContextPack, ContextRetrieverRequest, Retriever};
