//! Turning pack references into rendered text.
//!
//! A pack name resolves to a context declaration (rendered nested) or a
//! retriever declaration (rendered through retrieval, paged by expansion and
//! flattened by the merger).

pub mod expansion;
pub mod merge;
pub mod nested;
pub mod renderer;

pub use expansion::{expand, Expanded, ExpansionPlan, StopReason};
pub use merge::{merge, DEFAULT_JOIN};
pub use renderer::{build_request, DEFAULT_LIMIT};
