use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::error::RetrievalError;

/// The wire contract handed to a retriever.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextRetrieverRequest {
    pub query: String,
    pub offset: usize,
    /// Always at least 1.
    pub limit: usize,
    pub maximum_total_characters: Option<usize>,
    pub max_tokens: Option<usize>,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

/// One evidence item inside a pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Block {
    pub evidence_item_id: String,
    pub text: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
}

impl Block {
    pub fn new(evidence_item_id: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            evidence_item_id: evidence_item_id.into(),
            text: text.into(),
            metadata: Map::new(),
        }
    }
}

/// Rendered text plus the evidence it was built from.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContextPack {
    pub text: String,
    pub evidence_count: usize,
    #[serde(default)]
    pub blocks: Vec<Block>,
}

impl ContextPack {
    pub fn empty() -> Self {
        Self::default()
    }

    /// A pack carrying only text, with no evidence blocks.
    pub fn from_text(text: impl Into<String>) -> Self {
        let text = text.into();
        let evidence_count = usize::from(!text.is_empty());
        Self {
            text,
            evidence_count,
            blocks: Vec::new(),
        }
    }

    pub fn from_blocks(blocks: Vec<Block>, join_with: &str) -> Self {
        let text = blocks
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join(join_with);
        Self {
            text,
            evidence_count: blocks.len(),
            blocks,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Anything that can answer a retrieval request.
///
/// Implemented for every `Fn(&ContextRetrieverRequest) -> Result<ContextPack, RetrievalError>`.
pub trait Retriever {
    fn retrieve(&self, request: &ContextRetrieverRequest) -> Result<ContextPack, RetrievalError>;
}

impl<F> Retriever for F
where
    F: Fn(&ContextRetrieverRequest) -> Result<ContextPack, RetrievalError>,
{
    fn retrieve(&self, request: &ContextRetrieverRequest) -> Result<ContextPack, RetrievalError> {
        self(request)
    }
}
