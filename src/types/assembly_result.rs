use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// A role-tagged chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// Metadata describing how the result was produced.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssemblyMetadata {
    pub context: String,
    pub input_budget: Option<usize>,

    /// Render attempts made, including the final one.
    pub attempts: usize,
    pub compacted: bool,
    pub history_dropped: usize,
}

/// The final result of an assembly call.
///
/// `token_count` is always the honest estimate of the returned content, even
/// when it exceeds the input budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextAssemblyResult {
    pub system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
    pub token_count: usize,

    pub assembly: AssemblyMetadata,
}

#[derive(Serialize)]
struct DigestPayload<'a> {
    system_prompt: &'a str,
    history: &'a [Message],
    user_message: &'a str,
}

impl ContextAssemblyResult {
    /// Content digest over the prompt material only: `sha256:<hex>`.
    pub fn digest(&self) -> String {
        let payload = DigestPayload {
            system_prompt: &self.system_prompt,
            history: &self.history,
            user_message: &self.user_message,
        };
        // Serializing plain strings and enums cannot fail.
        let bytes = serde_json::to_vec(&payload).unwrap_or_default();

        let mut hasher = Sha256::new();
        hasher.update(&bytes);
        let hash = hasher.finalize();

        format!("sha256:{}", hex::encode(hash))
    }
}
