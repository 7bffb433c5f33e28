pub mod enforcement;
pub mod regeneration;
pub(crate) mod scope;

pub use enforcement::{enforce_budget, Draft, Enforced};
pub use regeneration::RegenerationState;

use tracing::debug;

use crate::template::TemplateContext;
use crate::types::assembly_result::{ContextAssemblyResult, Message};
use crate::types::declarations::Declarations;
use crate::types::error::{AssemblyError, Result};
use crate::types::retrieval::Retriever;
use scope::{AssemblyInputs, AssemblyScope};

/// Per-call inputs to [`ContextAssembler::assemble`].
pub struct AssemblyRequest<'r> {
    pub context: String,
    pub base_system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
    pub template_context: TemplateContext,
    /// Replaces the assembler's default retriever for this call only.
    pub retriever: Option<&'r dyn Retriever>,
}

impl<'r> AssemblyRequest<'r> {
    pub fn new(context: impl Into<String>) -> Self {
        Self {
            context: context.into(),
            base_system_prompt: String::new(),
            history: Vec::new(),
            user_message: String::new(),
            template_context: TemplateContext::default(),
            retriever: None,
        }
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.base_system_prompt = prompt.into();
        self
    }

    pub fn with_history(mut self, history: Vec<Message>) -> Self {
        self.history = history;
        self
    }

    pub fn with_user_message(mut self, message: impl Into<String>) -> Self {
        self.user_message = message.into();
        self
    }

    pub fn with_template_context(mut self, ctx: TemplateContext) -> Self {
        self.template_context = ctx;
        self
    }

    pub fn with_retriever(mut self, retriever: &'r dyn Retriever) -> Self {
        self.retriever = Some(retriever);
        self
    }
}

/// Assembles token-budgeted prompts from context declarations.
///
/// Holds only read-only registries and a default retriever, so one assembler
/// can serve many calls; all mutable state lives inside a single call.
pub struct ContextAssembler<'d, R> {
    declarations: &'d Declarations,
    retriever: R,
}

impl<'d, R> ContextAssembler<'d, R>
where
    R: Retriever,
{
    pub fn new(declarations: &'d Declarations, retriever: R) -> Self {
        Self {
            declarations,
            retriever,
        }
    }

    pub fn declarations(&self) -> &'d Declarations {
        self.declarations
    }

    pub fn assemble(&self, request: AssemblyRequest<'_>) -> Result<ContextAssemblyResult> {
        // 0. Resolve the context before touching any retriever
        let declaration = self
            .declarations
            .context(&request.context)
            .ok_or_else(|| AssemblyError::UnknownContext(request.context.clone()))?;

        let retriever: &dyn Retriever = match request.retriever {
            Some(retriever) => retriever,
            None => &self.retriever,
        };

        // 1. Seed the template context with the caller's message
        let mut ctx = request.template_context;
        ctx.seed_user_message(&request.user_message);

        let inputs = AssemblyInputs {
            base_system_prompt: request.base_system_prompt,
            history: request.history,
            user_message: request.user_message,
        };

        // 2. Render, enforce, regenerate
        let mut scope = AssemblyScope::new(self.declarations, retriever);
        scope.visiting.push(declaration.name.clone());
        let result = scope.assemble_context(
            declaration,
            declaration.policy.as_ref(),
            &inputs,
            &ctx,
            None,
        )?;

        debug!(
            context = %declaration.name,
            token_count = result.token_count,
            attempts = result.assembly.attempts,
            "context assembled"
        );
        Ok(result)
    }
}
