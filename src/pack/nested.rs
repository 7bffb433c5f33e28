use tracing::debug;

use crate::assembly::regeneration::RegenerationState;
use crate::assembly::scope::{AssemblyInputs, AssemblyScope};
use crate::budget::halve;
use crate::compaction::{estimate_tokens, Compactor, CompactorKind};
use crate::template::TemplateContext;
use crate::types::declarations::{ContextDeclaration, ContextMode, Policy};
use crate::types::error::{AssemblyError, Result};
use crate::types::retrieval::ContextPack;

impl<'a> AssemblyScope<'a> {
    /// Render another context declaration as a pack.
    ///
    /// The nested context's own policy applies, falling back to the caller's.
    /// Entering a context already on the render path is a cycle.
    pub fn render_nested(
        &mut self,
        declaration: &'a ContextDeclaration,
        ctx: &TemplateContext,
        cap: Option<usize>,
        caller_policy: Option<&'a Policy>,
        tighten: bool,
    ) -> Result<ContextPack> {
        if self.visiting.iter().any(|name| name == &declaration.name) {
            let mut path = self.visiting.clone();
            path.push(declaration.name.clone());
            return Err(AssemblyError::PackCycle(path.join(" -> ")));
        }

        self.visiting.push(declaration.name.clone());
        let rendered = self.render_nested_text(declaration, ctx, cap, caller_policy);
        self.visiting.pop();
        let raw = rendered?;

        let policy = declaration.policy.as_ref().or(caller_policy);
        let compactor = CompactorKind::resolve(policy, self.declarations)?;
        let text = match cap {
            Some(cap) => {
                let cap = if tighten { halve(cap) } else { cap };
                compactor.compact(&raw, cap)
            }
            None => raw,
        };

        Ok(ContextPack::from_text(text))
    }

    fn render_nested_text(
        &mut self,
        declaration: &'a ContextDeclaration,
        ctx: &TemplateContext,
        cap: Option<usize>,
        caller_policy: Option<&'a Policy>,
    ) -> Result<String> {
        let policy = declaration.policy.as_ref().or(caller_policy);
        match declaration.mode()? {
            ContextMode::Default(_) => {
                let inputs = AssemblyInputs::default();
                let result = self.assemble_context(declaration, policy, &inputs, ctx, cap)?;
                Ok(result.system_prompt)
            }
            ContextMode::Explicit(directives) => {
                if let Some(policy) = policy {
                    policy.validate()?;
                }
                let max_iterations = policy.map_or(1, |p| p.max_iterations);
                let compacts = policy.is_some_and(Policy::compacts_on_overflow);

                let mut state = RegenerationState::initial();
                loop {
                    let raw = self.render_explicit_text(
                        &declaration.name,
                        directives,
                        ctx,
                        policy,
                        state.scaled_total(cap),
                        state.tighten(),
                    )?;
                    let over = cap.is_some_and(|cap| estimate_tokens(&raw) > cap);
                    debug!(
                        context = %declaration.name,
                        attempt = state.attempt,
                        over,
                        "nested explicit render"
                    );
                    if !state.should_retry(over, compacts, max_iterations) {
                        return Ok(raw);
                    }
                    state = state.next();
                }
            }
        }
    }
}
