use tracing::debug;

use crate::assembly::enforcement::{enforce_budget, Draft};
use crate::assembly::regeneration::RegenerationState;
use crate::budget::{allocate_many, pool_total, resolve_pack_budget, AllocationEntry};
use crate::compaction::CompactorKind;
use crate::pack::merge::DEFAULT_JOIN;
use crate::template::{resolve, TemplateContext};
use crate::types::assembly_result::{AssemblyMetadata, ContextAssemblyResult, Message, Role};
use crate::types::declarations::{
    ContentDirective, ContentSource, ContextDeclaration, ContextMode, Declarations,
    MessageDirective, PackReference, Policy,
};
use crate::types::error::{AssemblyError, Result};
use crate::types::retrieval::Retriever;

const DEFAULT_MAX_ITERATIONS: usize = 2;

/// Caller-supplied prompt material for one assembly.
#[derive(Debug, Clone, Default)]
pub(crate) struct AssemblyInputs {
    pub base_system_prompt: String,
    pub history: Vec<Message>,
    pub user_message: String,
}

/// Where a message in an explicit-mode render came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Origin {
    History,
    Directive,
}

/// Call-local state shared by every render in one `assemble` call.
pub(crate) struct AssemblyScope<'a> {
    pub declarations: &'a Declarations,
    pub retriever: &'a dyn Retriever,
    /// Contexts currently being rendered, outermost first.
    pub visiting: Vec<String>,
}

pub(crate) fn join_nonempty<'s>(parts: impl IntoIterator<Item = &'s str>) -> String {
    parts
        .into_iter()
        .filter(|p| !p.is_empty())
        .collect::<Vec<_>>()
        .join(DEFAULT_JOIN)
}

fn directive_content(directive: &ContentDirective, ctx: &TemplateContext) -> Result<String> {
    Ok(match directive.source()? {
        ContentSource::Literal(content) => content.to_string(),
        ContentSource::Template(template, vars) => resolve(template, vars, ctx),
    })
}

impl<'a> AssemblyScope<'a> {
    pub fn new(declarations: &'a Declarations, retriever: &'a dyn Retriever) -> Self {
        Self {
            declarations,
            retriever,
            visiting: Vec::new(),
        }
    }

    /// Run the regeneration loop for one context under `policy`.
    ///
    /// `total_override` replaces the policy's pack pool, as happens when the
    /// context is rendered as a pack of another.
    pub fn assemble_context(
        &mut self,
        declaration: &'a ContextDeclaration,
        policy: Option<&'a Policy>,
        inputs: &AssemblyInputs,
        ctx: &TemplateContext,
        total_override: Option<usize>,
    ) -> Result<ContextAssemblyResult> {
        if let Some(policy) = policy {
            policy.validate()?;
        }
        let mode = declaration.mode()?;
        let compactor = CompactorKind::resolve(policy, self.declarations)?;

        let max_iterations = policy.map_or(DEFAULT_MAX_ITERATIONS, |p| p.max_iterations);
        let compacts = policy.is_some_and(Policy::compacts_on_overflow);
        let base_total = pool_total(policy, total_override);

        let mut state = RegenerationState::initial();
        loop {
            let scaled_total = state.scaled_total(base_total);
            let draft = match mode {
                ContextMode::Default(packs) => {
                    self.render_default(packs, inputs, ctx, policy, scaled_total, state.tighten())?
                }
                ContextMode::Explicit(directives) => self.render_explicit(
                    &declaration.name,
                    directives,
                    inputs,
                    ctx,
                    policy,
                    scaled_total,
                    state.tighten(),
                )?,
            };

            let enforced = enforce_budget(draft, policy, &compactor);
            debug!(
                context = %declaration.name,
                attempt = state.attempt,
                scale = state.scale,
                token_count = enforced.token_count,
                compacted = enforced.compacted,
                "assembly attempt finished"
            );

            if !state.should_retry(enforced.compacted, compacts, max_iterations) {
                return Ok(ContextAssemblyResult {
                    system_prompt: enforced.draft.system_prompt,
                    history: enforced.draft.history,
                    user_message: enforced.draft.user_message,
                    token_count: enforced.token_count,
                    assembly: AssemblyMetadata {
                        context: declaration.name.clone(),
                        input_budget: policy.and_then(Policy::input_max_tokens),
                        attempts: state.attempt + 1,
                        compacted: enforced.compacted,
                        history_dropped: enforced.history_dropped,
                    },
                });
            }
            state = state.next();
        }
    }

    /// Default mode: base prompt followed by every non-empty pack, in order.
    fn render_default(
        &mut self,
        packs: &'a [PackReference],
        inputs: &AssemblyInputs,
        ctx: &TemplateContext,
        policy: Option<&'a Policy>,
        total: Option<usize>,
        tighten: bool,
    ) -> Result<Draft> {
        let entries: Vec<AllocationEntry> = packs
            .iter()
            .map(|p| AllocationEntry::new(p.name.clone(), p.weight, p.priority))
            .collect();
        let allocation = allocate_many(&entries, policy, total);

        let mut ctx = ctx.clone();
        let mut texts = Vec::with_capacity(packs.len());
        for (index, pack) in packs.iter().enumerate() {
            let cap = match &pack.budget {
                Some(budget) => resolve_pack_budget(Some(budget), policy, pack.weight)?,
                None => allocation.cap_at(index),
            };
            let rendered = self.render_pack(&pack.name, &ctx, cap, policy, tighten, pack.weight)?;
            ctx.set_pack_text(&pack.name, &rendered.text);
            texts.push(rendered.text);
        }

        let system_prompt = join_nonempty(
            std::iter::once(inputs.base_system_prompt.as_str()).chain(texts.iter().map(String::as_str)),
        );

        Ok(Draft {
            system_prompt,
            history: inputs.history.clone(),
            user_message: inputs.user_message.clone(),
        })
    }

    /// Walk directives in order. `history` is `None` for nested renders, where
    /// a history insert is a configuration error.
    #[allow(clippy::too_many_arguments)]
    fn render_directives(
        &mut self,
        context_name: &str,
        directives: &'a [MessageDirective],
        history: Option<&[Message]>,
        ctx: &TemplateContext,
        policy: Option<&'a Policy>,
        total: Option<usize>,
        tighten: bool,
    ) -> Result<Vec<(Message, Origin)>> {
        let entries: Vec<AllocationEntry> = directives
            .iter()
            .filter_map(|d| match d {
                MessageDirective::ContextInsert(insert) => Some(AllocationEntry::new(
                    insert.pack.clone(),
                    insert.weight,
                    insert.priority,
                )),
                _ => None,
            })
            .collect();
        let allocation = allocate_many(&entries, policy, total);

        let mut ctx = ctx.clone();
        let mut messages = Vec::with_capacity(directives.len());
        let mut insert_index = 0;
        for directive in directives {
            match directive {
                MessageDirective::HistoryInsert(_) => {
                    let history = history
                        .ok_or_else(|| AssemblyError::NestedHistoryInsert(context_name.to_string()))?;
                    messages.extend(history.iter().cloned().map(|m| (m, Origin::History)));
                }
                MessageDirective::ContextInsert(insert) => {
                    let cap = match &insert.budget {
                        Some(budget) => resolve_pack_budget(Some(budget), policy, insert.weight)?,
                        None => allocation.cap_at(insert_index),
                    };
                    insert_index += 1;
                    let rendered =
                        self.render_pack(&insert.pack, &ctx, cap, policy, tighten, insert.weight)?;
                    ctx.set_pack_text(&insert.pack, &rendered.text);
                    if !rendered.is_empty() {
                        messages.push((Message::system(rendered.text), Origin::Directive));
                    }
                }
                MessageDirective::System(content) => messages.push((
                    Message::new(Role::System, directive_content(content, &ctx)?),
                    Origin::Directive,
                )),
                MessageDirective::User(content) => messages.push((
                    Message::new(Role::User, directive_content(content, &ctx)?),
                    Origin::Directive,
                )),
                MessageDirective::Assistant(content) => messages.push((
                    Message::new(Role::Assistant, directive_content(content, &ctx)?),
                    Origin::Directive,
                )),
            }
        }
        Ok(messages)
    }

    /// Explicit mode at the top level.
    ///
    /// Leading system messages fold into the system prompt. The last
    /// directive-produced user message becomes the user message, falling back
    /// to the caller's. Caller history is kept in front when no directive
    /// places it.
    #[allow(clippy::too_many_arguments)]
    fn render_explicit(
        &mut self,
        context_name: &str,
        directives: &'a [MessageDirective],
        inputs: &AssemblyInputs,
        ctx: &TemplateContext,
        policy: Option<&'a Policy>,
        total: Option<usize>,
        tighten: bool,
    ) -> Result<Draft> {
        let mut messages = self.render_directives(
            context_name,
            directives,
            Some(&inputs.history),
            ctx,
            policy,
            total,
            tighten,
        )?;

        let leading = messages
            .iter()
            .take_while(|(m, _)| m.role == Role::System)
            .count();
        let mut rest = messages.split_off(leading);
        let system_prompt = join_nonempty(
            std::iter::once(inputs.base_system_prompt.as_str())
                .chain(messages.iter().map(|(m, _)| m.content.as_str())),
        );

        // Spliced caller history is never promoted to the user message.
        let user_message = match rest
            .iter()
            .rposition(|(m, origin)| m.role == Role::User && *origin == Origin::Directive)
        {
            Some(index) => rest.remove(index).0.content,
            None => inputs.user_message.clone(),
        };

        let places_history = directives
            .iter()
            .any(|d| matches!(d, MessageDirective::HistoryInsert(_)));
        let mut history = if places_history {
            Vec::new()
        } else {
            inputs.history.clone()
        };
        history.extend(rest.into_iter().map(|(m, _)| m));

        Ok(Draft {
            system_prompt,
            history,
            user_message,
        })
    }

    /// Explicit mode as a nested pack: every non-empty message content,
    /// blank-line separated.
    #[allow(clippy::too_many_arguments)]
    pub fn render_explicit_text(
        &mut self,
        context_name: &str,
        directives: &'a [MessageDirective],
        ctx: &TemplateContext,
        policy: Option<&'a Policy>,
        total: Option<usize>,
        tighten: bool,
    ) -> Result<String> {
        let messages =
            self.render_directives(context_name, directives, None, ctx, policy, total, tighten)?;
        Ok(join_nonempty(messages.iter().map(|(m, _)| m.content.as_str())))
    }
}
