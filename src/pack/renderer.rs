use serde_json::{Map, Value};
use tracing::debug;

use crate::assembly::scope::AssemblyScope;
use crate::budget::{halve, resolve_pack_budget, CHARS_PER_TOKEN};
use crate::pack::expansion::{expand, ExpansionPlan};
use crate::template::{resolve, TemplateContext};
use crate::types::declarations::{Declarations, Policy, RetrieverDeclaration};
use crate::types::error::{AssemblyError, Result};
use crate::types::retrieval::{ContextPack, ContextRetrieverRequest};

pub const DEFAULT_LIMIT: usize = 5;

const KEY_CORPUS: &str = "corpus";
const KEY_QUERY: &str = "query";
const KEY_LIMIT: &str = "limit";
const KEY_OFFSET: &str = "offset";
const KEY_MAX_CHARS: &str = "maximum_total_characters";

fn as_count(value: Option<&Value>) -> Option<usize> {
    value.and_then(Value::as_u64).map(|n| n as usize)
}

/// Corpus config overlaid by retriever config. Declaration names are dropped.
fn merged_params(
    declaration: &RetrieverDeclaration,
    declarations: &Declarations,
) -> Result<Map<String, Value>> {
    let mut params = Map::new();
    if let Some(corpus_name) = declaration.corpus() {
        let corpus = declarations
            .corpus(corpus_name)
            .ok_or_else(|| AssemblyError::UnknownCorpus(corpus_name.to_string()))?;
        params.extend(corpus.config.iter().map(|(k, v)| (k.clone(), v.clone())));
    }
    params.extend(
        declaration
            .config
            .iter()
            .map(|(k, v)| (k.clone(), v.clone())),
    );
    params.remove("name");
    Ok(params)
}

/// Query from the declared template, else `input.query`, else `input.message`.
fn resolve_query(declaration: &RetrieverDeclaration, ctx: &TemplateContext) -> String {
    match declaration.query_template() {
        Some(template) => resolve(template, &Map::new(), ctx),
        None => ctx
            .input_str("query")
            .or_else(|| ctx.input_str("message"))
            .unwrap_or_default()
            .to_string(),
    }
}

/// Build the first-page request for a retriever pack.
///
/// The token cap becomes a character ceiling at four characters per token and
/// is intersected with any explicit character cap. `tighten` halves both the
/// ceiling and the item limit.
pub fn build_request(
    pack: &str,
    declaration: &RetrieverDeclaration,
    declarations: &Declarations,
    ctx: &TemplateContext,
    cap: Option<usize>,
    tighten: bool,
) -> Result<ContextRetrieverRequest> {
    let mut params = merged_params(declaration, declarations)?;

    let mut limit = as_count(params.get(KEY_LIMIT)).unwrap_or(DEFAULT_LIMIT).max(1);
    let offset = as_count(params.get(KEY_OFFSET)).unwrap_or(0);
    let explicit_chars = as_count(params.get(KEY_MAX_CHARS));
    let budget_chars = cap.map(|tokens| tokens.saturating_mul(CHARS_PER_TOKEN));

    let mut ceiling = match (explicit_chars, budget_chars) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    };
    if tighten {
        ceiling = ceiling.map(halve);
        limit = halve(limit);
    }

    for key in [KEY_QUERY, KEY_LIMIT, KEY_OFFSET, KEY_MAX_CHARS] {
        params.remove(key);
    }
    params.insert("pack".to_string(), Value::String(pack.to_string()));
    if let Some(corpus) = declaration.corpus() {
        params.insert(KEY_CORPUS.to_string(), Value::String(corpus.to_string()));
    }

    Ok(ContextRetrieverRequest {
        query: resolve_query(declaration, ctx),
        offset,
        limit,
        maximum_total_characters: ceiling,
        max_tokens: cap,
        metadata: params,
    })
}

impl<'a> AssemblyScope<'a> {
    /// Render a pack by name: a context renders nested, a retriever renders
    /// through retrieval and expansion.
    pub fn render_pack(
        &mut self,
        name: &str,
        ctx: &TemplateContext,
        cap: Option<usize>,
        policy: Option<&'a Policy>,
        tighten: bool,
        weight: Option<f64>,
    ) -> Result<ContextPack> {
        let cap = match cap {
            Some(cap) => Some(cap),
            None => resolve_pack_budget(None, policy, weight)?,
        };

        if let Some(declaration) = self.declarations.context(name) {
            return self.render_nested(declaration, ctx, cap, policy, tighten);
        }

        let declaration = self
            .declarations
            .retriever(name)
            .ok_or_else(|| AssemblyError::UnknownPack(name.to_string()))?;

        if cap == Some(0) {
            debug!(pack = name, "pack allocated no tokens, skipping retrieval");
            return Ok(ContextPack::empty());
        }

        let request = build_request(name, declaration, self.declarations, ctx, cap, tighten)?;
        let expansion = policy.map(|p| p.expansion).unwrap_or_default();
        let plan = ExpansionPlan::new(&expansion, request.maximum_total_characters);

        debug!(
            pack = name,
            limit = request.limit,
            max_chars = ?request.maximum_total_characters,
            tighten,
            "rendering retrieval pack"
        );
        let expanded = expand(self.retriever, request, &plan)?;
        Ok(expanded.pack)
    }
}
