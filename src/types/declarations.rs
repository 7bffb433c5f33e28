use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::types::error::{AssemblyError, Result};

/// A token ceiling expressed either absolutely or as a share of the input
/// budget. Exactly one of the two must be set.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Budget {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
}

/// The input budget shares its shape with per-pack overrides.
pub type InputBudget = Budget;

impl Budget {
    pub fn tokens(max_tokens: usize) -> Self {
        Self {
            ratio: None,
            max_tokens: Some(max_tokens),
        }
    }

    pub fn ratio(ratio: f64) -> Self {
        Self {
            ratio: Some(ratio),
            max_tokens: None,
        }
    }

    pub fn validate(&self, what: &str) -> Result<()> {
        if self.ratio.is_some() == self.max_tokens.is_some() {
            return Err(AssemblyError::InvalidBudget(what.to_string()));
        }
        if let Some(ratio) = self.ratio {
            if !ratio.is_finite() || ratio < 0.0 {
                return Err(AssemblyError::InvalidPolicy(format!(
                    "{what}.ratio must be a non-negative number, got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct PackBudgetPolicy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub default_max_tokens: Option<usize>,
}

impl PackBudgetPolicy {
    pub fn validate(&self) -> Result<()> {
        if self.default_ratio.is_some() == self.default_max_tokens.is_some() {
            return Err(AssemblyError::InvalidBudget("pack_budget".to_string()));
        }
        if let Some(ratio) = self.default_ratio {
            if !ratio.is_finite() || ratio < 0.0 {
                return Err(AssemblyError::InvalidPolicy(format!(
                    "pack_budget.default_ratio must be a non-negative number, got {ratio}"
                )));
            }
        }
        Ok(())
    }
}

/// What to do when assembled content exceeds the input budget.
///
/// Only `compact` shrinks content; any other value tolerates the overflow.
/// A policy without an overflow mode tolerates it as well.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OverflowMode {
    Compact,
    Tolerate(String),
}

impl From<String> for OverflowMode {
    fn from(value: String) -> Self {
        if value == "compact" {
            OverflowMode::Compact
        } else {
            OverflowMode::Tolerate(value)
        }
    }
}

impl From<&str> for OverflowMode {
    fn from(value: &str) -> Self {
        OverflowMode::from(value.to_string())
    }
}

impl From<OverflowMode> for String {
    fn from(mode: OverflowMode) -> Self {
        match mode {
            OverflowMode::Compact => "compact".to_string(),
            OverflowMode::Tolerate(other) => other,
        }
    }
}

/// Inline compactor configuration, e.g. `{"type": "summary"}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactorConfig {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(flatten)]
    pub options: Map<String, Value>,
}

/// A policy names a registered compactor or configures one inline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum CompactorRef {
    Named(String),
    Inline(CompactorConfig),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Expansion {
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,
    #[serde(default = "default_min_fill_ratio")]
    pub min_fill_ratio: f64,
}

fn default_max_pages() -> usize {
    1
}

fn default_min_fill_ratio() -> f64 {
    1.0
}

impl Default for Expansion {
    fn default() -> Self {
        Self {
            max_pages: default_max_pages(),
            min_fill_ratio: default_min_fill_ratio(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_budget: Option<InputBudget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pack_budget: Option<PackBudgetPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub overflow: Option<OverflowMode>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub compactor: Option<CompactorRef>,
    #[serde(default = "default_max_iterations")]
    pub max_iterations: usize,
    #[serde(default)]
    pub expansion: Expansion,
}

fn default_max_iterations() -> usize {
    2
}

impl Default for Policy {
    fn default() -> Self {
        Self {
            input_budget: None,
            pack_budget: None,
            overflow: None,
            compactor: None,
            max_iterations: default_max_iterations(),
            expansion: Expansion::default(),
        }
    }
}

impl Policy {
    pub fn validate(&self) -> Result<()> {
        if let Some(budget) = &self.input_budget {
            budget.validate("input_budget")?;
        }
        if let Some(pack_budget) = &self.pack_budget {
            pack_budget.validate()?;
        }
        if self.max_iterations < 1 {
            return Err(AssemblyError::InvalidPolicy(
                "max_iterations must be at least 1".to_string(),
            ));
        }
        if self.expansion.max_pages < 1 {
            return Err(AssemblyError::InvalidPolicy(
                "expansion.max_pages must be at least 1".to_string(),
            ));
        }
        let fill = self.expansion.min_fill_ratio;
        if !(0.0..=1.0).contains(&fill) {
            return Err(AssemblyError::InvalidPolicy(format!(
                "expansion.min_fill_ratio must be within [0, 1], got {fill}"
            )));
        }
        Ok(())
    }

    pub fn input_max_tokens(&self) -> Option<usize> {
        self.input_budget.as_ref().and_then(|b| b.max_tokens)
    }

    pub fn compacts_on_overflow(&self) -> bool {
        self.overflow == Some(OverflowMode::Compact)
    }
}

/// Literal content or a template with directive-local variables. Exactly one.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ContentDirective {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub template: Option<String>,
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub vars: Map<String, Value>,
}

pub enum ContentSource<'a> {
    Literal(&'a str),
    Template(&'a str, &'a Map<String, Value>),
}

impl ContentDirective {
    pub fn literal(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            ..Self::default()
        }
    }

    pub fn template(template: impl Into<String>, vars: Map<String, Value>) -> Self {
        Self {
            content: None,
            template: Some(template.into()),
            vars,
        }
    }

    pub fn source(&self) -> Result<ContentSource<'_>> {
        match (&self.content, &self.template) {
            (Some(content), None) => Ok(ContentSource::Literal(content)),
            (None, Some(template)) => Ok(ContentSource::Template(template, &self.vars)),
            (Some(_), Some(_)) => Err(AssemblyError::InvalidDirective(
                "message declares both content and template".to_string(),
            )),
            (None, None) => Err(AssemblyError::InvalidDirective(
                "message declares neither content nor template".to_string(),
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextInsert {
    pub pack: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct HistoryInsert {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub marker: Option<String>,
}

/// One instruction in an explicit-mode message list.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MessageDirective {
    System(ContentDirective),
    User(ContentDirective),
    Assistant(ContentDirective),
    ContextInsert(ContextInsert),
    HistoryInsert(HistoryInsert),
}

impl MessageDirective {
    pub fn system(content: impl Into<String>) -> Self {
        MessageDirective::System(ContentDirective::literal(content))
    }

    pub fn user(content: impl Into<String>) -> Self {
        MessageDirective::User(ContentDirective::literal(content))
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        MessageDirective::Assistant(ContentDirective::literal(content))
    }

    pub fn context_insert(pack: impl Into<String>) -> Self {
        MessageDirective::ContextInsert(ContextInsert {
            pack: pack.into(),
            budget: None,
            weight: None,
            priority: None,
        })
    }

    pub fn history_insert() -> Self {
        MessageDirective::HistoryInsert(HistoryInsert::default())
    }
}

/// A default-mode entry naming a retriever or another context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PackReference {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub weight: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub budget: Option<Budget>,
}

impl PackReference {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            weight: None,
            priority: None,
            budget: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContextDeclaration {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy: Option<Policy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub messages: Option<Vec<MessageDirective>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub packs: Option<Vec<PackReference>>,
}

#[derive(Debug, Clone, Copy)]
pub enum ContextMode<'a> {
    Explicit(&'a [MessageDirective]),
    Default(&'a [PackReference]),
}

impl ContextDeclaration {
    pub fn explicit(name: impl Into<String>, messages: Vec<MessageDirective>) -> Self {
        Self {
            name: name.into(),
            policy: None,
            messages: Some(messages),
            packs: None,
        }
    }

    pub fn packs(name: impl Into<String>, packs: Vec<PackReference>) -> Self {
        Self {
            name: name.into(),
            policy: None,
            messages: None,
            packs: Some(packs),
        }
    }

    pub fn with_policy(mut self, policy: Policy) -> Self {
        self.policy = Some(policy);
        self
    }

    pub fn mode(&self) -> Result<ContextMode<'_>> {
        match (&self.messages, &self.packs) {
            (Some(messages), None) => Ok(ContextMode::Explicit(messages)),
            (None, Some(packs)) => Ok(ContextMode::Default(packs)),
            (Some(_), Some(_)) => Err(AssemblyError::AmbiguousMode(self.name.clone())),
            (None, None) => Err(AssemblyError::MissingMode(self.name.clone())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetrieverDeclaration {
    pub name: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl RetrieverDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }

    pub fn corpus(&self) -> Option<&str> {
        self.config.get("corpus").and_then(Value::as_str)
    }

    pub fn query_template(&self) -> Option<&str> {
        self.config.get("query").and_then(Value::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorpusDeclaration {
    pub name: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl CorpusDeclaration {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            config: Map::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.config.insert(key.into(), value.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompactorDeclaration {
    pub name: String,
    #[serde(flatten)]
    pub config: Map<String, Value>,
}

impl CompactorDeclaration {
    pub fn new(name: impl Into<String>, kind: impl Into<String>) -> Self {
        let mut config = Map::new();
        config.insert("type".to_string(), Value::String(kind.into()));
        Self {
            name: name.into(),
            config,
        }
    }

    pub fn kind(&self) -> Option<&str> {
        self.config.get("type").and_then(Value::as_str)
    }
}

/// Serialized shape of a declaration bundle: plain lists, keyed by name on load.
#[derive(Debug, Default, Deserialize)]
struct DeclarationDocument {
    #[serde(default)]
    contexts: Vec<ContextDeclaration>,
    #[serde(default)]
    retrievers: Vec<RetrieverDeclaration>,
    #[serde(default)]
    corpora: Vec<CorpusDeclaration>,
    #[serde(default)]
    compactors: Vec<CompactorDeclaration>,
}

/// Read-only, name-keyed registries consulted during assembly.
#[derive(Debug, Clone, Default)]
pub struct Declarations {
    pub contexts: BTreeMap<String, ContextDeclaration>,
    pub retrievers: BTreeMap<String, RetrieverDeclaration>,
    pub corpora: BTreeMap<String, CorpusDeclaration>,
    pub compactors: BTreeMap<String, CompactorDeclaration>,
}

impl Declarations {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build registries from `{contexts, retrievers, corpora, compactors}` lists.
    /// Later entries with a repeated name replace earlier ones.
    pub fn from_json(value: Value) -> std::result::Result<Self, serde_json::Error> {
        let doc: DeclarationDocument = serde_json::from_value(value)?;
        let mut declarations = Declarations::new();
        for context in doc.contexts {
            declarations = declarations.with_context(context);
        }
        for retriever in doc.retrievers {
            declarations = declarations.with_retriever(retriever);
        }
        for corpus in doc.corpora {
            declarations = declarations.with_corpus(corpus);
        }
        for compactor in doc.compactors {
            declarations = declarations.with_compactor(compactor);
        }
        Ok(declarations)
    }

    pub fn with_context(mut self, context: ContextDeclaration) -> Self {
        self.contexts.insert(context.name.clone(), context);
        self
    }

    pub fn with_retriever(mut self, retriever: RetrieverDeclaration) -> Self {
        self.retrievers.insert(retriever.name.clone(), retriever);
        self
    }

    pub fn with_corpus(mut self, corpus: CorpusDeclaration) -> Self {
        self.corpora.insert(corpus.name.clone(), corpus);
        self
    }

    pub fn with_compactor(mut self, compactor: CompactorDeclaration) -> Self {
        self.compactors.insert(compactor.name.clone(), compactor);
        self
    }

    pub fn context(&self, name: &str) -> Option<&ContextDeclaration> {
        self.contexts.get(name)
    }

    pub fn retriever(&self, name: &str) -> Option<&RetrieverDeclaration> {
        self.retrievers.get(name)
    }

    pub fn corpus(&self, name: &str) -> Option<&CorpusDeclaration> {
        self.corpora.get(name)
    }

    pub fn compactor(&self, name: &str) -> Option<&CompactorDeclaration> {
        self.compactors.get(name)
    }
}
