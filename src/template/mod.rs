//! Dot-path variable substitution for directive content and retrieval queries.
//!
//! Placeholders are written `{input.query}`. `{{` and `}}` render literal
//! braces and an unterminated `{` is copied through unchanged. Resolution never
//! fails: a path that does not lead anywhere renders as the empty string.
//!
//! Key contract of the ambient [`TemplateContext`]:
//! - `input.*`: per-call inputs. The assembler fills `input.message` and, when
//!   absent, `input.query` from the caller's user message.
//! - `context.<pack>`: text of each pack rendered earlier in the same call.
//! - anything else: caller-supplied keys, looked up at the top level.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TemplateContext {
    #[serde(default)]
    pub input: Map<String, Value>,
    #[serde(default)]
    pub context: Map<String, Value>,
    #[serde(default, flatten)]
    pub extra: Map<String, Value>,
}

impl TemplateContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_input(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.input.insert(key.into(), value.into());
        self
    }

    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }

    pub fn input_str(&self, key: &str) -> Option<&str> {
        self.input.get(key).and_then(Value::as_str)
    }

    /// Record a rendered pack so later directives can reference `context.<name>`.
    pub fn set_pack_text(&mut self, pack: &str, text: &str) {
        self.context
            .insert(pack.to_string(), Value::String(text.to_string()));
    }

    /// Seed `input.message` and `input.query` from the caller's user message
    /// without overwriting values the caller already provided.
    pub fn seed_user_message(&mut self, user_message: &str) {
        if user_message.is_empty() {
            return;
        }
        for key in ["message", "query"] {
            self.input
                .entry(key.to_string())
                .or_insert_with(|| Value::String(user_message.to_string()));
        }
    }
}

enum Node<'a> {
    Map(&'a Map<String, Value>),
    Value(&'a Value),
}

impl<'a> Node<'a> {
    fn child(self, segment: &str) -> Option<Node<'a>> {
        match self {
            Node::Map(map) => map.get(segment).map(Node::Value),
            Node::Value(Value::Object(map)) => map.get(segment).map(Node::Value),
            Node::Value(Value::Array(items)) => segment
                .parse::<usize>()
                .ok()
                .and_then(|i| items.get(i))
                .map(Node::Value),
            Node::Value(_) => None,
        }
    }

    fn render(&self) -> String {
        match self {
            Node::Map(map) => Value::Object((*map).clone()).to_string(),
            Node::Value(Value::Null) => String::new(),
            Node::Value(Value::String(s)) => s.clone(),
            Node::Value(other) => other.to_string(),
        }
    }
}

fn root<'a>(
    key: &str,
    vars: &'a Map<String, Value>,
    ctx: &'a TemplateContext,
) -> Option<Node<'a>> {
    if let Some(value) = vars.get(key) {
        return Some(Node::Value(value));
    }
    match key {
        "input" => Some(Node::Map(&ctx.input)),
        "context" => Some(Node::Map(&ctx.context)),
        _ => ctx.extra.get(key).map(Node::Value),
    }
}

/// Look up a single dot path. Directive `vars` shadow ambient keys.
pub fn lookup(path: &str, vars: &Map<String, Value>, ctx: &TemplateContext) -> String {
    let mut segments = path.split('.').map(str::trim);
    let Some(first) = segments.next().filter(|s| !s.is_empty()) else {
        return String::new();
    };

    let mut node = match root(first, vars, ctx) {
        Some(node) => node,
        None => return String::new(),
    };
    for segment in segments {
        node = match node.child(segment) {
            Some(next) => next,
            None => return String::new(),
        };
    }
    node.render()
}

/// Substitute every `{dot.path}` placeholder in `template`.
pub fn resolve(template: &str, vars: &Map<String, Value>, ctx: &TemplateContext) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;

    while let Some(pos) = rest.find(|c: char| c == '{' || c == '}') {
        out.push_str(&rest[..pos]);
        let tail = &rest[pos..];

        if let Some(after) = tail.strip_prefix("{{") {
            out.push('{');
            rest = after;
        } else if let Some(after) = tail.strip_prefix("}}") {
            out.push('}');
            rest = after;
        } else if let Some(after) = tail.strip_prefix('}') {
            out.push('}');
            rest = after;
        } else {
            let body = &tail[1..];
            match body.find(|c: char| c == '{' || c == '}') {
                Some(end) if body[end..].starts_with('}') => {
                    out.push_str(&lookup(&body[..end], vars, ctx));
                    rest = &body[end + 1..];
                }
                _ => {
                    out.push('{');
                    rest = body;
                }
            }
        }
    }

    out.push_str(rest);
    out
}
