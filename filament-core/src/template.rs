//! Template Binder
//!
//! Pull-based `{{ expression }}` substitution. Nothing here reacts on its
//! own: callers decide when to [`refresh`](TemplateBinder::refresh).
//!
//! An expression is one or more alternatives separated by `||`. Each
//! alternative is a dot/bracket path into the context, a quoted string, or
//! a number. The first truthy alternative wins, otherwise the last one is
//! used. `null` and missing values render as the empty string, strings
//! render as-is, anything else as compact JSON.

use indexmap::IndexMap;
use parking_lot::Mutex;
use serde_json::Value;

use crate::dom::{Document, NodeId, NodeKind};
use crate::error::DomError;
use crate::reactive::Path;

const OPEN: &str = "{{";
const CLOSE: &str = "}}";

#[derive(Debug, Clone, PartialEq)]
enum Operand {
    Path(Path),
    Literal(Value),
    /// Unparseable; always evaluates to nothing.
    Invalid,
}

#[derive(Debug, Clone, PartialEq)]
enum Part {
    Text(String),
    Expr(Vec<Operand>),
}

/// A parsed template.
#[derive(Debug, Clone, PartialEq)]
pub struct Template {
    parts: Vec<Part>,
}

impl Template {
    /// Split `source` into literal text and `{{ }}` expressions. An
    /// unclosed `{{` stays literal.
    pub fn parse(source: &str) -> Self {
        let mut parts = Vec::new();
        let mut rest = source;

        while let Some(start) = rest.find(OPEN) {
            let after_open = &rest[start + OPEN.len()..];
            let Some(end) = after_open.find(CLOSE) else {
                break;
            };
            if start > 0 {
                parts.push(Part::Text(rest[..start].to_string()));
            }
            parts.push(Part::Expr(parse_expression(&after_open[..end])));
            rest = &after_open[end + CLOSE.len()..];
        }
        if !rest.is_empty() {
            parts.push(Part::Text(rest.to_string()));
        }

        Self { parts }
    }

    /// Whether the source contained any `{{ }}` tokens.
    pub fn has_expressions(&self) -> bool {
        self.parts.iter().any(|p| matches!(p, Part::Expr(_)))
    }

    /// Render against `context`. Missing paths render as empty text.
    pub fn render(&self, context: &Value) -> String {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                Part::Text(text) => out.push_str(text),
                Part::Expr(operands) => out.push_str(&display(evaluate(operands, context).as_ref())),
            }
        }
        out
    }
}

/// Render `template` against `context`.
pub fn render(template: &str, context: &Value) -> String {
    Template::parse(template).render(context)
}

fn parse_expression(source: &str) -> Vec<Operand> {
    source.split("||").map(|alt| parse_operand(alt.trim())).collect()
}

fn parse_operand(source: &str) -> Operand {
    let quoted = |q: char| source.len() >= 2 && source.starts_with(q) && source.ends_with(q);
    if quoted('"') || quoted('\'') {
        return Operand::Literal(Value::String(source[1..source.len() - 1].to_string()));
    }
    if let Ok(number) = source.parse::<serde_json::Number>() {
        return Operand::Literal(Value::Number(number));
    }
    match source {
        "true" => return Operand::Literal(Value::Bool(true)),
        "false" => return Operand::Literal(Value::Bool(false)),
        "null" => return Operand::Literal(Value::Null),
        _ => {}
    }
    match Path::parse(source) {
        Ok(path) if !path.is_root() => Operand::Path(path),
        Ok(_) => Operand::Invalid,
        Err(err) => {
            tracing::debug!(expression = source, error = %err, "invalid template expression");
            Operand::Invalid
        }
    }
}

fn lookup<'a>(operand: &'a Operand, context: &'a Value) -> Option<&'a Value> {
    match operand {
        Operand::Path(path) => crate::reactive::lookup(context, path),
        Operand::Literal(value) => Some(value),
        Operand::Invalid => None,
    }
}

fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0 && !f.is_nan()),
        Some(Value::String(s)) => !s.is_empty(),
        Some(_) => true,
    }
}

fn evaluate(operands: &[Operand], context: &Value) -> Option<Value> {
    let mut last = None;
    for operand in operands {
        let value = lookup(operand, context);
        if truthy(value) {
            return value.cloned();
        }
        last = value;
    }
    last.cloned()
}

fn display(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Where a bound template renders to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BindingTarget {
    Text(NodeId),
    Attribute(NodeId, String),
}

impl BindingTarget {
    pub fn node(&self) -> NodeId {
        match self {
            BindingTarget::Text(node) | BindingTarget::Attribute(node, _) => *node,
        }
    }
}

struct Binding {
    template: Template,
    rendered: Option<String>,
}

/// Remembers the templates found in a subtree and re-renders them on
/// demand.
pub struct TemplateBinder {
    document: Document,
    bindings: Mutex<IndexMap<BindingTarget, Binding>>,
}

impl TemplateBinder {
    pub fn new(document: Document) -> Self {
        Self {
            document,
            bindings: Mutex::new(IndexMap::new()),
        }
    }

    /// Record every text node and attribute under `root` (inclusive) that
    /// contains a `{{ }}` token. Returns the number of new bindings.
    ///
    /// Targets that are already bound keep their original template.
    pub fn bind(&self, root: NodeId) -> Result<usize, DomError> {
        let mut found = Vec::new();
        for node in std::iter::once(root).chain(self.document.descendants(root)) {
            match self.document.kind(node)? {
                NodeKind::Text => {
                    let data = self.document.text_content(node)?;
                    found.push((BindingTarget::Text(node), data));
                }
                NodeKind::Element => {
                    for (name, value) in self.document.attributes(node)? {
                        found.push((BindingTarget::Attribute(node, name), value));
                    }
                }
            }
        }

        let mut bindings = self.bindings.lock();
        let mut added = 0;
        for (target, source) in found {
            if bindings.contains_key(&target) {
                continue;
            }
            let template = Template::parse(&source);
            if template.has_expressions() {
                bindings.insert(target, Binding { template, rendered: None });
                added += 1;
            }
        }
        tracing::debug!(root = %root, added, total = bindings.len(), "templates bound");
        Ok(added)
    }

    /// Re-render every binding against `context` and write those whose
    /// output changed. Returns the number of writes.
    pub fn refresh(&self, context: &Value) -> usize {
        let writes: Vec<(BindingTarget, String)> = {
            let mut bindings = self.bindings.lock();
            bindings.retain(|target, _| self.document.exists(target.node()));
            bindings
                .iter_mut()
                .filter_map(|(target, binding)| {
                    let output = binding.template.render(context);
                    if binding.rendered.as_deref() == Some(output.as_str()) {
                        return None;
                    }
                    binding.rendered = Some(output.clone());
                    Some((target.clone(), output))
                })
                .collect()
        };

        let mut written = 0;
        for (target, output) in writes {
            let result = match &target {
                BindingTarget::Text(node) => self.document.set_text_data(*node, &output),
                BindingTarget::Attribute(node, name) => self.document.set_attribute(*node, name, &output),
            };
            match result {
                Ok(()) => written += 1,
                Err(err) => tracing::debug!(target = ?target, error = %err, "template write failed"),
            }
        }
        tracing::trace!(written, "templates refreshed");
        written
    }

    /// Forget every binding under `root` (inclusive). Returns how many were
    /// removed.
    pub fn unbind(&self, root: NodeId) -> usize {
        let mut bindings = self.bindings.lock();
        let before = bindings.len();
        bindings.retain(|target, _| {
            let node = target.node();
            self.document.exists(node) && !self.document.is_inclusive_ancestor(root, node)
        });
        before - bindings.len()
    }

    pub fn binding_count(&self) -> usize {
        self.bindings.lock().len()
    }

    pub fn targets(&self) -> Vec<BindingTarget> {
        self.bindings.lock().keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::EventLoop;
    use serde_json::json;

    #[test]
    fn renders_paths_and_literals() {
        let ctx = json!({"user": {"name": "Ada", "tags": ["a", "b"]}, "n": 3});
        assert_eq!(render("Hi {{ user.name }}!", &ctx), "Hi Ada!");
        assert_eq!(render("{{user.tags[1]}}", &ctx), "b");
        assert_eq!(render("{{ n }} items", &ctx), "3 items");
        assert_eq!(render("{{ user.tags }}", &ctx), r#"["a","b"]"#);
        assert_eq!(render("{{ 'x' }}{{ 2.5 }}", &ctx), "x2.5");
    }

    #[test]
    fn fallbacks_pick_first_truthy() {
        let ctx = json!({"empty": "", "zero": 0, "name": "n"});
        assert_eq!(render("{{ missing || 'anon' }}", &ctx), "anon");
        assert_eq!(render("{{ empty || zero || name }}", &ctx), "n");
        assert_eq!(render("{{ empty || zero }}", &ctx), "0");
        assert_eq!(render("{{ missing || nothing }}", &ctx), "");
    }

    #[test]
    fn malformed_tokens_render_literally_or_empty() {
        let ctx = json!({"a": 1});
        assert_eq!(render("open {{ a", &ctx), "open {{ a");
        assert_eq!(render("[{{ a.. }}]", &ctx), "[]");
        assert_eq!(render("no tokens", &ctx), "no tokens");
    }

    #[test]
    fn bind_and_refresh_write_only_changes() {
        let doc = Document::new(EventLoop::new());
        let root = doc.create_element("div");
        doc.set_inner_html(root, r#"<p title="{{ title }}">Hello {{ name }}</p><span>static</span>"#)
            .unwrap();
        let p = doc.query_selector(root, "p").unwrap().unwrap();

        let binder = TemplateBinder::new(doc.clone());
        assert_eq!(binder.bind(root).unwrap(), 2);
        assert_eq!(binder.bind(root).unwrap(), 0);

        assert_eq!(binder.refresh(&json!({"title": "t", "name": "Ada"})), 2);
        assert_eq!(doc.text_content(p).unwrap(), "Hello Ada");
        assert_eq!(doc.get_attribute(p, "title").unwrap().as_deref(), Some("t"));

        assert_eq!(binder.refresh(&json!({"title": "t", "name": "Bob"})), 1);
        assert_eq!(doc.text_content(p).unwrap(), "Hello Bob");
        assert_eq!(binder.refresh(&json!({"title": "t", "name": "Bob"})), 0);
    }

    #[test]
    fn unbind_and_removed_nodes() {
        let doc = Document::new(EventLoop::new());
        let root = doc.create_element("div");
        doc.set_inner_html(root, "<i>{{ a }}</i><b>{{ b }}</b>").unwrap();
        let i = doc.query_selector(root, "i").unwrap().unwrap();
        let b = doc.query_selector(root, "b").unwrap().unwrap();

        let binder = TemplateBinder::new(doc.clone());
        binder.bind(root).unwrap();
        assert_eq!(binder.unbind(i), 1);

        doc.destroy(b).unwrap();
        assert_eq!(binder.refresh(&json!({"a": 1, "b": 2})), 0);
        assert_eq!(binder.binding_count(), 0);
    }
}
