//! Selectors
//!
//! A small CSS selector engine covering what handler registration and event
//! delegation need:
//!
//! - type (`li`), universal (`*`), id (`#main`), class (`.item`)
//! - attribute presence and value tests: `[disabled]`, `[type=text]`,
//!   `[class~=a]`, `[href^=http]`, `[src$=.png]`, `[title*=x]`
//! - descendant (` `) and child (`>`) combinators
//! - selector lists (`a, button.primary`)
//!
//! Pseudo-classes are rejected at parse time.

use std::str::FromStr;

use crate::error::SelectorError;

use super::NodeId;

/// What the matcher needs to know about a node.
pub(crate) trait SelectorContext {
    /// Lowercase tag name, or `None` for non-elements.
    fn tag_name(&self, node: NodeId) -> Option<&str>;
    fn attribute(&self, node: NodeId, name: &str) -> Option<&str>;
    fn parent_element(&self, node: NodeId) -> Option<NodeId>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum AttrOp {
    Exists,
    Equals(String),
    Includes(String),
    Prefix(String),
    Suffix(String),
    Substring(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct AttrSelector {
    name: String,
    op: AttrOp,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
struct Compound {
    tag: Option<String>,
    id: Option<String>,
    classes: Vec<String>,
    attributes: Vec<AttrSelector>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Combinator {
    Descendant,
    Child,
}

/// One complex selector, stored right-to-left: `parts[0]` is the subject,
/// each following entry is joined to its predecessor by the combinator.
#[derive(Debug, Clone, PartialEq, Eq)]
struct Complex {
    subject: Compound,
    ancestors: Vec<(Combinator, Compound)>,
}

/// A parsed selector list.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Selector {
    source: String,
    alternatives: Vec<Complex>,
}

impl Selector {
    /// Parse a selector list.
    pub fn parse(source: &str) -> Result<Self, SelectorError> {
        let mut alternatives = Vec::new();
        for part in split_top_level(source) {
            let part = part.trim();
            if part.is_empty() {
                return Err(SelectorError::new(source, "empty selector in list"));
            }
            alternatives.push(parse_complex(source, part)?);
        }
        if alternatives.is_empty() {
            return Err(SelectorError::new(source, "empty selector"));
        }
        Ok(Self {
            source: source.trim().to_string(),
            alternatives,
        })
    }

    /// The selector text as given.
    pub fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches<C: SelectorContext>(&self, ctx: &C, node: NodeId) -> bool {
        ctx.tag_name(node).is_some()
            && self
                .alternatives
                .iter()
                .any(|complex| matches_complex(ctx, node, &complex.subject, &complex.ancestors))
    }
}

impl FromStr for Selector {
    type Err = SelectorError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl std::fmt::Display for Selector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.source)
    }
}

fn matches_complex<C: SelectorContext>(
    ctx: &C,
    node: NodeId,
    subject: &Compound,
    ancestors: &[(Combinator, Compound)],
) -> bool {
    if !matches_compound(ctx, node, subject) {
        return false;
    }
    let Some(((combinator, next), rest)) = ancestors.split_first() else {
        return true;
    };
    match combinator {
        Combinator::Child => ctx
            .parent_element(node)
            .is_some_and(|parent| matches_complex(ctx, parent, next, rest)),
        Combinator::Descendant => {
            let mut current = ctx.parent_element(node);
            while let Some(ancestor) = current {
                if matches_complex(ctx, ancestor, next, rest) {
                    return true;
                }
                current = ctx.parent_element(ancestor);
            }
            false
        }
    }
}

fn matches_compound<C: SelectorContext>(ctx: &C, node: NodeId, compound: &Compound) -> bool {
    let Some(tag) = ctx.tag_name(node) else {
        return false;
    };
    if compound.tag.as_deref().is_some_and(|want| want != tag) {
        return false;
    }
    if let Some(id) = &compound.id {
        if ctx.attribute(node, "id") != Some(id.as_str()) {
            return false;
        }
    }
    if !compound.classes.is_empty() {
        let class_attr = ctx.attribute(node, "class").unwrap_or("");
        let has_all = compound
            .classes
            .iter()
            .all(|want| class_attr.split_ascii_whitespace().any(|c| c == want));
        if !has_all {
            return false;
        }
    }
    compound.attributes.iter().all(|sel| {
        let Some(value) = ctx.attribute(node, &sel.name) else {
            return false;
        };
        match &sel.op {
            AttrOp::Exists => true,
            AttrOp::Equals(want) => value == want,
            AttrOp::Includes(want) => value.split_ascii_whitespace().any(|v| v == want),
            AttrOp::Prefix(want) => !want.is_empty() && value.starts_with(want.as_str()),
            AttrOp::Suffix(want) => !want.is_empty() && value.ends_with(want.as_str()),
            AttrOp::Substring(want) => !want.is_empty() && value.contains(want.as_str()),
        }
    })
}

/// Split on commas that are not inside `[...]`.
fn split_top_level(source: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut start = 0;
    for (i, ch) in source.char_indices() {
        match (quote, ch) {
            (Some(q), c) if c == q => quote = None,
            (Some(_), _) => {}
            (None, '"' | '\'') => quote = Some(ch),
            (None, '[') => depth += 1,
            (None, ']') => depth = depth.saturating_sub(1),
            (None, ',') if depth == 0 => {
                parts.push(&source[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    parts.push(&source[start..]);
    parts
}

fn is_ident_char(ch: char) -> bool {
    ch.is_alphanumeric() || ch == '-' || ch == '_'
}

fn parse_complex(source: &str, text: &str) -> Result<Complex, SelectorError> {
    let chars: Vec<char> = text.chars().collect();
    let mut pos = 0;
    let mut compounds: Vec<Compound> = Vec::new();
    let mut combinators: Vec<Combinator> = Vec::new();

    loop {
        let compound = parse_compound(source, &chars, &mut pos)?;
        compounds.push(compound);

        let mut saw_space = false;
        while pos < chars.len() && chars[pos].is_whitespace() {
            saw_space = true;
            pos += 1;
        }
        if pos >= chars.len() {
            break;
        }
        if chars[pos] == '>' {
            pos += 1;
            while pos < chars.len() && chars[pos].is_whitespace() {
                pos += 1;
            }
            combinators.push(Combinator::Child);
        } else if saw_space {
            combinators.push(Combinator::Descendant);
        } else {
            return Err(SelectorError::new(
                source,
                format!("unexpected `{}`", chars[pos]),
            ));
        }
        if pos >= chars.len() {
            return Err(SelectorError::new(source, "dangling combinator"));
        }
    }

    let mut compounds = compounds.into_iter().rev();
    let subject = compounds
        .next()
        .ok_or_else(|| SelectorError::new(source, "empty selector"))?;
    let ancestors = combinators.into_iter().rev().zip(compounds).collect();
    Ok(Complex { subject, ancestors })
}

fn parse_ident(chars: &[char], pos: &mut usize) -> String {
    let start = *pos;
    while *pos < chars.len() && is_ident_char(chars[*pos]) {
        *pos += 1;
    }
    chars[start..*pos].iter().collect()
}

fn parse_compound(source: &str, chars: &[char], pos: &mut usize) -> Result<Compound, SelectorError> {
    let mut compound = Compound::default();
    let start = *pos;

    if *pos < chars.len() && chars[*pos] == '*' {
        *pos += 1;
    } else if *pos < chars.len() && is_ident_char(chars[*pos]) {
        compound.tag = Some(parse_ident(chars, pos).to_ascii_lowercase());
    }

    while *pos < chars.len() {
        match chars[*pos] {
            '#' => {
                *pos += 1;
                let id = parse_ident(chars, pos);
                if id.is_empty() {
                    return Err(SelectorError::new(source, "empty id selector"));
                }
                compound.id = Some(id);
            }
            '.' => {
                *pos += 1;
                let class = parse_ident(chars, pos);
                if class.is_empty() {
                    return Err(SelectorError::new(source, "empty class selector"));
                }
                compound.classes.push(class);
            }
            '[' => {
                *pos += 1;
                compound.attributes.push(parse_attribute(source, chars, pos)?);
            }
            ':' => {
                return Err(SelectorError::new(source, "pseudo-classes are not supported"));
            }
            _ => break,
        }
    }

    if *pos == start {
        return Err(SelectorError::new(source, "expected a simple selector"));
    }
    Ok(compound)
}

fn parse_attribute(source: &str, chars: &[char], pos: &mut usize) -> Result<AttrSelector, SelectorError> {
    let skip_ws = |pos: &mut usize| {
        while *pos < chars.len() && chars[*pos].is_whitespace() {
            *pos += 1;
        }
    };

    skip_ws(pos);
    let name = parse_ident(chars, pos).to_ascii_lowercase();
    if name.is_empty() {
        return Err(SelectorError::new(source, "empty attribute name"));
    }
    skip_ws(pos);

    let op_char = match chars.get(*pos) {
        Some(']') => {
            *pos += 1;
            return Ok(AttrSelector { name, op: AttrOp::Exists });
        }
        Some('=') => {
            *pos += 1;
            '='
        }
        Some(&c @ ('~' | '^' | '$' | '*')) if chars.get(*pos + 1) == Some(&'=') => {
            *pos += 2;
            c
        }
        _ => return Err(SelectorError::new(source, "malformed attribute selector")),
    };

    skip_ws(pos);
    let value = match chars.get(*pos) {
        Some(&q @ ('"' | '\'')) => {
            *pos += 1;
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != q {
                *pos += 1;
            }
            if *pos >= chars.len() {
                return Err(SelectorError::new(source, "unterminated string"));
            }
            let value: String = chars[start..*pos].iter().collect();
            *pos += 1;
            value
        }
        _ => {
            let start = *pos;
            while *pos < chars.len() && chars[*pos] != ']' && !chars[*pos].is_whitespace() {
                *pos += 1;
            }
            chars[start..*pos].iter().collect()
        }
    };
    skip_ws(pos);
    if chars.get(*pos) != Some(&']') {
        return Err(SelectorError::new(source, "expected `]`"));
    }
    *pos += 1;

    let op = match op_char {
        '=' => AttrOp::Equals(value),
        '~' => AttrOp::Includes(value),
        '^' => AttrOp::Prefix(value),
        '$' => AttrOp::Suffix(value),
        _ => AttrOp::Substring(value),
    };
    Ok(AttrSelector { name, op })
}
