//! HTML fragments.
//!
//! Fragment parsing for `set_inner_html` goes through `scraper`'s html5ever
//! tree builder, so malformed markup is recovered the way a browser would.
//! Comments are dropped. The escape helpers serve `inner_html` and
//! `outer_html`.

use scraper::{ElementRef, Html, Node};

/// A parsed fragment node, not yet inserted into a document.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) enum Fragment {
    Element {
        tag: String,
        attributes: Vec<(String, String)>,
        children: Vec<Fragment>,
    },
    Text(String),
}

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

pub(crate) fn is_void(tag: &str) -> bool {
    VOID_ELEMENTS.contains(&tag)
}

/// Parse an HTML fragment in a `<body>` context.
pub(crate) fn parse_fragment(input: &str) -> Vec<Fragment> {
    let parsed = Html::parse_fragment(input);
    convert_children(parsed.root_element())
}

fn convert_children(parent: ElementRef<'_>) -> Vec<Fragment> {
    parent
        .children()
        .filter_map(|child| match child.value() {
            Node::Text(text) => Some(Fragment::Text(text.text.to_string())),
            Node::Element(_) => ElementRef::wrap(child).map(convert_element),
            _ => None,
        })
        .collect()
}

fn convert_element(element: ElementRef<'_>) -> Fragment {
    let data = element.value();
    Fragment::Element {
        tag: data.name().to_ascii_lowercase(),
        attributes: data
            .attrs()
            .map(|(name, value)| (name.to_string(), value.to_string()))
            .collect(),
        children: convert_children(element),
    }
}

pub(crate) fn escape_text(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            _ => out.push(ch),
        }
    }
    out
}

pub(crate) fn escape_attribute(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        match ch {
            '&' => out.push_str("&amp;"),
            '"' => out.push_str("&quot;"),
            _ => out.push(ch),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    fn el(tag: &str, attributes: &[(&str, &str)], children: Vec<Fragment>) -> Fragment {
        let mut attributes: Vec<(String, String)> = attributes
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        attributes.sort();
        Fragment::Element {
            tag: tag.to_string(),
            attributes,
            children,
        }
    }

    fn text(s: &str) -> Fragment {
        Fragment::Text(s.to_string())
    }

    // Attribute order is not part of the comparison.
    fn sorted(nodes: Vec<Fragment>) -> Vec<Fragment> {
        nodes
            .into_iter()
            .map(|node| match node {
                Fragment::Element {
                    tag,
                    mut attributes,
                    children,
                } => {
                    attributes.sort();
                    Fragment::Element {
                        tag,
                        attributes,
                        children: sorted(children),
                    }
                }
                text => text,
            })
            .collect()
    }

    #[test]
    fn parses_nested_elements_and_attributes() {
        let parsed = sorted(parse_fragment(r#"<P class="a b" id=x>Hi <b>there</b></p>tail"#));
        assert_eq!(
            parsed,
            vec![
                el(
                    "p",
                    &[("class", "a b"), ("id", "x")],
                    vec![text("Hi "), el("b", &[], vec![text("there")])]
                ),
                text("tail"),
            ]
        );
    }

    #[test]
    fn void_and_self_closing_elements_have_no_children() {
        let parsed = sorted(parse_fragment("<br><img src='a.png'/><input disabled>x"));
        assert_eq!(
            parsed,
            vec![
                el("br", &[], vec![]),
                el("img", &[("src", "a.png")], vec![]),
                el("input", &[("disabled", "")], vec![]),
                text("x"),
            ]
        );
    }

    #[test]
    fn malformed_markup_is_tolerated() {
        let parsed = parse_fragment("a < b</span><div>open");
        assert_eq!(
            parsed,
            vec![text("a < b"), el("div", &[], vec![text("open")])]
        );
    }

    #[test]
    fn comments_are_dropped() {
        assert_eq!(parse_fragment("x<!-- hidden -->y"), vec![text("x"), text("y")]);
    }

    #[test]
    fn entities_are_decoded() {
        assert_eq!(
            parse_fragment("a &amp; b &lt;c&gt; &#65;&#x42;"),
            vec![text("a & b <c> AB")]
        );
        assert_eq!(
            parse_fragment(r#"<a title="x &quot;y&quot;">t</a>"#),
            vec![el("a", &[("title", r#"x "y""#)], vec![text("t")])]
        );
    }

    #[test]
    fn misnested_tags_are_recovered() {
        let parsed = parse_fragment("<b>1<i>2</b>3</i>");
        let Fragment::Element { tag, children, .. } = &parsed[0] else {
            panic!("expected an element, got {parsed:?}");
        };
        assert_eq!(tag, "b");
        assert_eq!(children[0], text("1"));
        assert!(matches!(&children[1], Fragment::Element { tag, .. } if tag == "i"));
        assert!(parsed.len() >= 2);
    }

    #[test]
    fn escaping() {
        assert_eq!(escape_text("<a & b>"), "&lt;a &amp; b&gt;");
        assert_eq!(escape_attribute(r#"say "hi" & go"#), "say &quot;hi&quot; &amp; go");
    }
}
