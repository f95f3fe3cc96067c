use anyhow::{Context, Result};
use htmd::HtmlToMarkdown;

use crate::content::{Block, Node, escape_attr, to_html};

/// HTML to target-markup conversion.
pub trait MarkupSerializer {
    fn serialize(&self, html: &str) -> Result<String>;
}

pub struct HtmdSerializer {
    converter: HtmlToMarkdown,
}

impl HtmdSerializer {
    pub fn new() -> Self {
        Self {
            converter: HtmlToMarkdown::builder()
                .skip_tags(vec!["script", "style", "meta", "noscript"])
                .build(),
        }
    }
}

impl Default for HtmdSerializer {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkupSerializer for HtmdSerializer {
    fn serialize(&self, html: &str) -> Result<String> {
        self.converter
            .convert(html)
            .context("failed to convert page HTML to markup")
    }
}

/// Runs the serializer over a node list while keeping raw target markup and
/// custom blocks out of its reach.
///
/// Raw nodes and blocks are swapped for alphanumeric tokens before
/// serialization and swapped back afterwards. Block bodies go through the
/// adapter on their own first, so nested blocks work.
pub struct SerializationAdapter<'a> {
    serializer: &'a dyn MarkupSerializer,
}

impl<'a> SerializationAdapter<'a> {
    pub fn new(serializer: &'a dyn MarkupSerializer) -> Self {
        Self { serializer }
    }

    pub fn render(&self, nodes: &[Node]) -> Result<String> {
        let prefix = token_prefix(&to_html(nodes));
        let mut stash = Vec::new();
        let prepared = self.prepare(nodes, &prefix, &mut stash)?;
        let serialized = self.serializer.serialize(&to_html(&prepared))?;
        Ok(restore(serialized, &prefix, &stash))
    }

    fn prepare(&self, nodes: &[Node], prefix: &str, stash: &mut Vec<String>) -> Result<Vec<Node>> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Raw(raw) => {
                    out.push(Node::text(placeholder(prefix, stash.len())));
                    stash.push(raw.clone());
                }
                Node::Block(block) => {
                    let body = self.render(&block.children)?;
                    out.push(Node::element(
                        "p",
                        vec![Node::text(placeholder(prefix, stash.len()))],
                    ));
                    stash.push(render_block(block, body.trim()));
                }
                Node::Element(element) => {
                    let mut element = element.clone();
                    element.children = self.prepare(&element.children, prefix, stash)?;
                    out.push(Node::Element(element));
                }
                Node::Text(_) => out.push(node.clone()),
            }
        }
        Ok(out)
    }
}

/// A token prefix that occurs nowhere in the fragment, so body text that
/// happens to look like a token is never swapped.
fn token_prefix(source: &str) -> String {
    let mut prefix = String::from("WMTOKEN");
    while source.contains(&prefix) {
        prefix.push('Q');
    }
    prefix
}

fn placeholder(prefix: &str, index: usize) -> String {
    format!("{prefix}{index}X")
}

fn restore(mut text: String, prefix: &str, stash: &[String]) -> String {
    for (index, markup) in stash.iter().enumerate() {
        text = text.replace(&placeholder(prefix, index), markup);
    }
    text
}

/// `<panel title="..." type="...">body</panel>`, `<row>`, `<col lg="N">`.
fn render_block(block: &Block, body: &str) -> String {
    let tag = block.kind.tag();
    let attrs: String = block
        .attrs
        .iter()
        .map(|(key, value)| format!(" {key}=\"{}\"", escape_attr(value)))
        .collect();
    if body.is_empty() {
        format!("<{tag}{attrs}></{tag}>")
    } else {
        format!("<{tag}{attrs}>\n{body}\n</{tag}>")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::{BlockKind, Element};

    /// Echoes the HTML so tests can see exactly what the adapter hands over.
    struct Echo;

    impl MarkupSerializer for Echo {
        fn serialize(&self, html: &str) -> Result<String> {
            Ok(html.to_string())
        }
    }

    #[test]
    fn raw_markup_is_hidden_from_the_serializer() {
        let nodes = vec![Node::element(
            "p",
            vec![Node::text("see "), Node::raw("[[:oldwiki:a|<A>]]")],
        )];
        let adapter = SerializationAdapter::new(&Echo);
        let mut stash = Vec::new();
        let prepared = adapter
            .prepare(&nodes, "WMTOKEN", &mut stash)
            .expect("prepare");
        assert_eq!(to_html(&prepared), "<p>see WMTOKEN0X</p>");
        assert_eq!(
            adapter.render(&nodes).expect("render"),
            "<p>see [[:oldwiki:a|<A>]]</p>"
        );
    }

    #[test]
    fn token_like_body_text_is_left_alone() {
        let nodes = vec![Node::element(
            "p",
            vec![
                Node::text("literal WMTOKEN0X here "),
                Node::raw("[[x|y]]"),
            ],
        )];
        assert_eq!(token_prefix(&to_html(&nodes)), "WMTOKENQ");
        let rendered = SerializationAdapter::new(&Echo)
            .render(&nodes)
            .expect("render");
        assert_eq!(rendered, "<p>literal WMTOKEN0X here [[x|y]]</p>");
    }

    #[test]
    fn panels_keep_their_attributes() {
        let panel = Block::new(BlockKind::Panel, vec![Node::element("p", vec![Node::text("Body")])])
            .with_attr("title", "Say \"hi\"")
            .with_attr("type", "info");
        let rendered = SerializationAdapter::new(&Echo)
            .render(&[Node::Block(panel)])
            .expect("render");
        assert_eq!(
            rendered,
            "<p><panel title=\"Say &quot;hi&quot;\" type=\"info\">\n<p>Body</p>\n</panel></p>"
        );
    }

    #[test]
    fn nested_layout_blocks_render_inside_out() {
        let column = Block::new(BlockKind::Column, vec![Node::text("cell")]).with_attr("lg", "6");
        let row = Block::new(BlockKind::Row, vec![Node::Block(column)]);
        let rendered = SerializationAdapter::new(&Echo)
            .render(&[Node::Block(row)])
            .expect("render");
        assert_eq!(
            rendered,
            "<p><row>\n<p><col lg=\"6\">\ncell\n</col></p>\n</row></p>"
        );
    }

    #[test]
    fn htmd_serializer_produces_markup_around_blocks() {
        let serializer = HtmdSerializer::new();
        let nodes = vec![
            Node::element("h1", vec![Node::text("Intro")]),
            Node::Block(
                Block::new(
                    BlockKind::Panel,
                    vec![Node::Element(
                        Element::new("p").with_children(vec![Node::text("Careful")]),
                    )],
                )
                .with_attr("title", "Note")
                .with_attr("type", "default"),
            ),
        ];
        let rendered = SerializationAdapter::new(&serializer)
            .render(&nodes)
            .expect("render");
        assert!(rendered.contains("# Intro"));
        assert!(rendered.contains("<panel title=\"Note\" type=\"default\">\nCareful\n</panel>"));
    }
}
