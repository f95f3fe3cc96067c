use std::sync::OnceLock;

use regex::{Captures, Regex};
use roxmltree::Document;

pub const AC_NAMESPACE: &str = "http://atlassian.com/content";
pub const RI_NAMESPACE: &str = "http://atlassian.com/resource/identifier";
pub const AT_NAMESPACE: &str = "http://atlassian.com/template";

const WRAPPER_TAG: &str = "wikimigrate-body";
const CDATA_OPEN: &str = "<![CDATA[";
const CDATA_CLOSE: &str = "]]>";

const VOID_ELEMENTS: &[&str] = &[
    "area", "base", "br", "col", "embed", "hr", "img", "input", "link", "meta", "source", "track",
    "wbr",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Node {
    Element(Element),
    Text(String),
    /// Target markup that must reach the output verbatim.
    Raw(String),
    Block(Block),
}

impl Node {
    pub fn text(value: impl Into<String>) -> Self {
        Self::Text(value.into())
    }

    pub fn raw(value: impl Into<String>) -> Self {
        Self::Raw(value.into())
    }

    pub fn element(name: &str, children: Vec<Node>) -> Self {
        Self::Element(Element::new(name).with_children(children))
    }

    pub fn as_element(&self) -> Option<&Element> {
        match self {
            Self::Element(element) => Some(element),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Element {
    pub name: String,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Element {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            attrs: Vec::new(),
            children: Vec::new(),
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.push((name.to_string(), value.into()));
        self
    }

    pub fn with_children(mut self, children: Vec<Node>) -> Self {
        self.children = children;
        self
    }

    pub fn is(&self, name: &str) -> bool {
        self.name == name
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }

    /// First direct child element with the given name.
    pub fn child(&self, name: &str) -> Option<&Element> {
        self.child_elements().find(|child| child.is(name))
    }

    pub fn child_elements(&self) -> impl Iterator<Item = &Element> {
        self.children.iter().filter_map(Node::as_element)
    }

    /// First descendant element with the given name, in pre-order.
    pub fn find(&self, name: &str) -> Option<&Element> {
        for child in self.child_elements() {
            if child.is(name) {
                return Some(child);
            }
            if let Some(found) = child.find(name) {
                return Some(found);
            }
        }
        None
    }

    /// Concatenated text of all descendants.
    pub fn text_content(&self) -> String {
        let mut out = String::new();
        collect_text(&self.children, &mut out);
        out
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    Panel,
    Row,
    Column,
}

impl BlockKind {
    pub fn tag(self) -> &'static str {
        match self {
            Self::Panel => "panel",
            Self::Row => "row",
            Self::Column => "col",
        }
    }
}

/// The custom block construct that survives serialization with its attributes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block {
    pub kind: BlockKind,
    pub attrs: Vec<(String, String)>,
    pub children: Vec<Node>,
}

impl Block {
    pub fn new(kind: BlockKind, children: Vec<Node>) -> Self {
        Self {
            kind,
            attrs: Vec::new(),
            children,
        }
    }

    pub fn with_attr(mut self, name: &str, value: impl Into<String>) -> Self {
        self.attrs.push((name.to_string(), value.into()));
        self
    }

    pub fn attr(&self, name: &str) -> Option<&str> {
        self.attrs
            .iter()
            .find(|(key, _)| key == name)
            .map(|(_, value)| value.as_str())
    }
}

/// `<ul>` with one `<li>` per item.
pub fn bullet_list(items: Vec<Node>) -> Node {
    Node::element(
        "ul",
        items
            .into_iter()
            .map(|item| Node::element("li", vec![item]))
            .collect(),
    )
}

fn collect_text(nodes: &[Node], out: &mut String) {
    for node in nodes {
        match node {
            Node::Text(text) => out.push_str(text),
            Node::Element(element) => collect_text(&element.children, out),
            Node::Block(block) => collect_text(&block.children, out),
            Node::Raw(_) => {}
        }
    }
}

/// Parse a storage-format body into a node list.
pub fn parse_storage(markup: &str) -> Result<Vec<Node>, String> {
    let preprocessed = replace_named_entities(markup);
    let wrapped = format!(
        "<{WRAPPER_TAG} xmlns:ac=\"{AC_NAMESPACE}\" xmlns:ri=\"{RI_NAMESPACE}\" xmlns:at=\"{AT_NAMESPACE}\">{preprocessed}</{WRAPPER_TAG}>"
    );
    let document = Document::parse(&wrapped).map_err(|err| err.to_string())?;
    Ok(document
        .root_element()
        .children()
        .filter_map(convert_node)
        .collect())
}

fn convert_node(node: roxmltree::Node) -> Option<Node> {
    if node.is_text() {
        return node.text().map(Node::text);
    }
    if !node.is_element() {
        return None;
    }
    let tag = node.tag_name();
    Some(Node::Element(Element {
        name: qualified_name(tag.namespace(), tag.name()),
        attrs: node
            .attributes()
            .map(|attr| {
                (
                    qualified_name(attr.namespace(), attr.name()),
                    attr.value().to_string(),
                )
            })
            .collect(),
        children: node.children().filter_map(convert_node).collect(),
    }))
}

fn qualified_name(namespace: Option<&str>, local: &str) -> String {
    match namespace {
        Some(AC_NAMESPACE) => format!("ac:{local}"),
        Some(RI_NAMESPACE) => format!("ri:{local}"),
        Some(AT_NAMESPACE) => format!("at:{local}"),
        _ => local.to_string(),
    }
}

/// XML only knows five named entities; rewrite the HTML ones as numeric references
/// and escape unknown ones so they stay visible as text. CDATA sections are copied as is.
fn replace_named_entities(markup: &str) -> String {
    let mut out = String::with_capacity(markup.len());
    let mut rest = markup;
    while let Some(start) = rest.find(CDATA_OPEN) {
        out.push_str(&rewrite_entities(&rest[..start]));
        let section = &rest[start..];
        let end = section
            .find(CDATA_CLOSE)
            .map_or(section.len(), |end| end + CDATA_CLOSE.len());
        out.push_str(&section[..end]);
        rest = &section[end..];
    }
    out.push_str(&rewrite_entities(rest));
    out
}

fn rewrite_entities(markup: &str) -> String {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern =
        PATTERN.get_or_init(|| Regex::new(r"&([A-Za-z][A-Za-z0-9]*);").expect("valid entity pattern"));
    pattern
        .replace_all(markup, |caps: &Captures| {
            let name = &caps[1];
            match name {
                "amp" | "lt" | "gt" | "quot" | "apos" => caps[0].to_string(),
                _ => match html_entity(name) {
                    Some(code) => format!("&#{code};"),
                    None => format!("&amp;{name};"),
                },
            }
        })
        .into_owned()
}

fn html_entity(name: &str) -> Option<u32> {
    let code = match name {
        "nbsp" => 160,
        "iexcl" => 161,
        "cent" => 162,
        "pound" => 163,
        "yen" => 165,
        "sect" => 167,
        "copy" => 169,
        "laquo" => 171,
        "reg" => 174,
        "deg" => 176,
        "plusmn" => 177,
        "sup2" => 178,
        "sup3" => 179,
        "micro" => 181,
        "para" => 182,
        "middot" => 183,
        "raquo" => 187,
        "frac14" => 188,
        "frac12" => 189,
        "frac34" => 190,
        "iquest" => 191,
        "Auml" => 196,
        "Ouml" => 214,
        "times" => 215,
        "Uuml" => 220,
        "szlig" => 223,
        "agrave" => 224,
        "aacute" => 225,
        "auml" => 228,
        "ccedil" => 231,
        "egrave" => 232,
        "eacute" => 233,
        "ouml" => 246,
        "divide" => 247,
        "uuml" => 252,
        "ndash" => 8211,
        "mdash" => 8212,
        "lsquo" => 8216,
        "rsquo" => 8217,
        "sbquo" => 8218,
        "ldquo" => 8220,
        "rdquo" => 8221,
        "bdquo" => 8222,
        "dagger" => 8224,
        "bull" => 8226,
        "hellip" => 8230,
        "prime" => 8242,
        "euro" => 8364,
        "trade" => 8482,
        "larr" => 8592,
        "uarr" => 8593,
        "rarr" => 8594,
        "darr" => 8595,
        "harr" => 8596,
        "rArr" => 8658,
        "hArr" => 8660,
        "minus" => 8722,
        "le" => 8804,
        "ge" => 8805,
        "ne" => 8800,
        "zwj" => 8205,
        "zwnj" => 8204,
        "thinsp" => 8201,
        "ensp" => 8194,
        "emsp" => 8195,
        _ => return None,
    };
    Some(code)
}

/// Render a node list back to HTML.
pub fn to_html(nodes: &[Node]) -> String {
    let mut out = String::new();
    for node in nodes {
        write_node(&mut out, node);
    }
    out
}

fn write_node(out: &mut String, node: &Node) {
    match node {
        Node::Text(text) => out.push_str(&escape_text(text)),
        Node::Raw(raw) => out.push_str(raw),
        Node::Element(element) => {
            write_open_tag(out, &element.name, &element.attrs);
            if element.children.is_empty() && VOID_ELEMENTS.contains(&element.name.as_str()) {
                return;
            }
            for child in &element.children {
                write_node(out, child);
            }
            out.push_str(&format!("</{}>", element.name));
        }
        Node::Block(block) => {
            write_open_tag(out, block.kind.tag(), &block.attrs);
            for child in &block.children {
                write_node(out, child);
            }
            out.push_str(&format!("</{}>", block.kind.tag()));
        }
    }
}

fn write_open_tag(out: &mut String, name: &str, attrs: &[(String, String)]) {
    out.push('<');
    out.push_str(name);
    for (key, value) in attrs {
        out.push_str(&format!(" {key}=\"{}\"", escape_attr(value)));
    }
    out.push('>');
}

pub fn escape_text(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}

pub fn escape_attr(value: &str) -> String {
    escape_text(value).replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_namespaced_macros() {
        let nodes = parse_storage(
            r#"<p>Hi</p><ac:structured-macro ac:name="code"><ac:parameter ac:name="language">rust</ac:parameter><ac:plain-text-body><![CDATA[fn main() {}]]></ac:plain-text-body></ac:structured-macro>"#,
        )
        .expect("parse");
        assert_eq!(nodes.len(), 2);
        let macro_element = nodes[1].as_element().expect("element");
        assert_eq!(macro_element.name, "ac:structured-macro");
        assert_eq!(macro_element.attr("ac:name"), Some("code"));
        let body = macro_element.child("ac:plain-text-body").expect("body");
        assert_eq!(body.text_content(), "fn main() {}");
        assert_eq!(
            macro_element
                .find("ac:parameter")
                .and_then(|param| param.attr("ac:name")),
            Some("language")
        );
    }

    #[test]
    fn html_entities_are_decoded() {
        let nodes = parse_storage("<p>a&nbsp;b &mdash; c &amp; d &bogus;</p>").expect("parse");
        let paragraph = nodes[0].as_element().expect("p");
        assert_eq!(
            paragraph.text_content(),
            "a\u{a0}b \u{2014} c & d &bogus;"
        );
    }

    #[test]
    fn malformed_markup_is_reported() {
        assert!(parse_storage("<p>unclosed").is_err());
    }

    #[test]
    fn to_html_escapes_and_keeps_structure() {
        let nodes = vec![
            Node::Element(
                Element::new("a")
                    .with_attr("href", "x?a=1&b=\"2\"")
                    .with_children(vec![Node::text("1 < 2")]),
            ),
            Node::element("br", Vec::new()),
            Node::Element(Element::new("ac:emoticon").with_attr("ac:name", "smile")),
        ];
        assert_eq!(
            to_html(&nodes),
            "<a href=\"x?a=1&amp;b=&quot;2&quot;\">1 &lt; 2</a><br><ac:emoticon ac:name=\"smile\"></ac:emoticon>"
        );
    }

    #[test]
    fn storage_round_trips_through_html() {
        let source = r#"<p>Text <ac:link><ri:page ri:content-title="Home" /></ac:link></p>"#;
        let nodes = parse_storage(source).expect("parse");
        assert_eq!(
            to_html(&nodes),
            r#"<p>Text <ac:link><ri:page ri:content-title="Home"></ri:page></ac:link></p>"#
        );
    }
}
