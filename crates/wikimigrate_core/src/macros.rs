use tracing::debug;

use crate::content::{Block, BlockKind, Element, Node, bullet_list, to_html};
use crate::error::{DiagnosticKind, Diagnostics};

pub const CHILD_LISTING_DIRECTIVE: &str = "{{pglist> files dirs}}";
pub const GALLERY_PLACEHOLDER: &str = "Insert Gallery Here";
pub const TASK_COMPLETE_MARKER: &str = "[COMPLETE] ";
const GRID_COLUMNS: f64 = 12.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MacroKind {
    Code,
    NoFormat,
    Toc,
    Children,
    Expand,
    Details,
    Anchor,
    Attachments,
    Info,
    Tip,
    Note,
    Warning,
    Danger,
    Panel,
    Status,
    Section,
    Column,
    Gallery,
    ViewFile,
    Unknown,
}

impl MacroKind {
    pub fn from_name(name: &str) -> Self {
        match name.trim().to_ascii_lowercase().as_str() {
            "code" => Self::Code,
            "noformat" => Self::NoFormat,
            "toc" => Self::Toc,
            "children" => Self::Children,
            "expand" => Self::Expand,
            "details" => Self::Details,
            "anchor" => Self::Anchor,
            "attachments" => Self::Attachments,
            "info" => Self::Info,
            "tip" => Self::Tip,
            "note" => Self::Note,
            "warning" => Self::Warning,
            "danger" => Self::Danger,
            "panel" => Self::Panel,
            "status" => Self::Status,
            "section" => Self::Section,
            "column" => Self::Column,
            "gallery" => Self::Gallery,
            "view-file" | "viewpdf" | "viewdoc" | "viewppt" | "viewxls" | "multimedia" => {
                Self::ViewFile
            }
            _ => Self::Unknown,
        }
    }

    /// Panel type and default title for the box macros.
    fn box_style(self) -> (&'static str, Option<&'static str>) {
        match self {
            Self::Info => ("info", None),
            Self::Tip => ("default", Some("tip")),
            Self::Note => ("default", Some("Note")),
            Self::Warning => ("warning", None),
            Self::Danger => ("danger", None),
            _ => ("default", None),
        }
    }
}

pub fn emoticon_symbol(name: &str) -> Option<&'static str> {
    let symbol = match name {
        "smile" => ":-)",
        "sad" => ":-(",
        "cheeky" => ":-p",
        "tongue" => ":-P",
        "laugh" => ":-D",
        "big grin" => "=)",
        "wink" => ";-)",
        "slightly_smiling_face" => ":-|",
        "information" => "ⓘ",
        "red-star" | "yellow-star" | "green-star" | "blue-star" => "٭",
        "minus" => "---",
        "tick" => "✓",
        "cross" => "❌",
        "question" => ":?:",
        "thumbs-up" => "👍",
        "thumbs-down" => "👎",
        "warning" => "⚠",
        "light-on" => "💡",
        "light-off" => "💡",
        "heart" => "❤",
        "broken-heart" => "💔",
        _ => return None,
    };
    Some(symbol)
}

/// `round(percent / 100 * 12)`, half-up, clamped to 1..=12 so every column keeps a width.
pub fn grid_width(percent: f64) -> u32 {
    let units = (percent / 100.0 * GRID_COLUMNS + 0.5).floor();
    units.clamp(1.0, GRID_COLUMNS) as u32
}

fn parse_percent(value: &str) -> Option<f64> {
    let trimmed = value.trim();
    let number = trimmed.strip_suffix('%').unwrap_or(trimmed).trim();
    number
        .parse::<f64>()
        .ok()
        .filter(|percent| percent.is_finite() && *percent > 0.0)
}

pub struct MacroExpander<'a> {
    diagnostics: &'a mut Diagnostics,
    attachment_index: Vec<Node>,
    index_rendered: bool,
}

impl<'a> MacroExpander<'a> {
    /// `attachment_index` holds one link per unreferenced attachment; it is
    /// rendered wherever the body places an attachments macro.
    pub fn new(diagnostics: &'a mut Diagnostics, attachment_index: Vec<Node>) -> Self {
        Self {
            diagnostics,
            attachment_index,
            index_rendered: false,
        }
    }

    pub fn index_rendered(&self) -> bool {
        self.index_rendered
    }

    pub fn expand(&mut self, nodes: Vec<Node>) -> Vec<Node> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Element(element) => out.extend(self.expand_element(element)),
                Node::Block(mut block) => {
                    block.children = self.expand(block.children);
                    out.push(Node::Block(block));
                }
                other => out.push(other),
            }
        }
        out
    }

    fn expand_element(&mut self, element: Element) -> Vec<Node> {
        match element.name.as_str() {
            "ac:structured-macro" | "ac:macro" => self.expand_macro(element),
            "ac:emoticon" => {
                vec![self.emoticon(element.attr("ac:name").unwrap_or_default())]
            }
            "img" if has_class(&element, "emoticon") => {
                let title = element.attr("title").unwrap_or_default();
                let name = title.trim_matches(['(', ')', ':']);
                vec![self.emoticon(name)]
            }
            "ac:task-list" => vec![self.task_list(element)],
            "ac:layout" => self.expand(element.children),
            "ac:layout-section" => {
                vec![Node::Block(Block::new(
                    BlockKind::Row,
                    self.expand(element.children),
                ))]
            }
            "ac:layout-cell" => {
                vec![Node::Block(Block::new(
                    BlockKind::Column,
                    self.expand(element.children),
                ))]
            }
            _ => {
                let Element {
                    name,
                    attrs,
                    children,
                } = element;
                vec![Node::Element(Element {
                    name,
                    attrs,
                    children: self.expand(children),
                })]
            }
        }
    }

    fn expand_macro(&mut self, element: Element) -> Vec<Node> {
        let name = element.attr("ac:name").unwrap_or_default().to_string();
        let kind = MacroKind::from_name(&name);
        debug!("page '{}': expanding macro {name}", self.diagnostics.page());

        match kind {
            MacroKind::Info
            | MacroKind::Tip
            | MacroKind::Note
            | MacroKind::Warning
            | MacroKind::Danger => {
                let (panel_type, default_title) = kind.box_style();
                let title =
                    parameter_text(&element, "title").or(default_title.map(str::to_string));
                vec![self.panel(&element, Some(panel_type), title)]
            }
            MacroKind::Code | MacroKind::NoFormat => self.code_block(element),
            MacroKind::Toc => Vec::new(),
            MacroKind::Children => vec![Node::raw(CHILD_LISTING_DIRECTIVE)],
            MacroKind::Expand | MacroKind::Details | MacroKind::Anchor => {
                self.rich_body(&element)
            }
            MacroKind::Attachments => {
                self.index_rendered = true;
                if self.attachment_index.is_empty() {
                    Vec::new()
                } else {
                    vec![bullet_list(self.attachment_index.clone())]
                }
            }
            MacroKind::Panel => {
                let title = parameter_text(&element, "title");
                vec![self.panel(&element, None, title)]
            }
            MacroKind::Status => {
                let colour = parameter_text(&element, "colour")
                    .or_else(|| parameter_text(&element, "color"))
                    .unwrap_or_default();
                let panel_type = match colour.to_ascii_lowercase().as_str() {
                    "green" => "success",
                    "red" => "danger",
                    "yellow" => "warning",
                    "blue" => "info",
                    _ => "default",
                };
                let mut block = Block::new(BlockKind::Panel, Vec::new());
                if let Some(title) = parameter_text(&element, "title") {
                    block = block.with_attr("title", title);
                }
                vec![Node::Block(block.with_attr("type", panel_type))]
            }
            MacroKind::Section => {
                vec![Node::Block(Block::new(BlockKind::Row, self.rich_body(&element)))]
            }
            MacroKind::Column => {
                let mut block = Block::new(BlockKind::Column, self.rich_body(&element));
                if let Some(width) = parameter_text(&element, "width") {
                    match parse_percent(&width) {
                        Some(percent) => {
                            block = block.with_attr("lg", grid_width(percent).to_string());
                        }
                        None => self.diagnostics.record(
                            DiagnosticKind::MalformedMacroParameter,
                            format!("column width {width:?}"),
                        ),
                    }
                }
                vec![Node::Block(block)]
            }
            MacroKind::Gallery => vec![Node::text(GALLERY_PLACEHOLDER)],
            MacroKind::ViewFile => {
                let linked = parameter(&element, "name")
                    .map(|param| param.children.clone())
                    .unwrap_or_default();
                if linked.is_empty() {
                    self.diagnostics.record(
                        DiagnosticKind::MissingMacroBody,
                        format!("{name} without attachment"),
                    );
                }
                vec![Node::element("p", linked)]
            }
            MacroKind::Unknown => {
                self.diagnostics.record(DiagnosticKind::UnknownMacro, name);
                let source = to_html(&[Node::Element(element)])
                    .replace('<', "&#60;")
                    .replace('>', "&#62;");
                let code = Element::new("code").with_children(vec![Node::raw(source)]);
                vec![Node::element("pre", vec![Node::Element(code)])]
            }
        }
    }

    fn code_block(&mut self, element: Element) -> Vec<Node> {
        let Some(body) = element.child("ac:plain-text-body") else {
            self.diagnostics.record(
                DiagnosticKind::MissingMacroBody,
                format!(
                    "{} macro has no plain-text body",
                    element.attr("ac:name").unwrap_or_default()
                ),
            );
            return vec![Node::Element(element)];
        };
        let mut code = Element::new("code");
        if let Some(language) = parameter_text(&element, "language") {
            code = code.with_attr("class", format!("language-{language}"));
        }
        let code = code.with_children(vec![Node::text(body.text_content())]);
        vec![Node::element("pre", vec![Node::Element(code)])]
    }

    fn rich_body(&mut self, element: &Element) -> Vec<Node> {
        element
            .child("ac:rich-text-body")
            .map(|body| self.expand(body.children.clone()))
            .unwrap_or_default()
    }

    fn panel(&mut self, element: &Element, panel_type: Option<&str>, title: Option<String>) -> Node {
        let mut block = Block::new(BlockKind::Panel, self.rich_body(element));
        if let Some(title) = title {
            block = block.with_attr("title", title);
        }
        if let Some(panel_type) = panel_type {
            block = block.with_attr("type", panel_type);
        }
        Node::Block(block)
    }

    fn emoticon(&mut self, name: &str) -> Node {
        match emoticon_symbol(name) {
            Some(symbol) => Node::text(symbol),
            None => {
                self.diagnostics
                    .record(DiagnosticKind::UnknownEmoticon, name.to_string());
                Node::text(format!(":{name}:"))
            }
        }
    }

    fn task_list(&mut self, element: Element) -> Node {
        let items = element
            .children
            .into_iter()
            .filter_map(|child| match child {
                Node::Element(task) if task.is("ac:task") => Some(self.task_item(task)),
                _ => None,
            })
            .collect();
        Node::element("ul", items)
    }

    fn task_item(&mut self, task: Element) -> Node {
        let complete = task
            .child("ac:task-status")
            .is_some_and(|status| status.text_content().trim() == "complete");
        let mut children = Vec::new();
        if complete {
            children.push(Node::text(TASK_COMPLETE_MARKER));
        }
        for child in task.children {
            match child {
                Node::Element(body) if body.is("ac:task-body") => {
                    children.extend(self.expand(body.children));
                }
                Node::Element(marker)
                    if marker.is("ac:task-id")
                        || marker.is("ac:task-status")
                        || marker.is("ac:task-uuid") => {}
                Node::Text(text) if text.trim().is_empty() => {}
                other => children.extend(self.expand(vec![other])),
            }
        }
        Node::element("li", children)
    }
}

fn has_class(element: &Element, class: &str) -> bool {
    element
        .attr("class")
        .is_some_and(|classes| classes.split_whitespace().any(|name| name == class))
}

fn parameter<'e>(element: &'e Element, name: &str) -> Option<&'e Element> {
    element
        .child_elements()
        .find(|child| child.is("ac:parameter") && child.attr("ac:name") == Some(name))
}

fn parameter_text(element: &Element, name: &str) -> Option<String> {
    parameter(element, name)
        .map(|param| param.text_content().trim().to_string())
        .filter(|value| !value.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::content::parse_storage;
    use crate::serialize::{HtmdSerializer, SerializationAdapter};

    fn expand(markup: &str) -> (Vec<Node>, Diagnostics) {
        let mut diagnostics = Diagnostics::for_page("Intro");
        let nodes = MacroExpander::new(&mut diagnostics, Vec::new())
            .expand(parse_storage(markup).expect("parse"));
        (nodes, diagnostics)
    }

    fn expand_html(markup: &str) -> String {
        to_html(&expand(markup).0)
    }

    #[test]
    fn code_macro_keeps_body_verbatim() {
        let html = expand_html(
            r#"<ac:structured-macro ac:name="code"><ac:parameter ac:name="language">xml</ac:parameter><ac:plain-text-body><![CDATA[<a href="x">b</a>]]></ac:plain-text-body></ac:structured-macro>"#,
        );
        assert_eq!(
            html,
            r#"<pre><code class="language-xml">&lt;a href="x"&gt;b&lt;/a&gt;</code></pre>"#
        );
    }

    #[test]
    fn code_macro_without_body_is_passed_through() {
        let (nodes, diagnostics) =
            expand(r#"<ac:structured-macro ac:name="noformat"></ac:structured-macro>"#);
        assert_eq!(diagnostics.count(DiagnosticKind::MissingMacroBody), 1);
        assert_eq!(
            nodes[0].as_element().map(|element| element.name.as_str()),
            Some("ac:structured-macro")
        );
    }

    #[test]
    fn unknown_macro_is_escaped_into_preformatted_text() {
        let (nodes, diagnostics) = expand(
            r#"<ac:structured-macro ac:name="jira"><ac:parameter ac:name="key">ABC-1</ac:parameter></ac:structured-macro>"#,
        );
        assert_eq!(diagnostics.count(DiagnosticKind::UnknownMacro), 1);
        let html = to_html(&nodes);
        assert!(html.starts_with("<pre><code>&#60;ac:structured-macro ac:name=\"jira\"&#62;"));
        assert!(html.contains("ABC-1"));
    }

    #[test]
    fn unknown_macro_stays_fenced_and_escaped_after_serialization() {
        let (nodes, _) = expand(
            r#"<p>Before</p><ac:structured-macro ac:name="jira"><ac:parameter ac:name="key">ABC-1</ac:parameter></ac:structured-macro>"#,
        );
        let serializer = HtmdSerializer::new();
        let text = SerializationAdapter::new(&serializer)
            .render(&nodes)
            .expect("render");
        assert!(text.contains("```"), "{text}");
        assert!(
            text.contains("&#60;ac:structured-macro ac:name=\"jira\"&#62;"),
            "{text}"
        );
        assert!(text.contains("ABC-1"), "{text}");
        assert!(!text.contains("<ac:"), "{text}");
    }

    #[test]
    fn code_body_entities_are_kept_verbatim() {
        let (nodes, _) = expand(
            r#"<p>a&nbsp;b</p><ac:structured-macro ac:name="code"><ac:plain-text-body><![CDATA[x&nbsp;y &copy; &bogus; &amp;]]></ac:plain-text-body></ac:structured-macro>"#,
        );
        let code = nodes[1]
            .as_element()
            .and_then(|pre| pre.child("code"))
            .map(|code| code.text_content())
            .expect("code block");
        assert_eq!(code, "x&nbsp;y &copy; &bogus; &amp;");
        assert_eq!(to_html(&nodes[..1]), "<p>a\u{a0}b</p>");
    }

    #[test]
    fn toc_is_elided_and_children_become_directive() {
        let html = expand_html(
            r#"<ac:structured-macro ac:name="toc" /><ac:structured-macro ac:name="children" />"#,
        );
        assert_eq!(html, "{{pglist> files dirs}}");
    }

    #[test]
    fn expand_is_replaced_by_its_processed_body() {
        let html = expand_html(
            r#"<ac:structured-macro ac:name="expand"><ac:rich-text-body><p>Hidden <ac:emoticon ac:name="tick" /></p></ac:rich-text-body></ac:structured-macro>"#,
        );
        assert_eq!(html, "<p>Hidden ✓</p>");
    }

    #[test]
    fn box_macros_become_panels() {
        let (nodes, _) = expand(
            r#"<ac:structured-macro ac:name="note"><ac:rich-text-body><p>Careful</p></ac:rich-text-body></ac:structured-macro><ac:structured-macro ac:name="info"><ac:parameter ac:name="title">FYI</ac:parameter><ac:rich-text-body><p>x</p></ac:rich-text-body></ac:structured-macro>"#,
        );
        let Node::Block(note) = &nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(note.kind, BlockKind::Panel);
        assert_eq!(note.attr("title"), Some("Note"));
        assert_eq!(note.attr("type"), Some("default"));
        assert_eq!(to_html(&note.children), "<p>Careful</p>");

        let Node::Block(info) = &nodes[1] else {
            panic!("expected block");
        };
        assert_eq!(info.attr("title"), Some("FYI"));
        assert_eq!(info.attr("type"), Some("info"));
    }

    #[test]
    fn status_colour_maps_to_panel_type() {
        let (nodes, _) = expand(
            r#"<ac:structured-macro ac:name="status"><ac:parameter ac:name="colour">Green</ac:parameter><ac:parameter ac:name="title">DONE</ac:parameter></ac:structured-macro>"#,
        );
        let Node::Block(status) = &nodes[0] else {
            panic!("expected block");
        };
        assert_eq!(status.attr("title"), Some("DONE"));
        assert_eq!(status.attr("type"), Some("success"));
    }

    #[test]
    fn column_width_converts_to_grid() {
        assert_eq!(grid_width(50.0), 6);
        assert_eq!(grid_width(33.0), 4);
        assert_eq!(grid_width(25.0), 3);
        assert_eq!(grid_width(100.0), 12);
        assert_eq!(grid_width(1.0), 1);
        assert_eq!(grid_width(4.0), 1);
        assert_eq!(grid_width(150.0), 12);

        let (nodes, diagnostics) = expand(
            r#"<ac:structured-macro ac:name="section"><ac:rich-text-body><ac:structured-macro ac:name="column"><ac:parameter ac:name="width">33%</ac:parameter><ac:rich-text-body><p>a</p></ac:rich-text-body></ac:structured-macro><ac:structured-macro ac:name="column"><ac:parameter ac:name="width">wide</ac:parameter><ac:rich-text-body><p>b</p></ac:rich-text-body></ac:structured-macro></ac:rich-text-body></ac:structured-macro>"#,
        );
        let Node::Block(row) = &nodes[0] else {
            panic!("expected row");
        };
        assert_eq!(row.kind, BlockKind::Row);
        let Node::Block(first) = &row.children[0] else {
            panic!("expected column");
        };
        assert_eq!(first.attr("lg"), Some("4"));
        let Node::Block(second) = &row.children[1] else {
            panic!("expected column");
        };
        assert_eq!(second.attr("lg"), None);
        assert_eq!(diagnostics.count(DiagnosticKind::MalformedMacroParameter), 1);
    }

    #[test]
    fn emoticons_share_one_symbol_table() {
        let (nodes, diagnostics) = expand(
            r#"<p><ac:emoticon ac:name="smile" /><img class="emoticon emoticon-thumbs-up" title="(thumbs-up)" src="x.png" /><ac:emoticon ac:name="party" /></p>"#,
        );
        assert_eq!(to_html(&nodes), "<p>:-)👍:party:</p>");
        assert_eq!(diagnostics.count(DiagnosticKind::UnknownEmoticon), 1);
    }

    #[test]
    fn task_lists_become_plain_lists() {
        let html = expand_html(
            r#"<ac:task-list>
<ac:task><ac:task-id>1</ac:task-id><ac:task-status>complete</ac:task-status><ac:task-body>Ship it</ac:task-body></ac:task>
<ac:task><ac:task-id>2</ac:task-id><ac:task-status>incomplete</ac:task-status><ac:task-body>Write docs</ac:task-body></ac:task>
</ac:task-list>"#,
        );
        assert_eq!(
            html,
            "<ul><li>[COMPLETE] Ship it</li><li>Write docs</li></ul>"
        );
    }

    #[test]
    fn attachments_macro_renders_unreferenced_index() {
        let mut diagnostics = Diagnostics::for_page("Intro");
        let mut expander =
            MacroExpander::new(&mut diagnostics, vec![Node::raw("{{oldwiki:intro:a.pdf|a.pdf}}")]);
        let nodes = expander.expand(
            parse_storage(r#"<ac:structured-macro ac:name="attachments" />"#).expect("parse"),
        );
        assert!(expander.index_rendered());
        assert_eq!(
            to_html(&nodes),
            "<ul><li>{{oldwiki:intro:a.pdf|a.pdf}}</li></ul>"
        );
    }

    #[test]
    fn gallery_becomes_placeholder_text() {
        assert_eq!(
            expand_html(r#"<p><ac:structured-macro ac:name="gallery" /></p>"#),
            "<p>Insert Gallery Here</p>"
        );
    }
}
