use std::collections::BTreeSet;

use tracing::debug;

use crate::content::{Element, Node};
use crate::error::{ContentError, DiagnosticKind, Diagnostics};
use crate::graph::{AttachmentIx, PageIx, Repository};
use crate::paths::{CURRENT_STATUS, OutputLayout, slugify};

/// An attachment a page links to, located in the export's attachment store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedAttachment {
    pub attachment_id: String,
    /// Page whose storage directory holds the version files.
    pub source_page_id: String,
    /// Output filename relative to the output root.
    pub filename: String,
}

/// Links for attachments the body never referenced, with what rendering them would materialize.
#[derive(Debug, Default)]
pub struct AttachmentIndex {
    pub links: Vec<Node>,
    pub attachments: Vec<ResolvedAttachment>,
}

pub struct Resolver<'a> {
    repo: &'a Repository,
    layout: &'a OutputLayout,
    page: PageIx,
    diagnostics: Diagnostics,
    consumed: BTreeSet<AttachmentIx>,
    resolved: Vec<ResolvedAttachment>,
}

impl<'a> Resolver<'a> {
    pub fn new(
        repo: &'a Repository,
        layout: &'a OutputLayout,
        page: PageIx,
        diagnostics: Diagnostics,
    ) -> Self {
        Self {
            repo,
            layout,
            page,
            diagnostics,
            consumed: BTreeSet::new(),
            resolved: Vec::new(),
        }
    }

    pub fn resolve(&mut self, nodes: Vec<Node>) -> Result<Vec<Node>, ContentError> {
        self.resolve_nodes(nodes, "body")
    }

    /// Links to the page's own attachments that the body never referenced, in export order.
    /// Nothing is queued for materialization until the caller decides to render them.
    pub fn attachment_index(&self) -> AttachmentIndex {
        let repo = self.repo;
        let mut index = AttachmentIndex::default();
        for &ix in &repo.page(self.page).attachments {
            if self.consumed.contains(&ix) {
                continue;
            }
            let (filename, resolved) = self.locate(ix, self.page);
            let media_id = self.layout.media_id(&filename);
            index
                .links
                .push(Node::raw(media_link(&media_id, &repo.attachment(ix).title)));
            index.attachments.push(resolved);
        }
        index
    }

    pub fn into_parts(self) -> (Diagnostics, Vec<ResolvedAttachment>) {
        (self.diagnostics, self.resolved)
    }

    fn page_title(&self) -> String {
        self.repo.page(self.page).title_or_id()
    }

    fn resolve_nodes(&mut self, nodes: Vec<Node>, parent: &str) -> Result<Vec<Node>, ContentError> {
        let mut out = Vec::with_capacity(nodes.len());
        for node in nodes {
            match node {
                Node::Element(element) => out.extend(self.resolve_element(element, parent)?),
                other => out.push(other),
            }
        }
        Ok(out)
    }

    fn resolve_element(
        &mut self,
        element: Element,
        parent: &str,
    ) -> Result<Vec<Node>, ContentError> {
        match element.name.as_str() {
            "ac:link" => self.resolve_link(element),
            "ac:image" => Ok(self.resolve_image(element)),
            "ri:user" => Err(ContentError::UserOutsideLink {
                page: self.page_title(),
                parent: parent.to_string(),
            }),
            // view-file style macros name their attachment in a parameter
            "ri:attachment" if parent == "ac:parameter" => {
                Ok(vec![self.attachment_link(&element, None)])
            }
            "ri:attachment" => Err(ContentError::AttachmentPlacement {
                page: self.page_title(),
                parent: parent.to_string(),
            }),
            "ri:page" | "ri:blog-post" if parent == "ac:parameter" => {
                Ok(vec![Node::Element(element)])
            }
            "ri:page" | "ri:blog-post" => Err(ContentError::PageLinkPlacement {
                page: self.page_title(),
                parent: parent.to_string(),
            }),
            _ => {
                let Element {
                    name,
                    attrs,
                    children,
                } = element;
                let children = self.resolve_nodes(children, &name)?;
                Ok(vec![Node::Element(Element {
                    name,
                    attrs,
                    children,
                })])
            }
        }
    }

    fn resolve_link(&mut self, element: Element) -> Result<Vec<Node>, ContentError> {
        if let Some(user) = element.child("ri:user") {
            return Ok(vec![self.user_link(user)?]);
        }
        if let Some(reference) = element.child("ri:attachment") {
            return Ok(vec![self.attachment_link(reference, link_label(&element))]);
        }
        if let Some(target) = element
            .child("ri:page")
            .or_else(|| element.child("ri:blog-post"))
        {
            return Ok(vec![self.page_link(target, link_label(&element))]);
        }

        // anchors, space links and shortcuts keep their visible body
        let body: Vec<Node> = element
            .children
            .into_iter()
            .filter_map(|child| match child {
                Node::Element(inner)
                    if inner.is("ac:link-body") || inner.is("ac:plain-text-link-body") =>
                {
                    Some(inner.children)
                }
                _ => None,
            })
            .flatten()
            .collect();
        self.resolve_nodes(body, "ac:link")
    }

    fn resolve_image(&mut self, element: Element) -> Vec<Node> {
        if let Some(reference) = element.child("ri:attachment") {
            return vec![self.attachment_link(reference, None)];
        }
        if let Some(url) = element.child("ri:url").and_then(|url| url.attr("ri:value")) {
            let mut image = Element::new("img").with_attr("src", url);
            if let Some(alt) = element.attr("ac:alt") {
                image = image.with_attr("alt", alt);
            }
            return vec![Node::Element(image)];
        }
        debug!(
            "page '{}': image without attachment or url dropped",
            self.page_title()
        );
        Vec::new()
    }

    fn user_link(&mut self, reference: &Element) -> Result<Node, ContentError> {
        let key = reference
            .attr("ri:userkey")
            .or_else(|| reference.attr("ri:account-id"));
        let username = reference.attr("ri:username");
        let Some(identifier) = username.or(key) else {
            return Err(ContentError::AnonymousUser {
                page: self.page_title(),
            });
        };

        let user = key
            .and_then(|key| self.repo.user_by_id(key))
            .or_else(|| username.and_then(|name| self.repo.user_by_username(name)));
        Ok(match user {
            Some(user) => Node::raw(format!("[[user>{}|{}]]", user.login, user.display_name)),
            None => {
                debug!(
                    "page '{}': user {identifier} is not in the export",
                    self.page_title()
                );
                Node::text(format!("@{identifier}"))
            }
        })
    }

    fn attachment_link(&mut self, reference: &Element, label: Option<String>) -> Node {
        let Some(filename) = reference.attr("ri:filename") else {
            self.diagnostics
                .record(DiagnosticKind::UnresolvedAttachment, "reference without filename");
            return Node::text(label.unwrap_or_default());
        };
        let label = label.unwrap_or_else(|| filename.to_string());

        let scope = self.scope_page(reference);
        let found = self
            .repo
            .page(scope)
            .attachments
            .iter()
            .copied()
            .find(|ix| self.repo.attachment(*ix).title == filename);
        match found {
            Some(ix) => {
                let media_id = self.claim(ix, scope);
                Node::raw(media_link(&media_id, &label))
            }
            None => {
                self.diagnostics.record(
                    DiagnosticKind::UnresolvedAttachment,
                    format!(
                        "{filename} is not attached to '{}'",
                        self.repo.page(scope).title_or_id()
                    ),
                );
                Node::text(label)
            }
        }
    }

    /// The page an attachment reference points into: an explicit content id or
    /// page title when it resolves, the current page otherwise.
    fn scope_page(&self, reference: &Element) -> PageIx {
        if let Some(id) = reference
            .child("ri:content-entity")
            .and_then(|entity| entity.attr("ri:content-id"))
        {
            if let Some(ix) = self.repo.page_ix(id) {
                return ix;
            }
            debug!("attachment scope {id} is outside the export, using the current page");
        } else if let Some(title) = reference
            .child("ri:page")
            .or_else(|| reference.child("ri:blog-post"))
            .and_then(|target| target.attr("ri:content-title"))
            && let Some(ix) = self.repo.latest_by_title(title)
        {
            return ix;
        }
        self.page
    }

    /// Resolve (once) the attachment's output filename and queue it for materialization.
    fn claim(&mut self, ix: AttachmentIx, scope: PageIx) -> String {
        let (filename, resolved) = self.locate(ix, scope);
        self.consumed.insert(ix);
        if !self
            .resolved
            .iter()
            .any(|known| known.attachment_id == resolved.attachment_id)
        {
            self.resolved.push(resolved);
        }
        self.layout.media_id(&filename)
    }

    fn locate(&self, ix: AttachmentIx, scope: PageIx) -> (String, ResolvedAttachment) {
        let repo = self.repo;
        let layout = self.layout;
        let attachment = repo.attachment(ix);
        let filename = attachment
            .resolve_filename(|| {
                let media_page = repo.page(attachment.owner().unwrap_or(scope));
                let media_dir = layout.locate_page(media_page).media_dir;
                let slug = slugify(&attachment.title);
                if slug.is_empty() {
                    format!("{media_dir}/attachment_{}", attachment.id)
                } else {
                    format!("{media_dir}/{slug}")
                }
            })
            .to_string();
        let resolved = ResolvedAttachment {
            attachment_id: attachment.id.clone(),
            source_page_id: repo.page(scope).id.clone(),
            filename: filename.clone(),
        };
        (filename, resolved)
    }

    fn page_link(&mut self, target: &Element, label: Option<String>) -> Node {
        let (title, resolved) = match target.attr("ri:content-title") {
            Some(title) => (title.to_string(), self.repo.latest_by_title(title)),
            None => (self.page_title(), Some(self.page)),
        };
        let label = label.unwrap_or_else(|| title.clone());
        let wiki_id = match resolved {
            Some(ix) => self.layout.locate_page(self.repo.page(ix)).wiki_id,
            None => {
                self.diagnostics
                    .record(DiagnosticKind::UnresolvedPageLink, title.clone());
                self.layout
                    .locate(CURRENT_STATUS, &[slugify(&title)], None)
                    .wiki_id
            }
        };
        Node::raw(format!("[[{wiki_id}|{label}]]"))
    }
}

pub fn media_link(media_id: &str, label: &str) -> String {
    format!("{{{{{media_id}|{label}}}}}")
}

fn link_label(link: &Element) -> Option<String> {
    link.child("ac:plain-text-link-body")
        .or_else(|| link.child("ac:link-body"))
        .map(|body| body.text_content().trim().to_string())
        .filter(|label| !label.is_empty())
}
