use std::fmt;

use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Errors that make the whole export unusable. Raised while loading records or
/// building the entity graph, before any output is written.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StructuralError {
    #[error("not a wiki export: root element is <{0}>, expected <hibernate-generic>")]
    UnrecognizedRoot(String),

    #[error("{class} record is missing required field `{field}`")]
    MissingField { class: String, field: String },

    #[error("{class} record {id} has a malformed `{field}`: {value}")]
    MalformedField {
        class: String,
        id: String,
        field: String,
        value: String,
    },

    #[error("page {page} has a parent of unknown record class `{class}`")]
    UnexpectedRelation { page: String, class: String },

    #[error("page {page} references attachment {attachment} which is not in the export")]
    MissingAttachment { page: String, attachment: String },

    #[error("page {page} references body content {body} which is not in the export")]
    MissingBody { page: String, body: String },

    #[error("record id {0} is reserved for the blog root page")]
    ReservedId(String),

    #[error("duplicate {class} record id {id}")]
    DuplicateId { class: String, id: String },

    #[error("parent chain of page {0} contains a cycle")]
    ParentCycle(String),
}

/// A markup construct broke an assumption the transform depends on. Aborts the
/// page being processed; other pages are unaffected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ContentError {
    #[error("page '{page}': body is not well-formed storage markup: {reason}")]
    Parse { page: String, reason: String },

    #[error("page '{page}': user reference is not the sole content of a link (found inside <{parent}>)")]
    UserOutsideLink { page: String, parent: String },

    #[error("page '{page}': user reference carries neither a user key nor a username")]
    AnonymousUser { page: String },

    #[error("page '{page}': attachment reference inside <{parent}> is neither a link nor an image")]
    AttachmentPlacement { page: String, parent: String },

    #[error("page '{page}': page reference inside <{parent}> is not a link")]
    PageLinkPlacement { page: String, parent: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DiagnosticKind {
    UnknownMacro,
    UnknownEmoticon,
    MissingMacroBody,
    MalformedMacroParameter,
    UnresolvedAttachment,
    UnresolvedPageLink,
    AttachmentSourceMissing,
}

impl DiagnosticKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UnknownMacro => "unknown macro",
            Self::UnknownEmoticon => "unknown emoticon",
            Self::MissingMacroBody => "macro without body",
            Self::MalformedMacroParameter => "malformed macro parameter",
            Self::UnresolvedAttachment => "unresolved attachment",
            Self::UnresolvedPageLink => "unresolved page link",
            Self::AttachmentSourceMissing => "attachment source missing",
        }
    }
}

/// A recoverable, content-level finding. The transform applied a fallback and
/// kept going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Diagnostic {
    pub page: String,
    pub kind: DiagnosticKind,
    pub detail: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "page '{}': {}: {}", self.page, self.kind.as_str(), self.detail)
    }
}

/// Collects diagnostics for one page and logs each as it is recorded.
#[derive(Debug, Default)]
pub struct Diagnostics {
    page: String,
    items: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn for_page(page: impl Into<String>) -> Self {
        Self {
            page: page.into(),
            items: Vec::new(),
        }
    }

    pub fn page(&self) -> &str {
        &self.page
    }

    pub fn record(&mut self, kind: DiagnosticKind, detail: impl Into<String>) {
        let diagnostic = Diagnostic {
            page: self.page.clone(),
            kind,
            detail: detail.into(),
        };
        warn!("{diagnostic}");
        self.items.push(diagnostic);
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn into_items(self) -> Vec<Diagnostic> {
        self.items
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.items.iter().filter(|item| item.kind == kind).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn diagnostics_are_tagged_with_the_page() {
        let mut diagnostics = Diagnostics::for_page("Intro");
        diagnostics.record(DiagnosticKind::UnknownMacro, "jira");
        diagnostics.record(DiagnosticKind::UnknownEmoticon, "party");

        assert_eq!(diagnostics.items().len(), 2);
        assert_eq!(diagnostics.count(DiagnosticKind::UnknownMacro), 1);
        assert_eq!(
            diagnostics.items()[0].to_string(),
            "page 'Intro': unknown macro: jira"
        );
    }

    #[test]
    fn structural_errors_name_the_offending_ids() {
        let error = StructuralError::MissingAttachment {
            page: "42".to_string(),
            attachment: "7".to_string(),
        };
        assert_eq!(
            error.to_string(),
            "page 42 references attachment 7 which is not in the export"
        );
    }
}
