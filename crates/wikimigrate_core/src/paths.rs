use std::cmp::Ordering;
use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::graph::Page;

pub const CURRENT_STATUS: &str = "current";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NamingMode {
    /// Latest version only, at its hierarchical path.
    #[default]
    Hierarchical,
    /// Every stored version, filename suffixed with `=<version>`.
    Versioned,
}

impl NamingMode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Hierarchical => "hierarchical",
            Self::Versioned => "versioned",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputLayout {
    pub pages_dir: String,
    pub media_dir: String,
    pub namespace: String,
    pub extension: String,
    pub naming: NamingMode,
}

impl Default for OutputLayout {
    fn default() -> Self {
        Self {
            pages_dir: crate::config::DEFAULT_PAGES_DIR.to_string(),
            media_dir: crate::config::DEFAULT_MEDIA_DIR.to_string(),
            namespace: crate::config::DEFAULT_NAMESPACE.to_string(),
            extension: crate::config::DEFAULT_EXTENSION.to_string(),
            naming: NamingMode::Hierarchical,
        }
    }
}

/// Where a page lands in the output tree and how other pages address it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageLocation {
    /// Output file, relative to the output root, `/`-separated.
    pub relative_path: String,
    /// Target wiki page id, e.g. `:oldwiki:parent:child`.
    pub wiki_id: String,
    /// Directory that holds the page's attachments, relative to the output root.
    pub media_dir: String,
}

impl OutputLayout {
    /// `lineage` is the filename of every ancestor, root first, ending with the page itself.
    pub fn locate(&self, status: &str, lineage: &[String], version: Option<u32>) -> PageLocation {
        let status = status.to_lowercase();
        let mut page_segments = lineage.to_vec();
        if let (NamingMode::Versioned, Some(version), Some(last)) =
            (self.naming, version, page_segments.last_mut())
        {
            last.push_str(&format!("={version}"));
        }

        let mut file_segments = vec![self.pages_dir.clone(), status.clone()];
        file_segments.extend(page_segments.iter().cloned());
        let relative_path = format!("{}.{}", file_segments.join("/"), self.extension);

        let mut id_segments = vec![self.namespace.clone()];
        let mut media_segments = vec![self.media_dir.clone(), self.namespace.replace(':', "/")];
        if status != CURRENT_STATUS {
            id_segments.push(status.clone());
            media_segments.push(status);
        }
        id_segments.extend(page_segments);
        media_segments.extend(lineage.iter().cloned());

        PageLocation {
            relative_path,
            wiki_id: format!(":{}", id_segments.join(":")),
            media_dir: media_segments.join("/"),
        }
    }

    pub fn locate_page(&self, page: &Page) -> PageLocation {
        self.locate(&page.status, page.lineage(), Some(page.version))
    }

    /// Convert a resolved attachment filename into the id used by media links.
    pub fn media_id(&self, resolved_filename: &str) -> String {
        let prefix = format!("{}/", self.media_dir);
        resolved_filename
            .strip_prefix(&prefix)
            .unwrap_or(resolved_filename)
            .replace('/', ":")
    }
}

/// Turn a page or attachment title into a filename segment.
///
/// Path separators become `-`, spaces become `_`, anything outside
/// `[-A-Za-z0-9_.]` is dropped, underscore runs collapse, and the result is
/// lower-cased. Collisions between distinct titles are not detected.
pub fn slugify(title: &str) -> String {
    let replaced = title.replace(['/', '\\'], "-").replace(' ', "_");
    let stripped = disallowed_chars().replace_all(&replaced, "");
    let collapsed = underscore_runs().replace_all(&stripped, "_");
    collapsed.to_lowercase()
}

fn disallowed_chars() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"[^-A-Za-z0-9_.]+").expect("valid slug pattern"))
}

fn underscore_runs() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"_+").expect("valid underscore pattern"))
}

/// Ordering for export ids: numeric ids numerically, then everything else lexically.
pub fn id_order(left: &str, right: &str) -> Ordering {
    match (left.parse::<u64>(), right.parse::<u64>()) {
        (Ok(left), Ok(right)) => left.cmp(&right),
        (Ok(_), Err(_)) => Ordering::Less,
        (Err(_), Ok(_)) => Ordering::Greater,
        (Err(_), Err(_)) => left.cmp(right),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lineage(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|part| part.to_string()).collect()
    }

    #[test]
    fn slugify_normalizes_titles() {
        assert_eq!(slugify("Intro"), "intro");
        assert_eq!(slugify("Release Notes 2.0"), "release_notes_2.0");
        assert_eq!(slugify("A/B testing"), "a-b_testing");
        assert_eq!(slugify("What's   new?"), "whats_new");
        assert_eq!(slugify("diagram (final).PNG"), "diagram_final.png");
        assert_eq!(slugify("Überblick"), "berblick");
    }

    #[test]
    fn slugify_is_stable() {
        let title = "Team / Onboarding: Week 1";
        assert_eq!(slugify(title), slugify(title));
        assert_eq!(slugify(title), "team_-_onboarding_week_1");
    }

    #[test]
    fn locate_current_page() {
        let layout = OutputLayout::default();
        let location = layout.locate("current", &lineage(&["parent", "intro"]), Some(2));
        assert_eq!(location.relative_path, "pages/current/parent/intro.txt");
        assert_eq!(location.wiki_id, ":oldwiki:parent:intro");
        assert_eq!(location.media_dir, "media/oldwiki/parent/intro");
    }

    #[test]
    fn locate_non_current_status_keeps_status_segment() {
        let layout = OutputLayout::default();
        let location = layout.locate("Draft", &lineage(&["notes"]), None);
        assert_eq!(location.relative_path, "pages/draft/notes.txt");
        assert_eq!(location.wiki_id, ":oldwiki:draft:notes");
        assert_eq!(location.media_dir, "media/oldwiki/draft/notes");
    }

    #[test]
    fn versioned_naming_suffixes_page_but_not_media() {
        let layout = OutputLayout {
            naming: NamingMode::Versioned,
            ..OutputLayout::default()
        };
        let location = layout.locate("current", &lineage(&["intro"]), Some(5));
        assert_eq!(location.relative_path, "pages/current/intro=5.txt");
        assert_eq!(location.wiki_id, ":oldwiki:intro=5");
        assert_eq!(location.media_dir, "media/oldwiki/intro");
    }

    #[test]
    fn media_id_strips_media_root() {
        let layout = OutputLayout::default();
        assert_eq!(
            layout.media_id("media/oldwiki/intro/diagram.png"),
            "oldwiki:intro:diagram.png"
        );
    }

    #[test]
    fn id_order_is_numeric_first() {
        let mut ids = vec!["10", "9", "abc", "100", "0"];
        ids.sort_by(|left, right| id_order(left, right));
        assert_eq!(ids, vec!["0", "9", "10", "100", "abc"]);
    }
}
