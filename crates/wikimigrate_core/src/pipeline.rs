use std::path::Path;

use anyhow::{Context, Result, bail};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tracing::{error, info};

use crate::attachments::{self, MaterializeCounts, MaterializeMode, MaterializeOutcome};
use crate::config::MigrateConfig;
use crate::content::{Node, bullet_list, parse_storage};
use crate::directory::UserDirectory;
use crate::error::{ContentError, Diagnostic, DiagnosticKind, Diagnostics, StructuralError};
use crate::export::load_entities;
use crate::graph::{PageIx, Repository};
use crate::macros::MacroExpander;
use crate::paths::{NamingMode, OutputLayout, PageLocation};
use crate::resolve::{ResolvedAttachment, Resolver};
use crate::runtime::{ResolvedPaths, write_text_file};
use crate::serialize::{MarkupSerializer, SerializationAdapter};

pub const CHILD_LISTING_HEADING: &str = "Pages below this page:";
pub const ATTACHMENT_INDEX_HEADING: &str = "Attachments";

#[derive(Debug, Clone, Serialize)]
pub struct EmittedPage {
    pub page_id: String,
    pub title: String,
    pub version: u32,
    pub relative_path: String,
    pub hash: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PageFailure {
    pub page_id: String,
    pub title: String,
    pub error: String,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct MigrationReport {
    pub planned: usize,
    pub emitted: Vec<EmittedPage>,
    /// Latest pages without a body.
    pub skipped_empty: usize,
    pub superseded: usize,
    pub failures: Vec<PageFailure>,
    pub diagnostics: Vec<Diagnostic>,
    pub attachments: MaterializeCounts,
}

/// One page rendered to target markup, not yet written.
#[derive(Debug, Clone)]
pub struct RenderedPage {
    pub page_id: String,
    pub title: String,
    pub version: u32,
    pub location: PageLocation,
    pub text: String,
    pub diagnostics: Vec<Diagnostic>,
    pub attachments: Vec<ResolvedAttachment>,
}

/// Load `entities.xml` and build the entity graph. Structural problems surface
/// here, before anything is written.
pub fn load_repository(
    paths: &ResolvedPaths,
    config: &MigrateConfig,
    directory: &dyn UserDirectory,
) -> Result<Repository> {
    let entities_path = paths.entities_path(config);
    let records = load_entities(&entities_path)?;
    info!(
        "loaded {} records from {}",
        records.record_count(),
        entities_path.display()
    );
    Repository::build(records, config, directory).with_context(|| {
        format!(
            "failed to build the page graph from {}",
            entities_path.display()
        )
    })
}

/// Pages to write, in id order.
pub fn plan_emissions(repo: &Repository, config: &MigrateConfig) -> Vec<PageIx> {
    let versioned = config.layout().naming == NamingMode::Versioned;
    let include_non_current = config.include_non_current();
    repo.pages_in_id_order()
        .into_iter()
        .filter(|ix| {
            let page = repo.page(*ix);
            !page.is_synthetic()
                && page.has_content()
                && (page.is_latest() || versioned)
                && (page.is_current() || include_non_current)
        })
        .collect()
}

pub struct PageRenderer<'a> {
    repo: &'a Repository,
    layout: &'a OutputLayout,
    serializer: &'a dyn MarkupSerializer,
    append_attachment_index: bool,
}

impl<'a> PageRenderer<'a> {
    pub fn new(
        repo: &'a Repository,
        layout: &'a OutputLayout,
        serializer: &'a dyn MarkupSerializer,
        append_attachment_index: bool,
    ) -> Self {
        Self {
            repo,
            layout,
            serializer,
            append_attachment_index,
        }
    }

    pub fn render(&self, ix: PageIx) -> Result<RenderedPage> {
        let page = self.repo.page(ix);
        let title = page.title_or_id();
        let Some(body_id) = page.body_id.as_deref() else {
            bail!("page '{title}' has no content");
        };
        let Some(body) = self.repo.body(page) else {
            return Err(StructuralError::MissingBody {
                page: page.id.clone(),
                body: body_id.to_string(),
            }
            .into());
        };

        let mut nodes = vec![Node::element("h1", vec![Node::text(title.clone())])];
        nodes.extend(self.child_listing(ix));

        let diagnostics = Diagnostics::for_page(title.clone());
        let (diagnostics, attachments) = if body.trim().is_empty() {
            (diagnostics, Vec::new())
        } else {
            let tree = parse_storage(body).map_err(|reason| ContentError::Parse {
                page: title.clone(),
                reason,
            })?;
            let mut resolver = Resolver::new(self.repo, self.layout, ix, diagnostics);
            let tree = resolver.resolve(tree)?;
            let index = resolver.attachment_index();
            let (mut diagnostics, mut attachments) = resolver.into_parts();

            let mut expander = MacroExpander::new(&mut diagnostics, index.links.clone());
            nodes.extend(expander.expand(tree));
            let index_rendered = expander.index_rendered();
            let append =
                self.append_attachment_index && !index_rendered && !index.links.is_empty();
            if append {
                nodes.push(Node::element(
                    "h2",
                    vec![Node::text(ATTACHMENT_INDEX_HEADING)],
                ));
                nodes.push(bullet_list(index.links));
            }
            // only attachments that ended up linked from the page are materialized
            if index_rendered || append {
                attachments.extend(index.attachments);
            }
            (diagnostics, attachments)
        };

        let text = SerializationAdapter::new(self.serializer)
            .render(&nodes)
            .with_context(|| format!("failed to serialize page '{title}'"))?;

        Ok(RenderedPage {
            page_id: page.id.clone(),
            title,
            version: page.version,
            location: self.layout.locate_page(page),
            text,
            diagnostics: diagnostics.into_items(),
            attachments,
        })
    }

    fn child_listing(&self, ix: PageIx) -> Vec<Node> {
        let children = self.repo.page(ix).children();
        if children.is_empty() {
            return Vec::new();
        }
        let links = children
            .iter()
            .map(|child| {
                let child = self.repo.page(*child);
                let wiki_id = self.layout.locate_page(child).wiki_id;
                Node::raw(format!("[[{wiki_id}|{}]]", child.title_or_id()))
            })
            .collect();
        vec![
            Node::element("h2", vec![Node::text(CHILD_LISTING_HEADING)]),
            bullet_list(links),
        ]
    }
}

/// Render the latest version of one page by title (or export id) without writing anything.
pub fn render_page(
    repo: &Repository,
    config: &MigrateConfig,
    serializer: &dyn MarkupSerializer,
    title_or_id: &str,
) -> Result<RenderedPage> {
    let Some(ix) = repo
        .latest_by_title(title_or_id)
        .or_else(|| repo.page_ix(title_or_id))
    else {
        bail!("no page titled or identified by '{title_or_id}' in the export");
    };
    let layout = config.layout();
    PageRenderer::new(repo, &layout, serializer, config.append_attachment_index()).render(ix)
}

/// Write every planned page and materialize the attachments it links to.
///
/// A page that fails to render or write is logged, recorded in the report and
/// skipped; the rest of the run continues.
pub fn migrate(
    repo: &Repository,
    config: &MigrateConfig,
    paths: &ResolvedPaths,
    serializer: &dyn MarkupSerializer,
) -> Result<MigrationReport> {
    let layout = config.layout();
    let renderer = PageRenderer::new(repo, &layout, serializer, config.append_attachment_index());
    let plan = plan_emissions(repo, config);
    let stats = repo.stats();

    let mut report = MigrationReport {
        planned: plan.len(),
        skipped_empty: stats.latest_pages - stats.content_pages,
        superseded: if layout.naming == NamingMode::Versioned {
            0
        } else {
            stats.superseded_pages
        },
        ..MigrationReport::default()
    };

    let writer = PageWriter {
        output_dir: &paths.output_dir,
        attachments_root: &paths.attachments_dir(config),
        most_recent_page: &paths.output_dir.join(config.most_recent_page()),
        mode: config.materialize_mode(),
    };
    let mut progress = Progress::new(plan.len(), config.progress_step());
    info!(
        "migrating {} pages into {}",
        plan.len(),
        paths.output_dir.display()
    );

    for ix in plan {
        let page = repo.page(ix);
        let outcome = renderer
            .render(ix)
            .and_then(|rendered| writer.write(rendered, &mut report));
        if let Err(err) = outcome {
            error!("skipping page '{}': {err:#}", page.title_or_id());
            report.failures.push(PageFailure {
                page_id: page.id.clone(),
                title: page.title_or_id(),
                error: format!("{err:#}"),
            });
        }
        progress.advance();
    }

    info!(
        "wrote {} pages, {} failed, {} attachments materialized",
        report.emitted.len(),
        report.failures.len(),
        report.attachments.written()
    );
    Ok(report)
}

struct PageWriter<'a> {
    output_dir: &'a Path,
    attachments_root: &'a Path,
    most_recent_page: &'a Path,
    mode: MaterializeMode,
}

impl PageWriter<'_> {
    fn write(&self, rendered: RenderedPage, report: &mut MigrationReport) -> Result<()> {
        let mut diagnostics = Diagnostics::for_page(rendered.title.clone());
        let mut counts = MaterializeCounts::default();
        for attachment in &rendered.attachments {
            let source = attachments::source_dir(
                self.attachments_root,
                &attachment.source_page_id,
                &attachment.attachment_id,
            );
            let dest = self.output_dir.join(&attachment.filename);
            let outcome = attachments::materialize(&source, &dest, self.mode)?;
            if outcome == MaterializeOutcome::SourceMissing {
                diagnostics.record(
                    DiagnosticKind::AttachmentSourceMissing,
                    format!("no version files under {}", source.display()),
                );
            }
            counts.record(outcome);
        }

        let page_path = self.output_dir.join(&rendered.location.relative_path);
        write_text_file(&page_path, &rendered.text, true)?;
        write_text_file(self.most_recent_page, &rendered.text, true)?;

        report.attachments.linked += counts.linked;
        report.attachments.copied += counts.copied;
        report.attachments.already_present += counts.already_present;
        report.attachments.source_missing += counts.source_missing;
        report.diagnostics.extend(rendered.diagnostics);
        report.diagnostics.extend(diagnostics.into_items());
        report.emitted.push(EmittedPage {
            page_id: rendered.page_id,
            title: rendered.title,
            version: rendered.version,
            relative_path: rendered.location.relative_path,
            hash: compute_hash(&rendered.text),
        });
        Ok(())
    }
}

/// Logs a progress line every `step` percent.
struct Progress {
    total: usize,
    step: usize,
    done: usize,
    next: usize,
}

impl Progress {
    fn new(total: usize, step: u32) -> Self {
        let step = step as usize;
        Self {
            total,
            step,
            done: 0,
            next: step,
        }
    }

    fn advance(&mut self) {
        self.done += 1;
        if self.total == 0 {
            return;
        }
        let percent = self.done * 100 / self.total;
        if percent >= self.next {
            info!("{} of {} pages processed ({percent}%)", self.done, self.total);
            self.next = (percent / self.step + 1) * self.step;
        }
    }
}

fn compute_hash(content: &str) -> String {
    let digest = Sha256::digest(content.as_bytes());
    let mut output = String::with_capacity(16);
    for byte in digest.iter().take(8) {
        output.push_str(&format!("{byte:02x}"));
    }
    output
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::{TempDir, tempdir};

    use super::*;
    use crate::directory::StaticDirectory;
    use crate::export::{AttachmentRecord, BodyRecord, ExportRecords, PageRecord};
    use crate::runtime::ValueSource;

    /// Passes HTML through untouched so assertions can look at structure.
    struct Echo;

    impl MarkupSerializer for Echo {
        fn serialize(&self, html: &str) -> Result<String> {
            Ok(html.to_string())
        }
    }

    fn page(id: &str, title: &str, version: u32, body: &str) -> (PageRecord, BodyRecord) {
        let mut record = PageRecord::new(id, title, version);
        record.body_id = Some(format!("b{id}"));
        (
            record,
            BodyRecord {
                id: format!("b{id}"),
                body: body.to_string(),
            },
        )
    }

    fn repository(
        pages: Vec<(PageRecord, BodyRecord)>,
        attachments: Vec<AttachmentRecord>,
    ) -> Repository {
        let (pages, bodies): (Vec<_>, Vec<_>) = pages.into_iter().unzip();
        Repository::build(
            ExportRecords {
                pages,
                bodies,
                attachments,
                ..ExportRecords::default()
            },
            &MigrateConfig::default(),
            &StaticDirectory::default(),
        )
        .expect("build graph")
    }

    fn temp_paths() -> (TempDir, ResolvedPaths) {
        let temp = tempdir().expect("tempdir");
        let paths = ResolvedPaths {
            export_dir: temp.path().to_path_buf(),
            output_dir: temp.path().join("out"),
            config_path: temp.path().join("wikimigrate.toml"),
            export_source: ValueSource::Flag,
            output_source: ValueSource::Default,
            config_source: ValueSource::Default,
        };
        (temp, paths)
    }

    #[test]
    fn only_latest_content_pages_are_planned() {
        let (mut archived, archived_body) = page("5", "Old", 1, "<p>x</p>");
        archived.status = "archived".to_string();
        let (mut pages, bodies): (Vec<_>, Vec<_>) = vec![
            page("1", "Foo", 1, "<p>1</p>"),
            page("2", "Foo", 2, "<p>2</p>"),
            page("3", "Foo", 5, "<p>5</p>"),
            (archived, archived_body),
        ]
        .into_iter()
        .unzip();
        pages.push(PageRecord::new("4", "Blank", 1));
        let repo = Repository::build(
            ExportRecords {
                pages,
                bodies,
                ..ExportRecords::default()
            },
            &MigrateConfig::default(),
            &StaticDirectory::default(),
        )
        .expect("build graph");

        let plan = plan_emissions(&repo, &MigrateConfig::default());
        let ids: Vec<&str> = plan.iter().map(|ix| repo.page(*ix).id.as_str()).collect();
        assert_eq!(ids, vec!["3"]);

        let mut config = MigrateConfig::default();
        config.output.include_non_current = Some(true);
        config.output.naming = Some(NamingMode::Versioned);
        let plan = plan_emissions(&repo, &config);
        let ids: Vec<&str> = plan.iter().map(|ix| repo.page(*ix).id.as_str()).collect();
        assert_eq!(ids, vec!["1", "2", "3", "5"]);
    }

    #[test]
    fn rendered_page_has_title_children_and_attachment_index() {
        let (mut parent, parent_body) = page("1", "Parent", 1, "<p>Hello</p>");
        parent.attachment_ids = vec!["9".to_string()];
        let (mut child, child_body) = page("2", "Child", 1, "<p>c</p>");
        child.parent_id = Some("1".to_string());
        let repo = repository(
            vec![(parent, parent_body), (child, child_body)],
            vec![AttachmentRecord {
                id: "9".to_string(),
                title: "notes.txt".to_string(),
            }],
        );

        let rendered = render_page(&repo, &MigrateConfig::default(), &Echo, "Parent")
            .expect("render");
        assert_eq!(
            rendered.text,
            "<h1>Parent</h1><h2>Pages below this page:</h2><ul><li>[[:oldwiki:parent:child|Child]]</li></ul><p>Hello</p><h2>Attachments</h2><ul><li>{{oldwiki:parent:notes.txt|notes.txt}}</li></ul>"
        );
        assert_eq!(rendered.location.relative_path, "pages/current/parent.txt");
        assert_eq!(rendered.attachments.len(), 1);
    }

    #[test]
    fn unlisted_attachments_are_not_materialized() {
        let (mut record, body) = page("1", "Parent", 1, "<p>Hello</p>");
        record.attachment_ids = vec!["9".to_string()];
        let repo = repository(
            vec![(record, body)],
            vec![AttachmentRecord {
                id: "9".to_string(),
                title: "notes.txt".to_string(),
            }],
        );
        let mut config = MigrateConfig::default();
        config.output.append_attachment_index = Some(false);

        let rendered = render_page(&repo, &config, &Echo, "Parent").expect("render");
        assert_eq!(rendered.text, "<h1>Parent</h1><p>Hello</p>");
        assert!(rendered.attachments.is_empty());

        let (_temp, paths) = temp_paths();
        let report = migrate(&repo, &config, &paths, &Echo).expect("migrate");
        assert_eq!(report.attachments, MaterializeCounts::default());
        assert!(!paths.output_dir.join("media").exists());
    }

    #[test]
    fn empty_body_renders_title_only() {
        let repo = repository(vec![page("1", "Stub", 1, "   ")], Vec::new());
        let rendered =
            render_page(&repo, &MigrateConfig::default(), &Echo, "Stub").expect("render");
        assert_eq!(rendered.text, "<h1>Stub</h1>");
    }

    #[test]
    fn malformed_page_is_skipped_and_others_written() {
        let repo = repository(
            vec![
                page("1", "Broken", 1, "<p>unclosed"),
                page("2", "Fine", 1, "<p>ok</p>"),
                page("3", "Loose User", 1, r#"<p><ri:user ri:userkey="x" /></p>"#),
            ],
            Vec::new(),
        );
        let (_temp, paths) = temp_paths();
        let report = migrate(&repo, &MigrateConfig::default(), &paths, &Echo).expect("migrate");

        assert_eq!(report.planned, 3);
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(report.emitted[0].relative_path, "pages/current/fine.txt");
        assert_eq!(report.failures.len(), 2);
        assert_eq!(report.failures[0].page_id, "1");
        assert!(report.failures[0].error.contains("Broken"));
        assert_eq!(report.failures[1].page_id, "3");
        assert!(paths.output_dir.join("pages/current/fine.txt").exists());
        assert!(!paths.output_dir.join("pages/current/broken.txt").exists());
        assert_eq!(
            fs::read_to_string(paths.output_dir.join("most_recent_page.md")).expect("read"),
            "<h1>Fine</h1><p>ok</p>"
        );
    }

    #[test]
    fn missing_attachment_source_is_a_diagnostic() {
        let (mut record, body) = page(
            "1",
            "Intro",
            1,
            r#"<p><ac:link><ri:attachment ri:filename="a.png" /></ac:link></p>"#,
        );
        record.attachment_ids = vec!["7".to_string()];
        let repo = repository(
            vec![(record, body)],
            vec![AttachmentRecord {
                id: "7".to_string(),
                title: "a.png".to_string(),
            }],
        );
        let (_temp, paths) = temp_paths();
        let report = migrate(&repo, &MigrateConfig::default(), &paths, &Echo).expect("migrate");
        assert_eq!(report.emitted.len(), 1);
        assert_eq!(report.attachments.source_missing, 1);
        assert!(
            report
                .diagnostics
                .iter()
                .any(|diagnostic| diagnostic.kind == DiagnosticKind::AttachmentSourceMissing)
        );
    }

    #[test]
    fn hash_is_short_and_stable() {
        assert_eq!(compute_hash("abc"), compute_hash("abc"));
        assert_eq!(compute_hash("abc").len(), 16);
        assert_ne!(compute_hash("abc"), compute_hash("abd"));
    }
}
