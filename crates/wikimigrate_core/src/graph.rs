use std::cell::OnceCell;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use serde::Serialize;
use tracing::{debug, warn};

use crate::config::MigrateConfig;
use crate::directory::UserDirectory;
use crate::error::StructuralError;
use crate::export::{ExportRecords, PageRecord, UserRecord};
use crate::paths::{CURRENT_STATUS, id_order, slugify};

pub const BLOG_ROOT_ID: &str = "0";
pub const BLOG_ROOT_TITLE: &str = "Blog Posts";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PageIx(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct AttachmentIx(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct UserIx(usize);

#[derive(Debug, Clone)]
pub struct User {
    pub id: String,
    pub username: Option<String>,
    pub email: Option<String>,
    /// Target-system login.
    pub login: String,
    pub display_name: String,
}

#[derive(Debug)]
pub struct Attachment {
    pub id: String,
    pub title: String,
    owner: Option<PageIx>,
    resolved_filename: OnceCell<String>,
}

impl Attachment {
    pub fn owner(&self) -> Option<PageIx> {
        self.owner
    }

    pub fn resolved_filename(&self) -> Option<&str> {
        self.resolved_filename.get().map(String::as_str)
    }

    /// Return the memoized output filename, computing it on first use only.
    pub fn resolve_filename(&self, compute: impl FnOnce() -> String) -> &str {
        self.resolved_filename.get_or_init(compute)
    }
}

#[derive(Debug)]
pub struct Page {
    pub id: String,
    pub title: Option<String>,
    pub parent_id: Option<String>,
    pub version: u32,
    pub body_id: Option<String>,
    pub status: String,
    pub attachments: Vec<AttachmentIx>,
    pub historical_ids: Vec<String>,
    /// Filename segment derived from the title.
    pub filename: String,
    children: Vec<PageIx>,
    lineage: Vec<String>,
    superseded: bool,
    synthetic: bool,
}

impl Page {
    fn from_record(record: PageRecord, attachments: Vec<AttachmentIx>, synthetic: bool) -> Self {
        let filename = page_filename(&record.id, record.title.as_deref());
        Self {
            id: record.id,
            title: record.title,
            parent_id: record.parent_id,
            version: record.version,
            body_id: record.body_id,
            status: record.status,
            attachments,
            historical_ids: record.historical_ids,
            filename,
            children: Vec::new(),
            lineage: Vec::new(),
            superseded: false,
            synthetic,
        }
    }

    pub fn title_or_id(&self) -> String {
        match &self.title {
            Some(title) => title.clone(),
            None => format!("[ID:{}]", self.id),
        }
    }

    pub fn has_content(&self) -> bool {
        self.body_id.is_some()
    }

    pub fn is_current(&self) -> bool {
        self.status.eq_ignore_ascii_case(CURRENT_STATUS)
    }

    pub fn is_latest(&self) -> bool {
        !self.superseded
    }

    pub fn is_synthetic(&self) -> bool {
        self.synthetic
    }

    pub fn children(&self) -> &[PageIx] {
        &self.children
    }

    /// Filenames from the outermost ancestor down to this page.
    pub fn lineage(&self) -> &[String] {
        &self.lineage
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct GraphStats {
    pub users: usize,
    pub attachments: usize,
    pub page_versions: usize,
    pub latest_pages: usize,
    pub superseded_pages: usize,
    pub content_pages: usize,
    pub bodies: usize,
    pub by_status: BTreeMap<String, usize>,
}

#[derive(Debug)]
pub struct Repository {
    users: Vec<User>,
    attachments: Vec<Attachment>,
    pages: Vec<Page>,
    bodies: HashMap<String, String>,
    user_index: HashMap<String, UserIx>,
    attachment_index: HashMap<String, AttachmentIx>,
    page_index: HashMap<String, PageIx>,
    latest_by_title: BTreeMap<String, PageIx>,
    blog_root: PageIx,
}

impl Repository {
    pub fn build(
        records: ExportRecords,
        config: &MigrateConfig,
        directory: &dyn UserDirectory,
    ) -> Result<Self, StructuralError> {
        let ExportRecords {
            users: user_records,
            attachments: attachment_records,
            pages: page_records,
            blog_posts,
            bodies: body_records,
            ..
        } = records;

        let mut users = Vec::with_capacity(user_records.len());
        let mut user_index = HashMap::new();
        for record in user_records {
            if user_index.contains_key(&record.id) {
                return Err(duplicate("User", &record.id));
            }
            user_index.insert(record.id.clone(), UserIx(users.len()));
            users.push(build_user(record, config, directory));
        }

        let mut attachments = Vec::with_capacity(attachment_records.len());
        let mut attachment_index = HashMap::new();
        for record in attachment_records {
            if attachment_index.contains_key(&record.id) {
                return Err(duplicate("Attachment", &record.id));
            }
            attachment_index.insert(record.id.clone(), AttachmentIx(attachments.len()));
            attachments.push(Attachment {
                id: record.id,
                title: record.title,
                owner: None,
                resolved_filename: OnceCell::new(),
            });
        }

        let bodies = body_records
            .into_iter()
            .map(|record| (record.id, record.body))
            .collect::<HashMap<_, _>>();

        let mut pages = Vec::with_capacity(page_records.len() + blog_posts.len() + 1);
        let mut page_index = HashMap::new();

        let mut root_record = PageRecord::new(BLOG_ROOT_ID, BLOG_ROOT_TITLE, 0);
        root_record.status = CURRENT_STATUS.to_string();
        let blog_root = PageIx(0);
        page_index.insert(BLOG_ROOT_ID.to_string(), blog_root);
        pages.push(Page::from_record(root_record, Vec::new(), true));

        let blog_posts = blog_posts.into_iter().map(|mut record| {
            if record.parent_id.is_none() {
                record.parent_id = Some(BLOG_ROOT_ID.to_string());
            }
            record
        });
        for record in page_records.into_iter().chain(blog_posts) {
            if record.id == BLOG_ROOT_ID {
                return Err(StructuralError::ReservedId(record.id));
            }
            if page_index.contains_key(&record.id) {
                return Err(duplicate("Page", &record.id));
            }
            let mut owned = Vec::with_capacity(record.attachment_ids.len());
            for attachment_id in &record.attachment_ids {
                let Some(ix) = attachment_index.get(attachment_id) else {
                    return Err(StructuralError::MissingAttachment {
                        page: record.id.clone(),
                        attachment: attachment_id.clone(),
                    });
                };
                owned.push(*ix);
            }
            page_index.insert(record.id.clone(), PageIx(pages.len()));
            pages.push(Page::from_record(record, owned, false));
        }

        let mut repository = Self {
            users,
            attachments,
            pages,
            bodies,
            user_index,
            attachment_index,
            page_index,
            latest_by_title: BTreeMap::new(),
            blog_root,
        };
        repository.select_latest_versions();
        repository.build_hierarchy()?;
        repository.verify_bodies()?;
        Ok(repository)
    }

    /// Mark every page that is not the highest version of its title as superseded.
    fn select_latest_versions(&mut self) {
        let historical: HashSet<String> = self
            .pages
            .iter()
            .flat_map(|page| page.historical_ids.iter().cloned())
            .collect();

        let mut groups: BTreeMap<String, Vec<PageIx>> = BTreeMap::new();
        for ix in self.pages_in_id_order() {
            let page = &self.pages[ix.0];
            let key = match (&page.title, page.synthetic) {
                (_, true) => format!("#synthetic:{}", page.id),
                (Some(title), false) => title.clone(),
                (None, false) => format!("#untitled:{}", page.id),
            };
            groups.entry(key).or_default().push(ix);
        }

        for (key, members) in groups {
            let candidates: Vec<PageIx> = members
                .iter()
                .copied()
                .filter(|ix| !historical.contains(&self.pages[ix.0].id))
                .collect();
            let pool = if candidates.is_empty() {
                &members
            } else {
                &candidates
            };

            let mut latest = pool[0];
            for ix in pool.iter().copied().skip(1) {
                if self.pages[ix.0].version > self.pages[latest.0].version {
                    latest = ix;
                }
            }

            for ix in &members {
                self.pages[ix.0].superseded = *ix != latest;
            }
            if !key.starts_with('#') {
                self.latest_by_title.insert(key, latest);
            }
        }
    }

    /// Compute lineages, register children and claim attachment ownership.
    fn build_hierarchy(&mut self) -> Result<(), StructuralError> {
        for ix in 0..self.pages.len() {
            let lineage = self.walk_lineage(PageIx(ix))?;
            self.pages[ix].lineage = lineage;
        }

        for ix in self.latest_pages() {
            let page = &self.pages[ix.0];
            if !page.is_current() {
                continue;
            }
            let Some(parent_ix) = page
                .parent_id
                .as_deref()
                .and_then(|parent_id| self.page_index.get(parent_id).copied())
            else {
                continue;
            };
            let parent = &self.pages[parent_ix.0];
            if parent.is_latest() && parent.is_current() {
                self.pages[parent_ix.0].children.push(ix);
            } else {
                debug!(
                    "page '{}' not listed under parent {}: parent is superseded or not current",
                    page.title_or_id(),
                    parent.id
                );
            }
        }

        for ix in self.latest_pages() {
            for attachment in self.pages[ix.0].attachments.clone() {
                let slot = &mut self.attachments[attachment.0].owner;
                if slot.is_none() {
                    *slot = Some(ix);
                }
            }
        }
        Ok(())
    }

    fn walk_lineage(&self, start: PageIx) -> Result<Vec<String>, StructuralError> {
        let mut lineage = vec![self.pages[start.0].filename.clone()];
        let mut seen = HashSet::from([start]);
        let mut cursor = start;
        while let Some(parent_id) = self.pages[cursor.0].parent_id.as_deref() {
            let Some(parent) = self.page_index.get(parent_id).copied() else {
                if self.pages[start.0].is_latest() {
                    warn!(
                        "page '{}': parent {parent_id} is not in the export, treating it as a root",
                        self.pages[start.0].title_or_id()
                    );
                }
                break;
            };
            if !seen.insert(parent) {
                return Err(StructuralError::ParentCycle(self.pages[start.0].id.clone()));
            }
            lineage.push(self.pages[parent.0].filename.clone());
            cursor = parent;
        }
        lineage.reverse();
        Ok(lineage)
    }

    fn verify_bodies(&self) -> Result<(), StructuralError> {
        for ix in self.latest_pages() {
            let page = &self.pages[ix.0];
            if let Some(body_id) = &page.body_id
                && !self.bodies.contains_key(body_id)
            {
                return Err(StructuralError::MissingBody {
                    page: page.id.clone(),
                    body: body_id.clone(),
                });
            }
        }
        Ok(())
    }

    pub fn page(&self, ix: PageIx) -> &Page {
        &self.pages[ix.0]
    }

    pub fn page_ix(&self, id: &str) -> Option<PageIx> {
        self.page_index.get(id).copied()
    }

    pub fn page_by_id(&self, id: &str) -> Option<&Page> {
        self.page_ix(id).map(|ix| self.page(ix))
    }

    pub fn latest_by_title(&self, title: &str) -> Option<PageIx> {
        self.latest_by_title.get(title).copied()
    }

    pub fn blog_root(&self) -> PageIx {
        self.blog_root
    }

    pub fn attachment(&self, ix: AttachmentIx) -> &Attachment {
        &self.attachments[ix.0]
    }

    pub fn attachment_by_id(&self, id: &str) -> Option<&Attachment> {
        self.attachment_index.get(id).map(|ix| self.attachment(*ix))
    }

    pub fn user(&self, ix: UserIx) -> &User {
        &self.users[ix.0]
    }

    pub fn user_by_id(&self, id: &str) -> Option<&User> {
        self.user_index.get(id).map(|ix| self.user(*ix))
    }

    /// Find a user by declared username (the `ri:username` form of a mention).
    pub fn user_by_username(&self, username: &str) -> Option<&User> {
        self.users
            .iter()
            .find(|user| user.username.as_deref() == Some(username))
    }

    pub fn body(&self, page: &Page) -> Option<&str> {
        page.body_id
            .as_deref()
            .and_then(|body_id| self.bodies.get(body_id))
            .map(String::as_str)
    }

    pub fn pages_in_id_order(&self) -> Vec<PageIx> {
        let mut ixs: Vec<PageIx> = (0..self.pages.len()).map(PageIx).collect();
        ixs.sort_by(|left, right| id_order(&self.pages[left.0].id, &self.pages[right.0].id));
        ixs
    }

    /// Latest pages, in id order.
    pub fn latest_pages(&self) -> Vec<PageIx> {
        self.pages_in_id_order()
            .into_iter()
            .filter(|ix| self.pages[ix.0].is_latest())
            .collect()
    }

    /// Export ids of every attachment known to the graph.
    pub fn attachment_ids(&self) -> BTreeSet<&str> {
        self.attachments
            .iter()
            .map(|attachment| attachment.id.as_str())
            .collect()
    }

    pub fn stats(&self) -> GraphStats {
        let mut stats = GraphStats {
            users: self.users.len(),
            attachments: self.attachments.len(),
            bodies: self.bodies.len(),
            ..GraphStats::default()
        };
        for page in self.pages.iter().filter(|page| !page.synthetic) {
            stats.page_versions += 1;
            if page.is_latest() {
                stats.latest_pages += 1;
                if page.has_content() {
                    stats.content_pages += 1;
                }
                *stats
                    .by_status
                    .entry(page.status.to_lowercase())
                    .or_insert(0) += 1;
            } else {
                stats.superseded_pages += 1;
            }
        }
        stats
    }
}

fn duplicate(class: &str, id: &str) -> StructuralError {
    StructuralError::DuplicateId {
        class: class.to_string(),
        id: id.to_string(),
    }
}

fn page_filename(id: &str, title: Option<&str>) -> String {
    match title {
        None => format!("untitled_{id}"),
        Some(title) => {
            let slug = slugify(title);
            if slug.is_empty() {
                format!("page_{id}")
            } else {
                slug
            }
        }
    }
}

fn build_user(record: UserRecord, config: &MigrateConfig, directory: &dyn UserDirectory) -> User {
    let login = record
        .username
        .as_deref()
        .map(|username| config.target_login(username).to_string())
        .unwrap_or_else(|| record.id.clone());
    let display_name = directory
        .lookup_display_name(&login)
        .or_else(|| record.email.as_deref().and_then(name_from_email))
        .unwrap_or_else(|| login.clone());
    User {
        id: record.id,
        username: record.username,
        email: record.email,
        login,
        display_name,
    }
}

/// `first.last@host` → `first last`.
fn name_from_email(email: &str) -> Option<String> {
    let local = email.split('@').next()?.trim();
    if local.is_empty() {
        return None;
    }
    let parts: Vec<&str> = local.split('.').filter(|part| !part.is_empty()).collect();
    match parts.as_slice() {
        [] => None,
        [only] => Some(only.to_string()),
        [first, last, ..] => Some(format!("{first} {last}")),
    }
}
