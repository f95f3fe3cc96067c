use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::debug;
use walkdir::WalkDir;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MaterializeMode {
    /// Hard link, falling back to a copy when the file system refuses the link.
    #[default]
    Link,
    Copy,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MaterializeOutcome {
    Linked,
    Copied,
    AlreadyPresent,
    SourceMissing,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MaterializeCounts {
    pub linked: usize,
    pub copied: usize,
    pub already_present: usize,
    pub source_missing: usize,
}

impl MaterializeCounts {
    pub fn record(&mut self, outcome: MaterializeOutcome) {
        match outcome {
            MaterializeOutcome::Linked => self.linked += 1,
            MaterializeOutcome::Copied => self.copied += 1,
            MaterializeOutcome::AlreadyPresent => self.already_present += 1,
            MaterializeOutcome::SourceMissing => self.source_missing += 1,
        }
    }

    pub fn written(&self) -> usize {
        self.linked + self.copied
    }
}

/// `attachments/<pageId>/<attachmentId>`
pub fn source_dir(attachments_root: &Path, page_id: &str, attachment_id: &str) -> PathBuf {
    attachments_root.join(page_id).join(attachment_id)
}

/// The highest integer-named file in an attachment's version directory.
pub fn latest_version_file(dir: &Path) -> Result<Option<PathBuf>> {
    if !dir.is_dir() {
        return Ok(None);
    }
    let mut latest: Option<(u64, PathBuf)> = None;
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry.with_context(|| format!("failed to read entry in {}", dir.display()))?;
        let Some(version) = entry
            .file_name()
            .to_str()
            .and_then(|name| name.parse::<u64>().ok())
        else {
            continue;
        };
        if latest.as_ref().is_none_or(|(best, _)| version > *best) {
            latest = Some((version, entry.path()));
        }
    }
    Ok(latest.map(|(_, path)| path))
}

/// Place the newest version of an attachment at `dest`.
///
/// An existing destination is left untouched, so re-runs perform no writes.
pub fn materialize(source: &Path, dest: &Path, mode: MaterializeMode) -> Result<MaterializeOutcome> {
    if dest.exists() {
        return Ok(MaterializeOutcome::AlreadyPresent);
    }
    let Some(latest) = latest_version_file(source)? else {
        return Ok(MaterializeOutcome::SourceMissing);
    };

    let parent = dest
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", dest.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;

    if mode == MaterializeMode::Link {
        match fs::hard_link(&latest, dest) {
            Ok(()) => return Ok(MaterializeOutcome::Linked),
            Err(err) => debug!(
                "hard link {} -> {} failed ({err}); copying instead",
                latest.display(),
                dest.display()
            ),
        }
    }
    fs::copy(&latest, dest).with_context(|| {
        format!("failed to copy {} to {}", latest.display(), dest.display())
    })?;
    Ok(MaterializeOutcome::Copied)
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct StoreScan {
    pub page_dirs: usize,
    pub attachment_dirs: usize,
    pub version_files: usize,
    pub total_bytes: u64,
    /// Attachment directories whose id is not in the export, keyed by page id.
    pub unknown: BTreeMap<String, Vec<String>>,
}

/// Walk `attachments/<pageId>/<attachmentId>/<version>` and summarize it.
pub fn scan_store(root: &Path, known_attachments: &BTreeSet<&str>) -> Result<StoreScan> {
    let mut scan = StoreScan::default();
    if !root.exists() {
        return Ok(scan);
    }
    for entry in WalkDir::new(root).min_depth(1).max_depth(3).sort_by_file_name() {
        let entry = entry.with_context(|| format!("failed to scan {}", root.display()))?;
        match entry.depth() {
            1 if entry.file_type().is_dir() => scan.page_dirs += 1,
            2 if entry.file_type().is_dir() => {
                scan.attachment_dirs += 1;
                let attachment_id = entry.file_name().to_string_lossy().to_string();
                if !known_attachments.contains(attachment_id.as_str()) {
                    let page_id = entry
                        .path()
                        .parent()
                        .and_then(Path::file_name)
                        .map(|name| name.to_string_lossy().to_string())
                        .unwrap_or_default();
                    scan.unknown.entry(page_id).or_default().push(attachment_id);
                }
            }
            3 if entry.file_type().is_file() => {
                scan.version_files += 1;
                let metadata = entry
                    .metadata()
                    .with_context(|| format!("failed to inspect {}", entry.path().display()))?;
                scan.total_bytes += metadata.len();
            }
            _ => {}
        }
    }
    Ok(scan)
}
