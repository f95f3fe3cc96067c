use std::collections::BTreeMap;
use std::env;
use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::attachments::MaterializeMode;
use crate::paths::{NamingMode, OutputLayout};

pub const DEFAULT_ENTITIES_FILE: &str = "entities.xml";
pub const DEFAULT_ATTACHMENTS_DIR: &str = "attachments";
pub const DEFAULT_OUTPUT_DIR: &str = "out";
pub const DEFAULT_PAGES_DIR: &str = "pages";
pub const DEFAULT_MEDIA_DIR: &str = "media";
pub const DEFAULT_NAMESPACE: &str = "oldwiki";
pub const DEFAULT_EXTENSION: &str = "txt";
pub const DEFAULT_MOST_RECENT_PAGE: &str = "most_recent_page.md";
pub const DEFAULT_PROGRESS_STEP: u32 = 10;

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct MigrateConfig {
    #[serde(default)]
    pub export: ExportSection,
    #[serde(default)]
    pub output: OutputSection,
    /// Export username → target-system login.
    #[serde(default)]
    pub users: BTreeMap<String, String>,
    /// Target-system login → display name.
    #[serde(default)]
    pub directory: BTreeMap<String, String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct ExportSection {
    pub entities: Option<String>,
    pub attachments_dir: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Serialize, Default, PartialEq, Eq)]
pub struct OutputSection {
    pub dir: Option<String>,
    pub pages_dir: Option<String>,
    pub media_dir: Option<String>,
    pub namespace: Option<String>,
    pub extension: Option<String>,
    pub naming: Option<NamingMode>,
    pub materialize: Option<MaterializeMode>,
    pub most_recent_page: Option<String>,
    pub append_attachment_index: Option<bool>,
    pub include_non_current: Option<bool>,
    pub progress_step: Option<u32>,
}

impl MigrateConfig {
    pub fn entities_file(&self) -> &str {
        self.export
            .entities
            .as_deref()
            .unwrap_or(DEFAULT_ENTITIES_FILE)
    }

    pub fn attachments_dir(&self) -> &str {
        self.export
            .attachments_dir
            .as_deref()
            .unwrap_or(DEFAULT_ATTACHMENTS_DIR)
    }

    pub fn output_dir(&self) -> &str {
        self.output.dir.as_deref().unwrap_or(DEFAULT_OUTPUT_DIR)
    }

    /// Resolve the wiki namespace: env WIKIMIGRATE_NAMESPACE > config > DEFAULT_NAMESPACE.
    pub fn namespace(&self) -> String {
        if let Ok(value) = env::var("WIKIMIGRATE_NAMESPACE") {
            let trimmed = value.trim().trim_matches(':').to_string();
            if !trimmed.is_empty() {
                return trimmed;
            }
        }
        self.output
            .namespace
            .clone()
            .unwrap_or_else(|| DEFAULT_NAMESPACE.to_string())
    }

    pub fn materialize_mode(&self) -> MaterializeMode {
        self.output.materialize.unwrap_or_default()
    }

    pub fn most_recent_page(&self) -> &str {
        self.output
            .most_recent_page
            .as_deref()
            .unwrap_or(DEFAULT_MOST_RECENT_PAGE)
    }

    pub fn append_attachment_index(&self) -> bool {
        self.output.append_attachment_index.unwrap_or(true)
    }

    /// Emit latest pages whose status is not `current` (archived, draft) under their status directory.
    pub fn include_non_current(&self) -> bool {
        self.output.include_non_current.unwrap_or(false)
    }

    /// Progress is logged every `progress_step` percent; clamped to 1..=100.
    pub fn progress_step(&self) -> u32 {
        self.output
            .progress_step
            .unwrap_or(DEFAULT_PROGRESS_STEP)
            .clamp(1, 100)
    }

    /// Map an export username to the target-system login, falling back to the username.
    pub fn target_login<'a>(&'a self, username: &'a str) -> &'a str {
        self.users
            .get(username)
            .map(String::as_str)
            .unwrap_or(username)
    }

    pub fn layout(&self) -> OutputLayout {
        OutputLayout {
            pages_dir: self
                .output
                .pages_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_PAGES_DIR.to_string()),
            media_dir: self
                .output
                .media_dir
                .clone()
                .unwrap_or_else(|| DEFAULT_MEDIA_DIR.to_string()),
            namespace: self.namespace(),
            extension: self
                .output
                .extension
                .clone()
                .unwrap_or_else(|| DEFAULT_EXTENSION.to_string()),
            naming: self.output.naming.unwrap_or_default(),
        }
    }
}

/// Load and parse a MigrateConfig from a TOML file. Returns default if file doesn't exist.
pub fn load_config(config_path: &Path) -> Result<MigrateConfig> {
    if !config_path.exists() {
        return Ok(MigrateConfig::default());
    }
    let content = fs::read_to_string(config_path)
        .with_context(|| format!("failed to read {}", config_path.display()))?;
    let parsed: MigrateConfig = toml::from_str(&content)
        .with_context(|| format!("failed to parse {}", config_path.display()))?;
    Ok(parsed)
}

pub fn render_default_config() -> String {
    format!(
        "# wikimigrate configuration (materialized by `wikimigrate init`)\n\n[export]\nentities = \"{DEFAULT_ENTITIES_FILE}\"\nattachments_dir = \"{DEFAULT_ATTACHMENTS_DIR}\"\n\n[output]\ndir = \"{DEFAULT_OUTPUT_DIR}\"\npages_dir = \"{DEFAULT_PAGES_DIR}\"\nmedia_dir = \"{DEFAULT_MEDIA_DIR}\"\nnamespace = \"{DEFAULT_NAMESPACE}\"\nextension = \"{DEFAULT_EXTENSION}\"\n# \"hierarchical\" (latest version only) or \"versioned\" (every version, name=<version>)\nnaming = \"hierarchical\"\n# \"link\" (hard link, copy when linking fails) or \"copy\"\nmaterialize = \"link\"\nmost_recent_page = \"{DEFAULT_MOST_RECENT_PAGE}\"\nappend_attachment_index = true\n# also emit archived/draft pages under pages/<status>/\ninclude_non_current = false\nprogress_step = {DEFAULT_PROGRESS_STEP}\n\n# Export usernames that differ from the target system's logins:\n[users]\n# jsmith = \"js123\"\n\n# Display names by target login:\n[directory]\n# js123 = \"John Smith\"\n",
    )
}
