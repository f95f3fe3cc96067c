use std::collections::HashSet;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};

use crate::config::{DEFAULT_ENTITIES_FILE, DEFAULT_OUTPUT_DIR, MigrateConfig, render_default_config};

pub const CONFIG_FILENAME: &str = "wikimigrate.toml";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueSource {
    Flag,
    Env,
    Config,
    Heuristic,
    Default,
}

impl ValueSource {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flag => "flag",
            Self::Env => "env",
            Self::Config => "config",
            Self::Heuristic => "heuristic",
            Self::Default => "default",
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct PathOverrides {
    pub export_dir: Option<PathBuf>,
    pub output_dir: Option<PathBuf>,
    pub config: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ResolutionContext {
    pub cwd: PathBuf,
}

impl ResolutionContext {
    pub fn from_process() -> Result<Self> {
        let cwd = env::current_dir().context("failed to read current directory")?;
        Ok(Self { cwd })
    }
}

#[derive(Debug, Clone)]
pub struct ResolvedPaths {
    pub export_dir: PathBuf,
    pub output_dir: PathBuf,
    pub config_path: PathBuf,
    pub export_source: ValueSource,
    pub output_source: ValueSource,
    pub config_source: ValueSource,
}

impl ResolvedPaths {
    /// Apply `[output] dir` from the config unless a flag or env var already chose the output.
    pub fn with_config(mut self, config: &MigrateConfig) -> Self {
        if self.output_source == ValueSource::Default
            && let Some(dir) = config.output.dir.as_deref()
        {
            self.output_dir = absolutize(Path::new(dir), &self.export_dir);
            self.output_source = ValueSource::Config;
        }
        self
    }

    pub fn entities_path(&self, config: &MigrateConfig) -> PathBuf {
        absolutize(Path::new(config.entities_file()), &self.export_dir)
    }

    pub fn attachments_dir(&self, config: &MigrateConfig) -> PathBuf {
        absolutize(Path::new(config.attachments_dir()), &self.export_dir)
    }

    pub fn diagnostics(&self) -> String {
        format!(
            "export_dir={} ({})\noutput_dir={} ({})\nconfig_path={} ({})",
            normalize_for_display(&self.export_dir),
            self.export_source.as_str(),
            normalize_for_display(&self.output_dir),
            self.output_source.as_str(),
            normalize_for_display(&self.config_path),
            self.config_source.as_str(),
        )
    }
}

#[derive(Debug, Clone)]
pub struct RuntimeStatus {
    pub export_dir_exists: bool,
    pub entities_exists: bool,
    pub entities_size_bytes: Option<u64>,
    pub attachments_exists: bool,
    pub output_exists: bool,
    pub config_exists: bool,
    pub warnings: Vec<String>,
}

pub fn inspect_runtime(paths: &ResolvedPaths, config: &MigrateConfig) -> Result<RuntimeStatus> {
    let entities_path = paths.entities_path(config);
    let attachments_dir = paths.attachments_dir(config);
    let entities_exists = entities_path.exists();
    let entities_size_bytes = if entities_exists {
        let metadata = fs::metadata(&entities_path)
            .with_context(|| format!("failed to inspect {}", entities_path.display()))?;
        Some(metadata.len())
    } else {
        None
    };
    let attachments_exists = attachments_dir.exists();

    let mut warnings = Vec::new();
    if !entities_exists {
        warnings.push(format!(
            "{} is missing; point --export-dir at an unpacked space export",
            normalize_for_display(&entities_path)
        ));
    }
    if !attachments_exists {
        warnings.push(format!(
            "{} is missing; attachment links will be written without files",
            normalize_for_display(&attachments_dir)
        ));
    }

    Ok(RuntimeStatus {
        export_dir_exists: paths.export_dir.exists(),
        entities_exists,
        entities_size_bytes,
        attachments_exists,
        output_exists: paths.output_dir.exists(),
        config_exists: paths.config_path.exists(),
        warnings,
    })
}

#[derive(Debug, Clone, Default)]
pub struct InitOptions {
    pub force: bool,
}

#[derive(Debug, Clone)]
pub struct InitReport {
    pub created_dirs: Vec<PathBuf>,
    pub wrote_config: bool,
}

pub fn resolve_paths(
    context: &ResolutionContext,
    overrides: &PathOverrides,
) -> Result<ResolvedPaths> {
    resolve_paths_with_lookup(context, overrides, |key| env::var(key).ok())
}

fn resolve_paths_with_lookup<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: F,
) -> Result<ResolvedPaths>
where
    F: Fn(&str) -> Option<String>,
{
    let (export_dir, export_source) = resolve_export_dir(context, overrides, &lookup_env);

    let (output_dir, output_source) = if let Some(path) = overrides.output_dir.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_OUTPUT_DIR")) {
        (
            absolutize(Path::new(value.trim()), &export_dir),
            ValueSource::Env,
        )
    } else {
        (export_dir.join(DEFAULT_OUTPUT_DIR), ValueSource::Default)
    };

    let (config_path, config_source) = if let Some(path) = overrides.config.as_deref() {
        (absolutize(path, &context.cwd), ValueSource::Flag)
    } else if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_CONFIG")) {
        (
            absolutize(Path::new(value.trim()), &export_dir),
            ValueSource::Env,
        )
    } else {
        (export_dir.join(CONFIG_FILENAME), ValueSource::Default)
    };

    if export_dir.is_file() {
        bail!(
            "export directory {} is a file; pass the directory that contains {DEFAULT_ENTITIES_FILE}",
            normalize_for_display(&export_dir)
        );
    }

    Ok(ResolvedPaths {
        export_dir,
        output_dir,
        config_path,
        export_source,
        output_source,
        config_source,
    })
}

pub fn init_layout(paths: &ResolvedPaths, options: &InitOptions) -> Result<InitReport> {
    let mut created_dirs = Vec::new();
    for dir in [&paths.export_dir, &paths.output_dir] {
        if !dir.exists() {
            fs::create_dir_all(dir)
                .with_context(|| format!("failed to create {}", dir.display()))?;
            created_dirs.push(dir.clone());
        }
    }

    let wrote_config = write_text_file(&paths.config_path, &render_default_config(), options.force)?;

    Ok(InitReport {
        created_dirs,
        wrote_config,
    })
}

fn resolve_export_dir<F>(
    context: &ResolutionContext,
    overrides: &PathOverrides,
    lookup_env: &F,
) -> (PathBuf, ValueSource)
where
    F: Fn(&str) -> Option<String>,
{
    if let Some(path) = overrides.export_dir.as_deref() {
        return (absolutize(path, &context.cwd), ValueSource::Flag);
    }

    if let Some(value) = non_empty(lookup_env("WIKIMIGRATE_EXPORT_DIR")) {
        return (
            absolutize(Path::new(value.trim()), &context.cwd),
            ValueSource::Env,
        );
    }

    match detect_export_dir_heuristic(&context.cwd) {
        Some(dir) => (dir, ValueSource::Heuristic),
        None => (context.cwd.clone(), ValueSource::Default),
    }
}

/// Nearest ancestor of `cwd` (inclusive) holding an `entities.xml`.
fn detect_export_dir_heuristic(cwd: &Path) -> Option<PathBuf> {
    let mut seen = HashSet::new();
    for candidate in cwd.ancestors() {
        if !seen.insert(normalize_for_display(candidate)) {
            continue;
        }
        if candidate.join(DEFAULT_ENTITIES_FILE).is_file() {
            return Some(candidate.to_path_buf());
        }
    }
    None
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|value| !value.trim().is_empty())
}

fn absolutize(path: &Path, base: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        base.join(path)
    }
}

/// Write `content` to `path`, creating parent directories. An existing file is
/// kept unless `force` is set; returns whether a write happened.
pub fn write_text_file(path: &Path, content: &str, force: bool) -> Result<bool> {
    if path.exists() && !force {
        return Ok(false);
    }

    let parent = path
        .parent()
        .ok_or_else(|| anyhow::anyhow!("path has no parent: {}", path.display()))?;
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create parent directory {}", parent.display()))?;
    fs::write(path, content).with_context(|| format!("failed to write {}", path.display()))?;
    Ok(true)
}

pub fn normalize_for_display(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
