use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, CommandFactory, Parser, Subcommand};
use tracing::debug;
use tracing_subscriber::EnvFilter;
use wikimigrate_core::attachments::scan_store;
use wikimigrate_core::config::{MigrateConfig, load_config};
use wikimigrate_core::directory::StaticDirectory;
use wikimigrate_core::pipeline::{load_repository, migrate, plan_emissions, render_page};
use wikimigrate_core::runtime::{
    InitOptions, PathOverrides, ResolutionContext, ResolvedPaths, init_layout, inspect_runtime,
    resolve_paths,
};
use wikimigrate_core::serialize::HtmdSerializer;

#[derive(Debug, Parser)]
#[command(
    name = "wikimigrate",
    version,
    about = "Convert a space export (entities.xml + attachments) into a file-based wiki tree"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH")]
    export_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    output_dir: Option<PathBuf>,
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,
    #[arg(long, global = true, help = "Print resolved runtime diagnostics")]
    diagnostics: bool,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone)]
struct RuntimeOptions {
    export_dir: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    config: Option<PathBuf>,
    diagnostics: bool,
}

impl RuntimeOptions {
    fn from_cli(cli: &Cli) -> Self {
        Self {
            export_dir: cli.export_dir.clone(),
            output_dir: cli.output_dir.clone(),
            config: cli.config.clone(),
            diagnostics: cli.diagnostics,
        }
    }
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Create the output directory and a default wikimigrate.toml")]
    Init(InitArgs),
    #[command(about = "Summarize the export and the attachment store without writing")]
    Inspect,
    #[command(about = "Write every page and materialize its attachments")]
    Migrate(MigrateArgs),
    #[command(about = "Print one converted page to stdout")]
    Render(RenderArgs),
}

#[derive(Debug, Args)]
struct InitArgs {
    #[arg(long, help = "Overwrite an existing config file")]
    force: bool,
}

#[derive(Debug, Args)]
struct MigrateArgs {
    #[arg(long, help = "Print the migration report as JSON")]
    json: bool,
}

#[derive(Debug, Args)]
struct RenderArgs {
    /// Page title (or export id)
    title: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let runtime = RuntimeOptions::from_cli(&cli);

    match cli.command {
        Some(Commands::Init(args)) => run_init(&runtime, args),
        Some(Commands::Inspect) => run_inspect(&runtime),
        Some(Commands::Migrate(args)) => run_migrate(&runtime, args),
        Some(Commands::Render(args)) => run_render(&runtime, args),
        None => {
            let mut command = Cli::command();
            command.print_help()?;
            println!();
            Ok(())
        }
    }
}

fn run_init(runtime: &RuntimeOptions, args: InitArgs) -> Result<()> {
    let (paths, _) = resolve_runtime(runtime)?;
    let report = init_layout(&paths, &InitOptions { force: args.force })?;

    println!("Initialized wikimigrate layout");
    println!("export_dir: {}", normalize_path(&paths.export_dir));
    println!("output_dir: {}", normalize_path(&paths.output_dir));
    println!("config_path: {}", normalize_path(&paths.config_path));
    println!("created_dirs: {}", report.created_dirs.len());
    println!("wrote_config: {}", format_flag(report.wrote_config));
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_inspect(runtime: &RuntimeOptions) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let status = inspect_runtime(&paths, &config)?;

    println!("inspect");
    println!("export_dir: {}", normalize_path(&paths.export_dir));
    println!(
        "entities: {} ({})",
        normalize_path(&paths.entities_path(&config)),
        match status.entities_size_bytes {
            Some(bytes) => format!("{bytes} bytes"),
            None => "missing".to_string(),
        }
    );
    println!("attachments_exists: {}", format_flag(status.attachments_exists));
    println!("output_exists: {}", format_flag(status.output_exists));
    println!("config_exists: {}", format_flag(status.config_exists));
    println!("naming: {}", config.layout().naming.as_str());

    if status.entities_exists {
        let directory = StaticDirectory::new(config.directory.clone());
        let repo = load_repository(&paths, &config, &directory)?;
        let stats = repo.stats();
        println!("users: {}", stats.users);
        println!("attachments: {}", stats.attachments);
        println!("page_versions: {}", stats.page_versions);
        println!("latest_pages: {}", stats.latest_pages);
        println!("superseded_pages: {}", stats.superseded_pages);
        println!("content_pages: {}", stats.content_pages);
        println!("bodies: {}", stats.bodies);
        for (status, count) in &stats.by_status {
            println!("status.{status}: {count}");
        }
        println!("planned_pages: {}", plan_emissions(&repo, &config).len());

        let scan = scan_store(&paths.attachments_dir(&config), &repo.attachment_ids())?;
        println!("store.page_dirs: {}", scan.page_dirs);
        println!("store.attachment_dirs: {}", scan.attachment_dirs);
        println!("store.version_files: {}", scan.version_files);
        println!("store.total_bytes: {}", scan.total_bytes);
        for (page_id, attachment_ids) in &scan.unknown {
            println!("store.unknown.{page_id}: {}", attachment_ids.join(", "));
        }
    }

    if !status.warnings.is_empty() {
        println!("warnings:");
        for warning in &status.warnings {
            println!("  - {warning}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_migrate(runtime: &RuntimeOptions, args: MigrateArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let directory = StaticDirectory::new(config.directory.clone());
    let repo = load_repository(&paths, &config, &directory)?;
    let serializer = HtmdSerializer::new();
    let report = migrate(&repo, &config, &paths, &serializer)?;

    if args.json {
        let json =
            serde_json::to_string_pretty(&report).context("failed to encode migration report")?;
        println!("{json}");
    } else {
        println!("migrate");
        println!("output_dir: {}", normalize_path(&paths.output_dir));
        println!("planned: {}", report.planned);
        println!("emitted: {}", report.emitted.len());
        println!("skipped_empty: {}", report.skipped_empty);
        println!("superseded: {}", report.superseded);
        println!("failed: {}", report.failures.len());
        println!("attachments.linked: {}", report.attachments.linked);
        println!("attachments.copied: {}", report.attachments.copied);
        println!(
            "attachments.already_present: {}",
            report.attachments.already_present
        );
        println!(
            "attachments.source_missing: {}",
            report.attachments.source_missing
        );
        println!("diagnostics: {}", report.diagnostics.len());
        for failure in &report.failures {
            println!("  ! {} [{}]: {}", failure.title, failure.page_id, failure.error);
        }
        for diagnostic in &report.diagnostics {
            println!("  - {diagnostic}");
        }
    }
    if runtime.diagnostics {
        println!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn run_render(runtime: &RuntimeOptions, args: RenderArgs) -> Result<()> {
    let (paths, config) = resolve_runtime(runtime)?;
    let directory = StaticDirectory::new(config.directory.clone());
    let repo = load_repository(&paths, &config, &directory)?;
    let rendered = render_page(&repo, &config, &HtmdSerializer::new(), &args.title)?;

    println!("{}", rendered.text);
    eprintln!("path: {}", rendered.location.relative_path);
    eprintln!("wiki_id: {}", rendered.location.wiki_id);
    for diagnostic in &rendered.diagnostics {
        eprintln!("  - {diagnostic}");
    }
    if runtime.diagnostics {
        eprintln!("\n[diagnostics]\n{}", paths.diagnostics());
    }
    Ok(())
}

fn resolve_runtime(runtime: &RuntimeOptions) -> Result<(ResolvedPaths, MigrateConfig)> {
    let paths = resolve_runtime_paths(runtime)?;
    let config = load_config(&paths.config_path)?;
    let paths = paths.with_config(&config);
    debug!("resolved runtime paths\n{}", paths.diagnostics());
    Ok((paths, config))
}

fn resolve_runtime_paths(runtime: &RuntimeOptions) -> Result<ResolvedPaths> {
    dotenvy::dotenv().ok();

    let context = ResolutionContext::from_process()?;
    let overrides = PathOverrides {
        export_dir: runtime.export_dir.clone(),
        output_dir: runtime.output_dir.clone(),
        config: runtime.config.clone(),
    };

    let initial = resolve_paths(&context, &overrides)?;
    let export_env = initial.export_dir.join(".env");
    if export_env.exists() {
        let _ = dotenvy::from_path_override(&export_env);
    }

    resolve_paths(&context, &overrides)
}

fn normalize_path(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}

fn format_flag(value: bool) -> &'static str {
    if value { "yes" } else { "no" }
}
