use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use env_logger::{Builder, Env, Target};
use planetsync_core::assets::FsAssetStore;
use planetsync_core::audit::{AuditOptions, run_audit};
use planetsync_core::classify::Category;
use planetsync_core::config::{
    DEFAULT_CONFIG_FILENAME, ToolConfig, credentials_from_env, load_config,
};
use planetsync_core::error::PlanetError;
use planetsync_core::geometry::neighbors_within;
use planetsync_core::images::{ImageOptions, run_image_update};
use planetsync_core::records::{Selection, SystemRecord, parse_table, select_systems};
use planetsync_core::remote::{MediaWikiClient, MediaWikiClientConfig};
use planetsync_core::report::ReportWriter;

#[derive(Debug, Parser)]
#[command(
    name = "planetsync",
    version,
    about = "Reconcile the SUC coordinate table with BattleTechWiki system articles"
)]
struct Cli {
    #[arg(long, global = true, value_name = "PATH", default_value = DEFAULT_CONFIG_FILENAME)]
    config: PathBuf,
    #[arg(long, global = true, value_name = "PATH", help = "Coordinate table (TSV)")]
    input: Option<PathBuf>,
    #[arg(short, long, global = true, help = "Enable debug logging")]
    verbose: bool,
    #[arg(short, long, global = true, help = "Only log warnings and errors")]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    #[command(about = "Classify every selected system and write the audit report")]
    Audit(AuditArgs),
    #[command(about = "Upload neighborhood maps and point articles at them")]
    Images(ImagesArgs),
    #[command(about = "List systems within a distance of a system")]
    Nearby(NearbyArgs),
}

#[derive(Debug, Args)]
struct AuditArgs {
    #[arg(
        value_name = "SELECTION",
        help = "N (first N), +NAME (from NAME on), or NAME (only NAME)"
    )]
    selection: Option<String>,
    #[arg(long, value_name = "PATH", help = "Report path")]
    output: Option<PathBuf>,
    #[arg(long, help = "Save auto-fixable coordinate corrections")]
    apply: bool,
    #[arg(long, value_name = "N", help = "Records checked in parallel")]
    concurrency: Option<usize>,
}

#[derive(Debug, Args)]
struct ImagesArgs {
    #[arg(value_name = "SELECTION")]
    selection: Option<String>,
    #[arg(long, help = "Show changes without writing to the wiki")]
    pretend: bool,
    #[arg(long, help = "Compare remote image versions and upload when needed")]
    check_remote: bool,
    #[arg(long, help = "Re-upload current images to refresh their descriptions")]
    force_comment_edit: bool,
}

#[derive(Debug, Args)]
struct NearbyArgs {
    system: String,
    #[arg(value_name = "MAX_DISTANCE", default_value_t = 60.0)]
    max_distance: f64,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let _ = dotenvy::dotenv();
    init_logging(cli.verbose, cli.quiet);

    let config = load_config(&cli.config)?;
    let input = cli
        .input
        .clone()
        .unwrap_or_else(|| config.audit.input.clone());
    let records = read_records(&input)?;

    match cli.command {
        Commands::Audit(args) => run_audit_command(&config, &records, args),
        Commands::Images(args) => run_images_command(&config, &records, args),
        Commands::Nearby(args) => run_nearby(&records, args),
    }
}

fn init_logging(verbose: bool, quiet: bool) {
    let mut builder = Builder::from_env(Env::default().default_filter_or("info"));
    if verbose {
        builder.filter_level(log::LevelFilter::Debug);
    } else if quiet {
        builder.filter_level(log::LevelFilter::Warn);
    }
    builder
        .target(Target::Stderr)
        .format(|buf, record| writeln!(buf, "[{}] {}", record.level(), record.args()))
        .init();
}

fn read_records(path: &Path) -> Result<Vec<SystemRecord>> {
    let content =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    let records = parse_table(&content);
    log::debug!("read {} systems from {}", records.len(), path.display());
    Ok(records)
}

fn connect(config: &ToolConfig, login: bool) -> Result<MediaWikiClient> {
    let client = MediaWikiClient::new(MediaWikiClientConfig::from_config(config))?;
    if login {
        let (username, password) = credentials_from_env()?;
        log::info!("Logging in...");
        client.login(&username, &password)?;
    }
    Ok(client)
}

fn run_audit_command(config: &ToolConfig, records: &[SystemRecord], args: AuditArgs) -> Result<()> {
    let selection = Selection::parse(args.selection.as_deref());
    let selected = select_systems(records, &selection)?;
    let client = connect(config, args.apply)?;

    let mut options = AuditOptions::from_config(config);
    options.apply = args.apply;
    if let Some(concurrency) = args.concurrency {
        options.concurrency = concurrency.max(1);
    }

    let output = args.output.unwrap_or_else(|| config.audit.output.clone());
    let mut report = ReportWriter::create(&output)?;
    let summary = run_audit(&client, selected, &options, &mut report)?;

    println!("audit complete");
    println!("report: {}", output.display());
    println!("systems: {}", summary.written);
    for category in Category::ALL {
        let count = summary.count(category);
        if count > 0 {
            println!("{category}: {count}");
        }
    }
    if options.apply {
        println!("fixed: {}", summary.fixed);
    }
    println!("requests: {}", client.request_count());
    Ok(())
}

fn run_images_command(
    config: &ToolConfig,
    records: &[SystemRecord],
    args: ImagesArgs,
) -> Result<()> {
    let selection = Selection::parse(args.selection.as_deref());
    let selected = select_systems(records, &selection)?;
    let client = connect(config, !args.pretend)?;
    let assets = FsAssetStore::new(&config.images.dir);

    let mut options = ImageOptions::from_config(config);
    options.pretend = args.pretend;
    if args.check_remote {
        options.skip_remote_check = false;
    }
    if args.force_comment_edit {
        options.force_comment_edit = true;
    }

    let report = run_image_update(&client, &assets, records, selected, &options)?;

    println!("images complete{}", if report.pretend { " (pretend)" } else { "" });
    println!("uploaded: {}", report.uploaded.len());
    println!("updated: {}", report.updated);
    println!("unchanged: {}", report.unchanged);
    println!("failed: {}", report.failed);
    for page in report.pages.iter().filter(|page| page.action == "error") {
        println!(
            "  - {}: {}",
            page.title,
            page.detail.as_deref().unwrap_or("error")
        );
    }
    println!("requests: {}", client.request_count());
    Ok(())
}

fn run_nearby(records: &[SystemRecord], args: NearbyArgs) -> Result<()> {
    let target = records
        .iter()
        .find(|record| record.matches(&args.system))
        .ok_or_else(|| PlanetError::NotFound(args.system.clone()))?;
    let neighbors = neighbors_within(target, records, args.max_distance)?;

    println!("{} systems within {} of {}", neighbors.len(), args.max_distance, target.name);
    for neighbor in &neighbors {
        println!("{}", neighbor.name);
    }
    Ok(())
}
