use anyhow::{Context, Result};
use clap::{Arg, ArgAction, ArgMatches, Command};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use media_segment_analyzer::config::{parse_library_arg, LibraryKind};
use media_segment_analyzer::{
    AnalysisContext, AnalysisRunReport, AnalysisScheduler, BlacklistStore, Config, FfmpegProbe,
    FileSystemLibrary, MetadataDb, SegmentKind, SegmentStore,
};

fn cli() -> Command {
    let kind_arg = Arg::new("kind")
        .long("kind")
        .short('k')
        .value_name("KIND")
        .help("Segment kind to analyze")
        .value_parser(["intro", "credits", "all"])
        .default_value("all");

    Command::new("segment-analyzer")
        .version(env!("CARGO_PKG_VERSION"))
        .author("TigreRoll")
        .about("Detects intro and credits segments in TV episodes and movies")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file (TOML)")
                .global(true),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .help("Directory holding the segment database")
                .global(true),
        )
        .arg(
            Arg::new("tv")
                .long("tv")
                .value_name("NAME=PATH")
                .help("TV show library root (repeatable)")
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("movies")
                .long("movies")
                .value_name("NAME=PATH")
                .help("Movie library root (repeatable)")
                .action(ArgAction::Append)
                .global(true),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("NUM")
                .help("Maximum number of groups analyzed in parallel")
                .value_parser(clap::value_parser!(usize))
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable verbose logging")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand_required(true)
        .subcommand(
            Command::new("analyze")
                .about("Analyze the library once")
                .arg(kind_arg.clone())
                .arg(
                    Arg::new("force-item")
                        .long("force-item")
                        .value_name("ITEM_ID")
                        .help("Analyze this item even if blacklisted (repeatable)")
                        .value_parser(clap::value_parser!(Uuid))
                        .action(ArgAction::Append),
                )
                .arg(
                    Arg::new("reset-blacklist")
                        .long("reset-blacklist")
                        .help("Clear the blacklist before analyzing")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("no-blacklist")
                        .long("no-blacklist")
                        .help("Neither honor nor record blacklist entries")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("watch")
                .about("Keep analyzing on a schedule until interrupted")
                .arg(kind_arg)
                .arg(
                    Arg::new("interval")
                        .long("interval")
                        .value_name("SECONDS")
                        .help("Seconds between library scans")
                        .value_parser(clap::value_parser!(u64)),
                ),
        )
        .subcommand(Command::new("reset-blacklist").about("Remove every blacklist entry"))
        .subcommand(
            Command::new("segments")
                .about("Print stored segments of an item as JSON")
                .arg(
                    Arg::new("item-id")
                        .value_name("ITEM_ID")
                        .required(true)
                        .value_parser(clap::value_parser!(Uuid)),
                ),
        )
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("media_segment_analyzer=info,segment_analyzer=info,warn"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(verbose)
        .init();
}

fn load_config(matches: &ArgMatches) -> Result<Config> {
    let explicit = matches.get_one::<String>("config").map(PathBuf::from);
    let mut config = Config::load(explicit.as_deref())?;

    if let Some(dir) = matches.get_one::<String>("data-dir") {
        config.storage.data_dir = PathBuf::from(dir);
        config.storage.fingerprint_cache_dir = config.storage.data_dir.join("fingerprints");
    }
    if let Some(workers) = matches.get_one::<usize>("workers") {
        config.analysis.max_parallelism = *workers;
    }
    for arg in matches.get_many::<String>("tv").into_iter().flatten() {
        config.libraries.push(parse_library_arg(arg, LibraryKind::TvShows)?);
    }
    for arg in matches.get_many::<String>("movies").into_iter().flatten() {
        config.libraries.push(parse_library_arg(arg, LibraryKind::Movies)?);
    }

    Ok(config)
}

fn selected_kinds(matches: &ArgMatches) -> Result<Vec<SegmentKind>> {
    match matches.get_one::<String>("kind").map(String::as_str) {
        None | Some("all") => Ok(SegmentKind::all().to_vec()),
        Some(kind) => Ok(vec![kind.parse()?]),
    }
}

async fn build_context(config: Config) -> Result<AnalysisContext> {
    config.validate()?;
    if config.libraries.is_empty() {
        anyhow::bail!("No libraries configured; add [[libraries]] to the config or pass --tv/--movies");
    }

    let probe = Arc::new(FfmpegProbe::new(&config.tools));
    let library = Arc::new(FileSystemLibrary::new(config.libraries.clone(), probe.clone())?);
    let db = MetadataDb::open(&config.storage.data_dir).await?;

    Ok(AnalysisContext::new(config, library, db, probe))
}

/// Cancel the token on Ctrl-C
fn cancel_on_interrupt() -> CancellationToken {
    let cancel = CancellationToken::new();
    let token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("🛑 Interrupt received, finishing groups in progress...");
            token.cancel();
        }
    });
    cancel
}

fn print_report(report: &AnalysisRunReport) {
    info!("📊 {} results ({:?})", report.kind, report.state);
    info!("   Queued: {} items in {} groups", report.queued_items, report.groups);
    info!("   Processed: {}", report.processed);
    info!("   Segments written: {}", report.analyzed);
    info!("   Blacklisted: {}", report.blacklisted);
    info!("   Skipped groups: {}", report.skipped_groups);
    for failure in &report.failed_groups {
        warn!("   Failed: {}", failure);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let matches = cli().get_matches();
    init_logging(matches.get_flag("verbose"));

    let mut config = load_config(&matches)?;

    match matches.subcommand() {
        Some(("analyze", sub)) => {
            if sub.get_flag("reset-blacklist") {
                config.analysis.reset_blacklist = true;
            }
            if sub.get_flag("no-blacklist") {
                config.analysis.enable_blacklist = false;
            }
            let kinds = selected_kinds(sub)?;
            let forced: Vec<Uuid> = sub.get_many::<Uuid>("force-item").into_iter().flatten().copied().collect();

            info!("🚀 Segment analyzer starting");
            info!("{}", config.summary());

            let ctx = build_context(config).await?;
            let scheduler = AnalysisScheduler::new(ctx)?.with_kinds(kinds);
            let cancel = cancel_on_interrupt();

            for report in scheduler.run_once(&forced, &cancel).await? {
                print_report(&report);
            }
        }
        Some(("watch", sub)) => {
            if let Some(interval) = sub.get_one::<u64>("interval") {
                config.general.scan_interval_secs = *interval;
            }
            let kinds = selected_kinds(sub)?;

            let ctx = build_context(config).await?;
            let scheduler = AnalysisScheduler::new(ctx)?.with_kinds(kinds);
            let cancel = cancel_on_interrupt();

            // Library events come from embedders; the CLI only schedules by interval
            let (_events_tx, events_rx) = mpsc::channel(16);
            scheduler.run_continuous(events_rx, cancel).await?;
        }
        Some(("reset-blacklist", _)) => {
            let db = MetadataDb::open(&config.storage.data_dir).await?;
            let removed = db.reset_blacklist().await?;
            println!("Removed {} blacklist entries", removed);
        }
        Some(("segments", sub)) => {
            let item_id = *sub
                .get_one::<Uuid>("item-id")
                .context("item id is required")?;
            let db = MetadataDb::open(&config.storage.data_dir).await?;

            let output = serde_json::json!({
                "item_id": item_id,
                "segments": db.segments_for_item(item_id).await?,
                "metadata": db.metadata_for_item(item_id).await?,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        _ => unreachable!("subcommand is required"),
    }

    Ok(())
}
