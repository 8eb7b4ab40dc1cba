use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result, bail};
use chrono::{DateTime, NaiveDate, Utc};
use clap::{Parser, Subcommand};
use colored::Colorize;
use console::Emoji;
use indicatif::{ProgressBar, ProgressStyle};

use sponsorcast::{
    AudioFormat, CatalogApi, CatalogSynchronizer, Config, DownloadCoordinator, EpisodeKind,
    EpisodeStore, FeedCache, FeedRequest, FeedService, FreshnessDecider, StaleArtifacts, MediaService,
    NoopReporter, ProgressEvent, ProgressReporter, ReqwestClient, SegmentAnalyzer,
    SharedProgressReporter, SqliteStore, YoutubeCatalog, YtDlp,
};

// Emoji with fallback for terminals without Unicode support
static RADIO: Emoji<'_, '_> = Emoji("📻 ", "");
static SEARCH: Emoji<'_, '_> = Emoji("🔍 ", "[~] ");
static DOWNLOAD: Emoji<'_, '_> = Emoji("📥 ", "[v] ");
static SUCCESS: Emoji<'_, '_> = Emoji("✅ ", "[+] ");
static FAILURE: Emoji<'_, '_> = Emoji("❌ ", "[!] ");
static BROOM: Emoji<'_, '_> = Emoji("🧹 ", "[-] ");

/// Turn video channels and playlists into sponsor-free podcast feeds
#[derive(Parser, Debug)]
#[command(name = "sponsorcast")]
#[command(version)]
struct Cli {
    /// Path to a JSON config file (default: <config_dir>/config.json)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Quiet mode - suppress progress output
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Sync a collection and print its podcast feed
    Feed {
        /// Collection kind: channel or playlist
        kind: EpisodeKind,
        /// Channel or playlist id
        id: String,
        /// Only consider uploads published after this date (YYYY-MM-DD or RFC 3339)
        #[arg(short, long, value_parser = parse_date)]
        date: Option<DateTime<Utc>>,
        /// Public base URL of the media endpoint
        #[arg(long, default_value = "http://localhost:8080")]
        host: String,
        /// Audio format for enclosures (m4a, mp3, opus)
        #[arg(short, long)]
        format: Option<AudioFormat>,
        /// Write the feed to a file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Sync a collection's episodes into the local catalog
    Sync {
        kind: EpisodeKind,
        id: String,
        #[arg(short, long, value_parser = parse_date)]
        date: Option<DateTime<Utc>>,
    },

    /// Materialize the sponsor-free audio for one video
    Media {
        /// Video id, optionally with an audio extension
        id: String,
        #[arg(short, long)]
        format: Option<AudioFormat>,
    },
}

fn parse_date(value: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(date) = DateTime::parse_from_rfc3339(value) {
        return Ok(date.with_timezone(&Utc));
    }
    NaiveDate::parse_from_str(value, "%Y-%m-%d")
        .ok()
        .and_then(|date| date.and_hms_opt(0, 0, 0))
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("invalid date '{value}', expected YYYY-MM-DD or RFC 3339"))
}

fn init_tracing(log_level: &str) {
    let env_filter = match tracing_subscriber::EnvFilter::try_from_default_env() {
        Ok(f) => f,
        Err(_) => match log_level.parse::<tracing_subscriber::EnvFilter>() {
            Ok(f) => f,
            Err(e) => {
                eprintln!(
                    "WARN: log level '{log_level}' is not a valid tracing filter ({e}); \
                     falling back to 'info'"
                );
                tracing_subscriber::EnvFilter::new("info")
            }
        },
    };

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Progress reporter using an indicatif spinner for terminal output
struct IndicatifReporter {
    spinner: ProgressBar,
    pages: Mutex<usize>,
}

impl IndicatifReporter {
    fn new() -> Self {
        let spinner = ProgressBar::new_spinner();
        if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {wide_msg}")
        {
            spinner.set_style(style);
        }
        spinner.enable_steady_tick(std::time::Duration::from_millis(100));

        Self {
            spinner,
            pages: Mutex::new(0),
        }
    }
}

impl ProgressReporter for IndicatifReporter {
    fn report(&self, event: ProgressEvent) {
        match event {
            ProgressEvent::SyncStarted {
                collection_id,
                kind,
            } => {
                self.spinner.set_message(format!(
                    "{SEARCH}Syncing {} {}",
                    kind.feed_kind(),
                    collection_id.cyan()
                ));
            }

            ProgressEvent::RangeStarted { range, .. } => {
                let describe = |bound: Option<DateTime<Utc>>| {
                    bound.map_or("…".to_string(), |d| d.format("%Y-%m-%d").to_string())
                };
                self.spinner.set_message(format!(
                    "{SEARCH}Fetching uploads {} → {}",
                    describe(range.published_after).cyan(),
                    describe(range.published_before).cyan()
                ));
            }

            ProgressEvent::PageProcessed {
                discovered, saved, ..
            } => {
                let pages = match self.pages.lock() {
                    Ok(mut pages) => {
                        *pages += 1;
                        *pages
                    }
                    Err(_) => 0,
                };
                self.spinner.set_message(format!(
                    "{SEARCH}Page {} • {} new, {} saved",
                    pages.to_string().cyan(),
                    discovered.to_string().yellow(),
                    saved.to_string().green()
                ));
            }

            ProgressEvent::RangeFailed { error, .. } => {
                self.spinner
                    .println(format!("{FAILURE}{}", error.red()));
            }

            ProgressEvent::SyncCompleted {
                saved_count,
                failed_ranges,
                ..
            } => {
                self.spinner.finish_and_clear();
                eprintln!(
                    "{SUCCESS}{} {} new episodes, {} failed ranges",
                    "Sync complete:".bold().green(),
                    saved_count.to_string().green().bold(),
                    if failed_ranges > 0 {
                        failed_ranges.to_string().red().bold()
                    } else {
                        failed_ranges.to_string().green()
                    }
                );
            }

            ProgressEvent::DownloadStarting { content_id } => {
                self.spinner.reset();
                self.spinner.enable_steady_tick(std::time::Duration::from_millis(100));
                self.spinner
                    .set_message(format!("{DOWNLOAD}Downloading {}", content_id.cyan()));
            }

            ProgressEvent::DownloadCompleted { content_id, .. } => {
                self.spinner.finish_and_clear();
                eprintln!("{SUCCESS}{}", content_id.green());
            }

            ProgressEvent::DownloadFailed { content_id, error } => {
                self.spinner.abandon_with_message(format!(
                    "{FAILURE}{} - {}",
                    content_id.red(),
                    error.red()
                ));
            }

            ProgressEvent::PartialFilesCleanedUp { count } => {
                self.spinner.println(format!(
                    "{BROOM}Removed {} leftover partial downloads",
                    count.to_string().yellow()
                ));
            }
        }
    }
}

fn catalog_for(config: &Config, client: ReqwestClient) -> Result<Arc<dyn CatalogApi>> {
    if config.google_api_key.is_empty() {
        bail!("GOOGLE_API_KEY is not configured");
    }
    Ok(Arc::new(
        YoutubeCatalog::new(client, config.google_api_key.clone()).with_page_size(config.page_size),
    ))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load(cli.config.as_deref()).context("Failed to load configuration")?;
    init_tracing(&config.log_level);

    if !cli.quiet {
        eprintln!(
            "\n{}{} {}\n",
            RADIO,
            "sponsorcast".bold().magenta(),
            "- Sponsor-free podcast feeds".dimmed()
        );
    }

    let reporter: SharedProgressReporter = if cli.quiet {
        NoopReporter::shared()
    } else {
        Arc::new(IndicatifReporter::new())
    };

    let default_format = config
        .default_format()
        .context("Invalid audio format in configuration")?;
    let client =
        ReqwestClient::with_timeout(config.request_timeout()).context("Failed to build HTTP client")?;
    let store: Arc<dyn EpisodeStore> = Arc::new(
        SqliteStore::open(&config.store_file)
            .await
            .context("Failed to open episode store")?,
    );

    match cli.command {
        Command::Feed {
            kind,
            id,
            date,
            host,
            format,
            output,
        } => {
            let catalog = catalog_for(&config, client)?;
            let synchronizer = CatalogSynchronizer::new(
                Arc::clone(&catalog),
                Arc::clone(&store),
                config.episode_duration_minimum.clone(),
            )
            .with_reporter(Arc::clone(&reporter));

            let cache = Arc::new(FeedCache::new(config.feed_cache_ttl()));
            let sweeper = FeedCache::spawn_sweeper(Arc::clone(&cache), config.cache_sweep_interval());

            let service = FeedService::new(catalog, store, synchronizer, cache, default_format)
                .with_token(config.token.clone());
            let request = FeedRequest {
                kind,
                id,
                date_filter: date,
                host,
                format,
            };
            let feed = service
                .feed(&request)
                .await
                .context("Failed to build feed")?;
            sweeper.abort();

            match output {
                Some(path) => {
                    tokio::fs::write(&path, &feed)
                        .await
                        .with_context(|| format!("Failed to write {}", path.display()))?;
                    if !cli.quiet {
                        eprintln!("{SUCCESS}Feed written to {}", path.display().to_string().cyan());
                    }
                }
                None => println!("{}", String::from_utf8_lossy(&feed)),
            }
        }

        Command::Sync { kind, id, date } => {
            let catalog = catalog_for(&config, client)?;
            let report = CatalogSynchronizer::new(
                catalog,
                store,
                config.episode_duration_minimum.clone(),
            )
            .with_reporter(reporter)
            .sync(&id, kind, date)
            .await;

            if report.failed_ranges > 0 && report.saved == 0 {
                std::process::exit(1);
            }
        }

        Command::Media { id, format } => {
            let segments = Arc::new(SegmentAnalyzer::new(client, config.categories()));
            let coordinator = Arc::new(
                DownloadCoordinator::new(&config.audio_dir, Arc::new(YtDlp::from_config(&config)))
                    .with_max_concurrent(config.max_concurrent_downloads)
                    .with_reporter(Arc::clone(&reporter)),
            );
            coordinator
                .clean_work_dir()
                .await
                .context("Failed to clean download work directory")?;

            let service = MediaService::new(
                FreshnessDecider::new(store, segments, Arc::clone(&coordinator) as Arc<dyn StaleArtifacts>),
                coordinator,
                default_format,
            );
            let file = service
                .media(&id, format)
                .await
                .with_context(|| format!("Failed to materialize {id}"))?;

            println!("{}", file.path.display());
        }
    }

    Ok(())
}
