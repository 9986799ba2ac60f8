use anyhow::{Context, Result};
use api_utils::{Backend, TagFetcher, DEFAULT_TAG_URL};
use clap::Parser;
use error::SyncError;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

mod api_utils;
mod error;
mod filter_utils;
mod tag_utils;

const DEFAULT_CONFIG_PATH: &str = "tag_sync.toml";

/// Refresh the tag-driven filters in filters.json from the MangaDex tag list.
#[derive(Parser, Debug)]
#[command(name = "mangadex-tag-sync", version)]
struct Cli {
    /// TOML config file [default: tag_sync.toml if present]
    #[arg(long)]
    config: Option<PathBuf>,

    /// filters.json to rewrite
    #[arg(long)]
    filters: Option<PathBuf>,

    /// Tag endpoint
    #[arg(long)]
    url: Option<String>,

    #[arg(long, value_enum)]
    backend: Option<Backend>,

    /// Locale of the tag names written into the filters
    #[arg(long)]
    locale: Option<String>,

    /// Exit non-zero if the file is stale, without writing it
    #[arg(long, conflicts_with = "dry_run")]
    check: bool,

    /// Print the result to stdout instead of writing it
    #[arg(long)]
    dry_run: bool,

    /// More logging (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[derive(Deserialize, Debug, Default)]
#[serde(default)]
struct Config {
    source: SourceConfig,
    output: OutputConfig,
    settings: SettingsConfig,
}

#[derive(Deserialize, Debug)]
#[serde(default)]
struct SourceConfig {
    url: String,
    backend: Backend,
    locale: String,
}

impl Default for SourceConfig {
    fn default() -> Self {
        SourceConfig {
            url: DEFAULT_TAG_URL.to_string(),
            backend: Backend::default(),
            locale: "en".to_string(),
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
struct OutputConfig {
    filters_path: PathBuf,
    ensure_ascii: bool,
}

impl Default for OutputConfig {
    fn default() -> Self {
        OutputConfig {
            filters_path: Path::new(env!("CARGO_MANIFEST_DIR")).join("res").join("filters.json"),
            ensure_ascii: true,
        }
    }
}

#[derive(Deserialize, Debug)]
#[serde(default)]
struct SettingsConfig {
    log_level: String,
}

impl Default for SettingsConfig {
    fn default() -> Self {
        SettingsConfig {
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    fn apply_cli(mut self, cli: &Cli) -> Self {
        if let Some(url) = &cli.url {
            self.source.url = url.clone();
        }
        if let Some(backend) = cli.backend {
            self.source.backend = backend;
        }
        if let Some(locale) = &cli.locale {
            self.source.locale = locale.clone();
        }
        if let Some(filters) = &cli.filters {
            self.output.filters_path = filters.clone();
        }
        self
    }
}

/// An explicitly named config must exist; the default one is optional.
fn load_config(explicit: Option<&Path>) -> Result<Config, SyncError> {
    let config_path = match explicit {
        Some(path) => path,
        None => {
            let default_path = Path::new(DEFAULT_CONFIG_PATH);
            if !default_path.exists() {
                return Ok(Config::default());
            }
            default_path
        }
    };

    let config_data = fs::read_to_string(config_path)
        .map_err(|e| SyncError::Config(format!("{}: {}", config_path.display(), e)))?;
    toml::from_str(&config_data)
        .map_err(|e| SyncError::Config(format!("{}: {}", config_path.display(), e)))
}

fn init_logging(verbose: u8, config_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match verbose {
            0 => config_level,
            1 => "debug",
            _ => "trace",
        };
        EnvFilter::try_new(level).unwrap_or_else(|_| EnvFilter::new("info"))
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Write,
    Check,
    DryRun,
}

#[derive(Debug, PartialEq, Eq)]
enum Outcome {
    Written,
    UpToDate,
    Stale,
    Printed(String),
}

struct SyncJob<'a> {
    filters_path: &'a Path,
    locale: &'a str,
    ensure_ascii: bool,
    mode: Mode,
}

/// fetch -> load -> merge -> persist. The filters file is not touched until
/// the tags are in hand.
async fn sync_filters(
    fetcher: &dyn TagFetcher,
    job: &SyncJob<'_>,
) -> Result<Outcome> {
    fetcher.check_available()?;

    tracing::info!("fetching tags from {}", fetcher.url());
    let taxonomy = api_utils::fetch_with_progress(fetcher)
        .await
        .context("Error fetching tags")?;
    tracing::info!("received {} tags", taxonomy.data.len());

    let mut filters = filter_utils::load_filters(job.filters_path)
        .await
        .context("Error loading filters")?;

    let report = filter_utils::merge_tags(&mut filters, &taxonomy.data, job.locale)
        .context("Error merging tags")?;
    tracing::debug!("updated filters: {:?}", report.updated);

    let rendered = filter_utils::render_filters(&filters, job.ensure_ascii)?;

    match job.mode {
        Mode::Write => {
            filter_utils::write_filters(job.filters_path, &rendered)
                .await
                .context("Error writing filters")?;
            tracing::info!("wrote {}", job.filters_path.display());
            Ok(Outcome::Written)
        }
        Mode::Check => {
            if filter_utils::is_up_to_date(job.filters_path, &rendered).await? {
                Ok(Outcome::UpToDate)
            } else {
                Ok(Outcome::Stale)
            }
        }
        Mode::DryRun => Ok(Outcome::Printed(rendered)),
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?.apply_cli(&cli);
    init_logging(cli.verbose, &config.settings.log_level);
    tracing::debug!("{:?}", config);

    let mode = if cli.check {
        Mode::Check
    } else if cli.dry_run {
        Mode::DryRun
    } else {
        Mode::Write
    };

    let fetcher = api_utils::new_fetcher(config.source.backend, &config.source.url);
    tracing::debug!("using {} backend", config.source.backend);
    let job = SyncJob {
        filters_path: &config.output.filters_path,
        locale: &config.source.locale,
        ensure_ascii: config.output.ensure_ascii,
        mode,
    };

    match sync_filters(fetcher.as_ref(), &job).await? {
        Outcome::Written | Outcome::UpToDate => Ok(ExitCode::SUCCESS),
        Outcome::Stale => {
            eprintln!("{} is out of date", job.filters_path.display());
            Ok(ExitCode::FAILURE)
        }
        Outcome::Printed(rendered) => {
            print!("{}", rendered);
            Ok(ExitCode::SUCCESS)
        }
    }
}
