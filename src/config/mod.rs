//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{num::NonZeroUsize, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;
use url::Url;
use uuid::Uuid;

use crate::cache::{DEFAULT_CONCURRENCY, MAX_CONCURRENCY};
use crate::domain::error::DomainError;
use crate::domain::site_uri::{SiteId, SiteUrls};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "pagerefresh";
const DEFAULT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STORAGE_LIMIT: u64 = 1000;
const DEFAULT_SITE_ID: SiteId = 1;

/// Command-line arguments for the pagerefresh binary.
#[derive(Debug, Parser)]
#[command(name = "pagerefresh", version, about = "Regenerate cached pages")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "PAGEREFRESH_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Regenerate every page listed in a file, one path per line.
    Regenerate(RegenerateArgs),
}

#[derive(Debug, Args, Clone)]
pub struct RegenerateArgs {
    #[command(flatten)]
    pub overrides: RegenerateOverrides,

    /// Site the listed paths belong to.
    #[arg(long = "site-id", default_value_t = DEFAULT_SITE_ID, value_name = "ID")]
    pub site_id: SiteId,

    /// File with one page path per line; `-` reads stdin.
    #[arg(value_name = "FILE", value_hint = ValueHint::FilePath)]
    pub file: PathBuf,
}

#[derive(Debug, Args, Default, Clone)]
pub struct RegenerateOverrides {
    /// Override the base URL of the selected site.
    #[arg(long = "base-url", value_name = "URL")]
    pub base_url: Option<String>,

    /// Override the maximum number of in-flight requests (1-100).
    #[arg(long = "concurrency", value_name = "COUNT")]
    pub concurrency: Option<u64>,

    /// Run through the job queue instead of inline.
    #[arg(long = "queue", action = clap::ArgAction::SetTrue)]
    pub queue: bool,

    /// Wait this many seconds before regenerating.
    #[arg(long = "delay-seconds", value_name = "SECONDS")]
    pub delay_seconds: Option<u64>,

    /// Override the per-request timeout.
    #[arg(long = "timeout-seconds", value_name = "SECONDS")]
    pub timeout_seconds: Option<u64>,

    /// Override the cache bypass token.
    #[arg(long = "bypass-token", env = "PAGEREFRESH_BYPASS_TOKEN", value_name = "TOKEN")]
    pub bypass_token: Option<String>,

    /// Override the base log level (trace|debug|info|warn|error).
    #[arg(long = "log-level", value_name = "LEVEL")]
    pub log_level: Option<String>,

    /// Toggle JSON logging.
    #[arg(
        long = "log-json",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub log_json: Option<bool>,
}

/// Fully-resolved settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub logging: LoggingSettings,
    pub generator: GeneratorSettings,
    pub refresh: RefreshSettings,
    pub sites: Vec<SiteSettings>,
}

impl Settings {
    pub fn site_urls(&self) -> Result<SiteUrls, DomainError> {
        let mut urls = SiteUrls::new();
        for site in &self.sites {
            urls.insert(site.id, site.base_url.as_str())?;
        }
        Ok(urls)
    }
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy)]
pub enum LogFormat {
    Json,
    Compact,
}

#[derive(Debug, Clone)]
pub struct GeneratorSettings {
    pub timeout: Duration,
    pub bypass_token: String,
    pub user_agent: String,
}

#[derive(Debug, Clone)]
pub struct RefreshSettings {
    pub concurrency: NonZeroUsize,
    pub batch_mode: bool,
    pub queue: bool,
    pub delay: Option<Duration>,
    pub storage_limit: NonZeroUsize,
}

#[derive(Debug, Clone)]
pub struct SiteSettings {
    pub id: SiteId,
    pub base_url: Url,
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("failed to build configuration: {0}")]
    Build(#[from] config::ConfigError),
    #[error("invalid configuration for `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

impl LoadError {
    fn invalid(key: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            key,
            reason: reason.into(),
        }
    }
}

/// Load settings using the configured precedence (file → environment → CLI).
pub fn load(cli: &CliArgs) -> Result<Settings, LoadError> {
    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));

    if let Some(path) = cli.config_file.as_ref() {
        builder = builder.add_source(File::from(path.as_path()).required(true));
    }

    builder = builder.add_source(Environment::with_prefix("PAGEREFRESH").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match &cli.command {
        Command::Regenerate(args) => raw.apply_regenerate_overrides(args.site_id, &args.overrides),
    }

    Settings::from_raw(raw)
}

/// Resolve configuration using the supplied CLI arguments, returning both for downstream use.
pub fn load_with_cli() -> Result<(CliArgs, Settings), LoadError> {
    let args = CliArgs::parse();
    let settings = load(&args)?;
    Ok((args, settings))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSettings {
    logging: RawLoggingSettings,
    generator: RawGeneratorSettings,
    refresh: RawRefreshSettings,
    sites: Vec<RawSiteSettings>,
}

impl RawSettings {
    fn apply_regenerate_overrides(&mut self, site_id: SiteId, overrides: &RegenerateOverrides) {
        if let Some(base_url) = overrides.base_url.as_ref() {
            match self.sites.iter_mut().find(|site| site.id == Some(site_id)) {
                Some(site) => site.base_url = Some(base_url.clone()),
                None => self.sites.push(RawSiteSettings {
                    id: Some(site_id),
                    base_url: Some(base_url.clone()),
                }),
            }
        }
        if let Some(concurrency) = overrides.concurrency {
            self.refresh.concurrency = Some(concurrency);
        }
        if overrides.queue {
            self.refresh.queue = Some(true);
        }
        if let Some(seconds) = overrides.delay_seconds {
            self.refresh.delay_seconds = Some(seconds);
        }
        if let Some(seconds) = overrides.timeout_seconds {
            self.generator.timeout_seconds = Some(seconds);
        }
        if let Some(token) = overrides.bypass_token.as_ref() {
            self.generator.bypass_token = Some(token.clone());
        }
        if let Some(level) = overrides.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.log_json {
            self.logging.json = Some(json);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            logging,
            generator,
            refresh,
            sites,
        } = raw;

        Ok(Self {
            logging: build_logging_settings(logging)?,
            generator: build_generator_settings(generator)?,
            refresh: build_refresh_settings(refresh)?,
            sites: build_site_settings(sites)?,
        })
    }
}

fn build_logging_settings(logging: RawLoggingSettings) -> Result<LoggingSettings, LoadError> {
    let level = match logging.level {
        Some(level) => LevelFilter::from_str(level.as_str()).map_err(|err| {
            LoadError::invalid("logging.level", format!("failed to parse: {err}"))
        })?,
        None => LevelFilter::INFO,
    };

    let format = if logging.json.unwrap_or(false) {
        LogFormat::Json
    } else {
        LogFormat::Compact
    };

    Ok(LoggingSettings { level, format })
}

fn build_generator_settings(
    generator: RawGeneratorSettings,
) -> Result<GeneratorSettings, LoadError> {
    let timeout_seconds = generator.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECS);
    if timeout_seconds == 0 {
        return Err(LoadError::invalid(
            "generator.timeout_seconds",
            "must be greater than zero",
        ));
    }

    let bypass_token = generator
        .bypass_token
        .and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
        .unwrap_or_else(|| Uuid::new_v4().simple().to_string());

    let user_agent = generator
        .user_agent
        .unwrap_or_else(|| concat!("pagerefresh/", env!("CARGO_PKG_VERSION")).to_string());

    Ok(GeneratorSettings {
        timeout: Duration::from_secs(timeout_seconds),
        bypass_token,
        user_agent,
    })
}

fn build_refresh_settings(refresh: RawRefreshSettings) -> Result<RefreshSettings, LoadError> {
    let concurrency = refresh.concurrency.unwrap_or(DEFAULT_CONCURRENCY as u64);
    if !(1..=MAX_CONCURRENCY as u64).contains(&concurrency) {
        return Err(LoadError::invalid(
            "refresh.concurrency",
            format!("must be between 1 and {MAX_CONCURRENCY}"),
        ));
    }

    let storage_limit = refresh.storage_limit.unwrap_or(DEFAULT_STORAGE_LIMIT);

    Ok(RefreshSettings {
        concurrency: non_zero_usize(concurrency, "refresh.concurrency")?,
        batch_mode: refresh.batch_mode.unwrap_or(false),
        queue: refresh.queue.unwrap_or(false),
        delay: refresh
            .delay_seconds
            .filter(|seconds| *seconds > 0)
            .map(Duration::from_secs),
        storage_limit: non_zero_usize(storage_limit, "refresh.storage_limit")?,
    })
}

fn build_site_settings(sites: Vec<RawSiteSettings>) -> Result<Vec<SiteSettings>, LoadError> {
    let mut resolved: Vec<SiteSettings> = Vec::with_capacity(sites.len());

    for site in sites {
        let id = site
            .id
            .ok_or_else(|| LoadError::invalid("sites.id", "every site needs an id"))?;
        if resolved.iter().any(|existing| existing.id == id) {
            return Err(LoadError::invalid(
                "sites.id",
                format!("site `{id}` is configured twice"),
            ));
        }

        let base_url = site
            .base_url
            .ok_or_else(|| LoadError::invalid("sites.base_url", format!("site `{id}` has no base url")))?;
        let base_url = Url::parse(base_url.trim()).map_err(|err| {
            LoadError::invalid("sites.base_url", format!("site `{id}`: {err}"))
        })?;

        resolved.push(SiteSettings { id, base_url });
    }

    Ok(resolved)
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    let value: usize = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))?;
    NonZeroUsize::new(value).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawGeneratorSettings {
    timeout_seconds: Option<u64>,
    bypass_token: Option<String>,
    user_agent: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawRefreshSettings {
    concurrency: Option<u64>,
    batch_mode: Option<bool>,
    queue: Option<bool>,
    delay_seconds: Option<u64>,
    storage_limit: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawSiteSettings {
    id: Option<SiteId>,
    base_url: Option<String>,
}
