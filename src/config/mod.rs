//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{net::SocketAddr, path::PathBuf, str::FromStr, time::Duration};

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::compression::ConfiguredCompression;
use crate::pipeline::{CacheHeaderConfig, RouteRule};
use crate::sitemap::{CultureConfig, SitemapConfig};

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "raffica";
const DEFAULT_HOST: &str = "127.0.0.1";
const DEFAULT_PORT: u16 = 3000;
const DEFAULT_GRACEFUL_SHUTDOWN_SECS: u64 = 30;
const DEFAULT_CONTENT_DIR: &str = "content";
const DEFAULT_LOG_LEVEL: &str = "info";

/// Command-line arguments for the raffica binary.
#[derive(Debug, Parser)]
#[command(name = "raffica", version, about = "Raffica request-pipeline server")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "RAFFICA_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the HTTP service.
    Serve(Box<ServeArgs>),
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    /// Override the listener host.
    #[arg(long = "server-host", value_name = "HOST")]
    pub server_host: Option<String>,

    /// Override the listener port.
    #[arg(long = "server-port", value_name = "PORT")]
    pub server_port: Option<u16>,

    /// Override the graceful shutdown timeout.
    #[arg(long = "server-graceful-shutdown-seconds", value_name = "SECONDS")]
    pub graceful_shutdown_seconds: Option<u64>,

    /// Override the served content directory.
    #[arg(
        long = "server-content-dir",
        value_name = "PATH",
        value_hint = ValueHint::DirPath
    )]
    pub content_dir: Option<PathBuf>,

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

    /// Override the compression preference (none|identity|gzip|deflate|compress).
    #[arg(long = "compression-preference", value_name = "SCHEME")]
    pub compression_preference: Option<String>,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
    #[error("invalid `{field}`: {detail}")]
    Invalid { field: &'static str, detail: String },
}

// ============================================================================
// Raw (deserialized) settings
// ============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RawSettings {
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: CacheSettings,
    compression: CompressionSettings,
    cache_headers: CacheHeaderConfig,
    pipeline: PipelineSettings,
    routing: RoutingSettings,
    sitemap: SitemapSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawServerSettings {
    host: String,
    port: u16,
    graceful_shutdown_seconds: u64,
    content_dir: PathBuf,
}

impl Default for RawServerSettings {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            graceful_shutdown_seconds: DEFAULT_GRACEFUL_SHUTDOWN_SECS,
            content_dir: PathBuf::from(DEFAULT_CONTENT_DIR),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
struct RawLoggingSettings {
    level: String,
    json: bool,
}

impl Default for RawLoggingSettings {
    fn default() -> Self {
        Self {
            level: DEFAULT_LOG_LEVEL.to_string(),
            json: false,
        }
    }
}

/// `[cache]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSettings {
    pub enabled: bool,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self { enabled: true }
    }
}

/// `[compression]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CompressionSettings {
    pub preference: ConfiguredCompression,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            preference: ConfiguredCompression::Gzip,
        }
    }
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineSettings {
    /// Install the content-token filter slot ahead of compression.
    pub rewrite_tokens: bool,
    /// Replace server-error bodies with a minimal error document.
    pub intercept_errors: bool,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            rewrite_tokens: false,
            intercept_errors: true,
        }
    }
}

/// `[routing]` section.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RoutingSettings {
    pub rules: Vec<RouteRule>,
}

/// `[sitemap]` section: builder knobs plus the configured culture trees.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct SitemapSettings {
    #[serde(flatten)]
    pub config: SitemapConfig,
    pub cultures: Vec<CultureConfig>,
}

// ============================================================================
// Validated settings
// ============================================================================

#[derive(Debug)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub compression: CompressionSettings,
    pub cache_headers: CacheHeaderConfig,
    pub pipeline: PipelineSettings,
    pub routing: RoutingSettings,
    pub sitemap: SitemapSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub listen: SocketAddr,
    pub graceful_shutdown: Duration,
    pub content_dir: PathBuf,
}

#[derive(Debug, Clone)]
pub struct LoggingSettings {
    pub level: LevelFilter,
    pub format: LogFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Json,
    Compact,
}

/// Load settings with file → environment → CLI precedence.
pub fn load(cli: &CliArgs) -> Result<Settings, ConfigError> {
    let overrides = match &cli.command {
        Some(Command::Serve(args)) => args.overrides.clone(),
        None => ServeOverrides::default(),
    };

    let mut builder = Config::builder()
        .add_source(File::with_name(DEFAULT_CONFIG_BASENAME).required(false))
        .add_source(File::with_name(LOCAL_CONFIG_BASENAME).required(false));
    if let Some(path) = &cli.config_file {
        builder = builder.add_source(File::from(path.clone()));
    }

    let raw: RawSettings = builder
        .add_source(Environment::with_prefix("RAFFICA").separator("__"))
        .build()?
        .try_deserialize()?;

    Settings::from_raw(raw, &overrides)
}

impl Settings {
    fn from_raw(mut raw: RawSettings, overrides: &ServeOverrides) -> Result<Self, ConfigError> {
        if let Some(host) = &overrides.server_host {
            raw.server.host = host.clone();
        }
        if let Some(port) = overrides.server_port {
            raw.server.port = port;
        }
        if let Some(secs) = overrides.graceful_shutdown_seconds {
            raw.server.graceful_shutdown_seconds = secs;
        }
        if let Some(dir) = &overrides.content_dir {
            raw.server.content_dir = dir.clone();
        }
        if let Some(level) = &overrides.log_level {
            raw.logging.level = level.clone();
        }
        if let Some(json) = overrides.log_json {
            raw.logging.json = json;
        }
        let mut compression = raw.compression;
        if let Some(preference) = &overrides.compression_preference {
            compression.preference = parse_preference(preference)?;
        }

        let listen = format!("{}:{}", raw.server.host, raw.server.port)
            .parse::<SocketAddr>()
            .map_err(|err| ConfigError::Invalid {
                field: "server.host/server.port",
                detail: err.to_string(),
            })?;

        let level =
            LevelFilter::from_str(&raw.logging.level).map_err(|_| ConfigError::Invalid {
                field: "logging.level",
                detail: format!("unknown level `{}`", raw.logging.level),
            })?;

        Ok(Settings {
            server: ServerSettings {
                listen,
                graceful_shutdown: Duration::from_secs(raw.server.graceful_shutdown_seconds),
                content_dir: raw.server.content_dir,
            },
            logging: LoggingSettings {
                level,
                format: if raw.logging.json {
                    LogFormat::Json
                } else {
                    LogFormat::Compact
                },
            },
            cache: raw.cache,
            compression,
            cache_headers: raw.cache_headers,
            pipeline: raw.pipeline,
            routing: raw.routing,
            sitemap: raw.sitemap,
        })
    }
}

fn parse_preference(raw: &str) -> Result<ConfiguredCompression, ConfigError> {
    match raw.to_ascii_lowercase().as_str() {
        "none" => Ok(ConfiguredCompression::None),
        "identity" => Ok(ConfiguredCompression::Identity),
        "gzip" => Ok(ConfiguredCompression::Gzip),
        "deflate" => Ok(ConfiguredCompression::Deflate),
        "compress" => Ok(ConfiguredCompression::Compress),
        other => Err(ConfigError::Invalid {
            field: "compression.preference",
            detail: format!("unknown scheme `{other}`"),
        }),
    }
}
