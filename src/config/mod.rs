//! Configuration layer: typed settings with layered precedence (file → env → CLI).

use std::{
    collections::BTreeMap,
    net::SocketAddr,
    num::{NonZeroU32, NonZeroUsize},
    path::PathBuf,
    str::FromStr,
    time::Duration,
};

use clap::Parser;
use config::{Config, Environment, File};
use serde::Deserialize;
use thiserror::Error;
use tracing::level_filters::LevelFilter;

use crate::cache::category;
use crate::domain::ImageFormat;
use crate::executor::{ExecutorLimits, default_concurrency};

mod cli;

pub use cli::*;

const DEFAULT_CONFIG_BASENAME: &str = "config/default";
const LOCAL_CONFIG_BASENAME: &str = "kirie";
const DEFAULT_ADMIN_HOST: &str = "127.0.0.1";
const DEFAULT_ADMIN_PORT: u16 = 3101;
const DEFAULT_CACHE_TTL_SECS: u64 = 300;
const DEFAULT_IMAGE_TTL_SECS: u64 = 3600;
const DEFAULT_BANNER_TTL_SECS: u64 = 1800;
const DEFAULT_GENERATED_IMAGE_TTL_SECS: u64 = 7200;
const DEFAULT_CACHE_MAX_ENTRIES: u64 = 1000;
const DEFAULT_SWEEP_INTERVAL_SECS: u64 = 60;
const DEFAULT_MEMORY_CHECK_INTERVAL_SECS: u64 = 60;
const DEFAULT_MEMORY_PRESSURE_THRESHOLD: f64 = 0.3;
const DEFAULT_PRESSURE_EVICT_FRACTION: f64 = 0.2;
const DEFAULT_IMAGE_QUEUE_DEPTH: u64 = 100;
const DEFAULT_BANNER_QUEUE_DEPTH: u64 = 50;
const DEFAULT_MAX_DIMENSION: u64 = 2000;
const DEFAULT_MAX_SOURCE_DIMENSION: u64 = 10_000;
const DEFAULT_IMAGE_QUALITY: u8 = 80;
const DEFAULT_COMPOSITION_DEADLINE_SECS: u64 = 30;
const DEFAULT_BANNER_FORMAT: ImageFormat = ImageFormat::Jpeg;
const DEFAULT_BANNER_QUALITY: u8 = 85;
const DEFAULT_GENERATION_MODEL: &str = "dall-e-3";
const DEFAULT_GENERATION_TIMEOUT_SECS: u64 = 60;

/// Fully-resolved deployment settings after precedence resolution and validation.
#[derive(Debug, Clone)]
pub struct Settings {
    pub server: ServerSettings,
    pub logging: LoggingSettings,
    pub cache: CacheSettings,
    pub executor: ExecutorSettings,
    pub media: MediaSettings,
    pub banner: ComposerSettings,
    pub image_generation: ImageGenerationSettings,
}

#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub admin_addr: SocketAddr,
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
pub struct CacheSettings {
    pub enabled: bool,
    pub default_ttl: Duration,
    pub category_ttls: BTreeMap<String, Duration>,
    pub max_entries: NonZeroUsize,
    pub sweep_interval: Duration,
    pub memory_check_interval: Duration,
    pub memory_pressure_threshold: f64,
    pub pressure_evict_fraction: f64,
}

#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub image_max_concurrency: NonZeroUsize,
    pub image_max_queue_depth: usize,
    pub banner_max_concurrency: NonZeroUsize,
    pub banner_max_queue_depth: usize,
}

impl ExecutorSettings {
    pub fn image_limits(&self) -> ExecutorLimits {
        ExecutorLimits::new(self.image_max_concurrency, self.image_max_queue_depth)
    }

    pub fn banner_limits(&self) -> ExecutorLimits {
        ExecutorLimits::new(self.banner_max_concurrency, self.banner_max_queue_depth)
    }
}

#[derive(Debug, Clone)]
pub struct MediaSettings {
    pub max_width: NonZeroU32,
    pub max_height: NonZeroU32,
    pub max_source_dimension: NonZeroU32,
    pub default_quality: u8,
    pub allowed_formats: Vec<ImageFormat>,
    pub transform_deadline: Option<Duration>,
}

#[derive(Debug, Clone)]
pub struct ComposerSettings {
    pub composition_deadline: Duration,
    pub default_format: ImageFormat,
    pub default_quality: u8,
    pub templates_file: Option<PathBuf>,
}

#[derive(Debug, Clone)]
pub struct ImageGenerationSettings {
    pub endpoint: Option<String>,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
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

    builder = builder.add_source(Environment::with_prefix("KIRIE").separator("__"));

    let mut raw: RawSettings = builder.build()?.try_deserialize()?;

    match cli.command.as_ref() {
        Some(Command::Serve(args)) => raw.apply_serve_overrides(&args.overrides),
        Some(Command::Transform(args)) => raw.apply_engine_overrides(&args.overrides),
        Some(Command::Compose(args)) => raw.apply_engine_overrides(&args.overrides),
        Some(Command::Templates(args)) => raw.apply_engine_overrides(&args.overrides),
        None => raw.apply_serve_overrides(&ServeOverrides::default()),
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
    server: RawServerSettings,
    logging: RawLoggingSettings,
    cache: RawCacheSettings,
    executor: RawExecutorSettings,
    media: RawMediaSettings,
    banner: RawBannerSettings,
    image_generation: RawImageGenerationSettings,
}

impl RawSettings {
    fn apply_serve_overrides(&mut self, overrides: &ServeOverrides) {
        self.apply_engine_overrides(&overrides.engine);

        if let Some(host) = overrides.server_admin_host.as_ref() {
            self.server.admin_host = Some(host.clone());
        }
        if let Some(port) = overrides.admin_port {
            self.server.admin_port = Some(port);
        }
        if let Some(max) = overrides.cache_max_entries {
            self.cache.max_entries = Some(max);
        }
        if let Some(threshold) = overrides.cache_memory_pressure_threshold {
            self.cache.memory_pressure_threshold = Some(threshold);
        }
        if let Some(value) = overrides.image_max_concurrency {
            self.executor.image_max_concurrency = Some(value);
        }
        if let Some(value) = overrides.image_max_queue_depth {
            self.executor.image_max_queue_depth = Some(value);
        }
        if let Some(value) = overrides.banner_max_concurrency {
            self.executor.banner_max_concurrency = Some(value);
        }
        if let Some(value) = overrides.banner_max_queue_depth {
            self.executor.banner_max_queue_depth = Some(value);
        }
        if let Some(seconds) = overrides.composition_deadline_seconds {
            self.banner.composition_deadline_seconds = Some(seconds);
        }
    }

    fn apply_engine_overrides(&mut self, overrides: &EngineOverrides) {
        if let Some(level) = overrides.logging.log_level.as_ref() {
            self.logging.level = Some(level.clone());
        }
        if let Some(json) = overrides.logging.log_json {
            self.logging.json = Some(json);
        }
        if let Some(path) = overrides.templates_file.as_ref() {
            self.banner.templates_file = Some(path.clone());
        }
        if let Some(endpoint) = overrides.image_generation_endpoint.as_ref() {
            self.image_generation.endpoint = Some(endpoint.clone());
        }
        if let Some(enabled) = overrides.cache_enabled {
            self.cache.enabled = Some(enabled);
        }
    }
}

impl Settings {
    fn from_raw(raw: RawSettings) -> Result<Self, LoadError> {
        let RawSettings {
            server,
            logging,
            cache,
            executor,
            media,
            banner,
            image_generation,
        } = raw;

        let server = build_server_settings(server)?;
        let logging = build_logging_settings(logging)?;
        let cache = build_cache_settings(cache)?;
        let executor = build_executor_settings(executor)?;
        let media = build_media_settings(media)?;
        let banner = build_banner_settings(banner)?;
        let image_generation = build_image_generation_settings(image_generation)?;

        Ok(Self {
            server,
            logging,
            cache,
            executor,
            media,
            banner,
            image_generation,
        })
    }
}

fn build_server_settings(server: RawServerSettings) -> Result<ServerSettings, LoadError> {
    let admin_host = server
        .admin_host
        .unwrap_or_else(|| DEFAULT_ADMIN_HOST.to_string());

    let admin_port = server.admin_port.unwrap_or(DEFAULT_ADMIN_PORT);
    if admin_port == 0 {
        return Err(LoadError::invalid(
            "server.admin_port",
            "port must be greater than zero",
        ));
    }

    let admin_addr = parse_socket_addr(&admin_host, admin_port)
        .map_err(|reason| LoadError::invalid("server.admin_addr", reason))?;

    Ok(ServerSettings { admin_addr })
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

fn build_cache_settings(cache: RawCacheSettings) -> Result<CacheSettings, LoadError> {
    let default_ttl = seconds(
        cache.default_ttl_seconds.unwrap_or(DEFAULT_CACHE_TTL_SECS),
        "cache.default_ttl_seconds",
    )?;

    let mut category_ttls = BTreeMap::from([
        (
            category::IMAGE.to_string(),
            Duration::from_secs(DEFAULT_IMAGE_TTL_SECS),
        ),
        (
            category::BANNER.to_string(),
            Duration::from_secs(DEFAULT_BANNER_TTL_SECS),
        ),
        (
            category::GENERATED_IMAGE.to_string(),
            Duration::from_secs(DEFAULT_GENERATED_IMAGE_TTL_SECS),
        ),
    ]);
    for (name, value) in cache.ttl_seconds {
        let ttl = seconds(value, "cache.ttl_seconds")?;
        category_ttls.insert(name, ttl);
    }

    let max_entries = non_zero_usize(
        cache.max_entries.unwrap_or(DEFAULT_CACHE_MAX_ENTRIES),
        "cache.max_entries",
    )?;
    let sweep_interval = seconds(
        cache
            .sweep_interval_seconds
            .unwrap_or(DEFAULT_SWEEP_INTERVAL_SECS),
        "cache.sweep_interval_seconds",
    )?;
    let memory_check_interval = seconds(
        cache
            .memory_check_interval_seconds
            .unwrap_or(DEFAULT_MEMORY_CHECK_INTERVAL_SECS),
        "cache.memory_check_interval_seconds",
    )?;
    let memory_pressure_threshold = fraction(
        cache
            .memory_pressure_threshold
            .unwrap_or(DEFAULT_MEMORY_PRESSURE_THRESHOLD),
        "cache.memory_pressure_threshold",
    )?;
    let pressure_evict_fraction = fraction(
        cache
            .pressure_evict_fraction
            .unwrap_or(DEFAULT_PRESSURE_EVICT_FRACTION),
        "cache.pressure_evict_fraction",
    )?;

    Ok(CacheSettings {
        enabled: cache.enabled.unwrap_or(true),
        default_ttl,
        category_ttls,
        max_entries,
        sweep_interval,
        memory_check_interval,
        memory_pressure_threshold,
        pressure_evict_fraction,
    })
}

fn build_executor_settings(executor: RawExecutorSettings) -> Result<ExecutorSettings, LoadError> {
    let fallback = default_concurrency();
    let concurrency = |value: Option<u64>, key| match value {
        Some(value) => non_zero_usize(value, key),
        None => Ok(fallback),
    };

    Ok(ExecutorSettings {
        image_max_concurrency: concurrency(
            executor.image_max_concurrency,
            "executor.image_max_concurrency",
        )?,
        image_max_queue_depth: usize_value(
            executor
                .image_max_queue_depth
                .unwrap_or(DEFAULT_IMAGE_QUEUE_DEPTH),
            "executor.image_max_queue_depth",
        )?,
        banner_max_concurrency: concurrency(
            executor.banner_max_concurrency,
            "executor.banner_max_concurrency",
        )?,
        banner_max_queue_depth: usize_value(
            executor
                .banner_max_queue_depth
                .unwrap_or(DEFAULT_BANNER_QUEUE_DEPTH),
            "executor.banner_max_queue_depth",
        )?,
    })
}

fn build_media_settings(media: RawMediaSettings) -> Result<MediaSettings, LoadError> {
    let max_width = non_zero_u32(
        media.max_width.unwrap_or(DEFAULT_MAX_DIMENSION),
        "media.max_width",
    )?;
    let max_height = non_zero_u32(
        media.max_height.unwrap_or(DEFAULT_MAX_DIMENSION),
        "media.max_height",
    )?;
    let max_source_dimension = non_zero_u32(
        media
            .max_source_dimension
            .unwrap_or(DEFAULT_MAX_SOURCE_DIMENSION),
        "media.max_source_dimension",
    )?;
    let default_quality = quality(
        media.default_quality.unwrap_or(DEFAULT_IMAGE_QUALITY.into()),
        "media.default_quality",
    )?;

    let allowed_formats = match media.allowed_formats {
        Some(names) => {
            let mut formats = Vec::with_capacity(names.len());
            for name in names {
                let format = image_format(&name, "media.allowed_formats")?;
                if !formats.contains(&format) {
                    formats.push(format);
                }
            }
            if formats.is_empty() {
                return Err(LoadError::invalid(
                    "media.allowed_formats",
                    "at least one format must be allowed",
                ));
            }
            formats
        }
        None => ImageFormat::ALL.to_vec(),
    };

    let transform_deadline = media
        .transform_deadline_seconds
        .map(|value| seconds(value, "media.transform_deadline_seconds"))
        .transpose()?;

    Ok(MediaSettings {
        max_width,
        max_height,
        max_source_dimension,
        default_quality,
        allowed_formats,
        transform_deadline,
    })
}

fn build_banner_settings(banner: RawBannerSettings) -> Result<ComposerSettings, LoadError> {
    let composition_deadline = seconds(
        banner
            .composition_deadline_seconds
            .unwrap_or(DEFAULT_COMPOSITION_DEADLINE_SECS),
        "banner.composition_deadline_seconds",
    )?;
    let default_format = match banner.default_format {
        Some(name) => image_format(&name, "banner.default_format")?,
        None => DEFAULT_BANNER_FORMAT,
    };
    let default_quality = quality(
        banner
            .default_quality
            .unwrap_or(DEFAULT_BANNER_QUALITY.into()),
        "banner.default_quality",
    )?;
    let templates_file = banner
        .templates_file
        .filter(|path| !path.as_os_str().is_empty());

    Ok(ComposerSettings {
        composition_deadline,
        default_format,
        default_quality,
        templates_file,
    })
}

fn build_image_generation_settings(
    generation: RawImageGenerationSettings,
) -> Result<ImageGenerationSettings, LoadError> {
    let non_blank = |value: Option<String>| {
        value.and_then(|value| {
            let trimmed = value.trim();
            (!trimmed.is_empty()).then(|| trimmed.to_string())
        })
    };

    let endpoint = non_blank(generation.endpoint);
    if let Some(endpoint) = endpoint.as_deref()
        && !(endpoint.starts_with("http://") || endpoint.starts_with("https://"))
    {
        return Err(LoadError::invalid(
            "image_generation.endpoint",
            format!("`{endpoint}` is not an http(s) URL"),
        ));
    }
    let model = non_blank(generation.model).unwrap_or_else(|| DEFAULT_GENERATION_MODEL.to_string());
    let timeout = seconds(
        generation
            .timeout_seconds
            .unwrap_or(DEFAULT_GENERATION_TIMEOUT_SECS),
        "image_generation.timeout_seconds",
    )?;

    Ok(ImageGenerationSettings {
        endpoint,
        api_key: non_blank(generation.api_key),
        model,
        timeout,
    })
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawServerSettings {
    admin_host: Option<String>,
    admin_port: Option<u16>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawLoggingSettings {
    level: Option<String>,
    json: Option<bool>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawCacheSettings {
    enabled: Option<bool>,
    default_ttl_seconds: Option<u64>,
    ttl_seconds: BTreeMap<String, u64>,
    max_entries: Option<u64>,
    sweep_interval_seconds: Option<u64>,
    memory_check_interval_seconds: Option<u64>,
    memory_pressure_threshold: Option<f64>,
    pressure_evict_fraction: Option<f64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawExecutorSettings {
    image_max_concurrency: Option<u64>,
    image_max_queue_depth: Option<u64>,
    banner_max_concurrency: Option<u64>,
    banner_max_queue_depth: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawMediaSettings {
    max_width: Option<u64>,
    max_height: Option<u64>,
    max_source_dimension: Option<u64>,
    default_quality: Option<u64>,
    allowed_formats: Option<Vec<String>>,
    transform_deadline_seconds: Option<u64>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawBannerSettings {
    composition_deadline_seconds: Option<u64>,
    default_format: Option<String>,
    default_quality: Option<u64>,
    templates_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default)]
struct RawImageGenerationSettings {
    endpoint: Option<String>,
    api_key: Option<String>,
    model: Option<String>,
    timeout_seconds: Option<u64>,
}

fn parse_socket_addr(host: &str, port: u16) -> Result<SocketAddr, String> {
    let candidate = format!("{host}:{port}");
    candidate
        .parse()
        .map_err(|err| format!("invalid address `{candidate}`: {err}"))
}

fn non_zero_u32(value: u64, key: &'static str) -> Result<NonZeroU32, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    let value_u32: u32 = value
        .try_into()
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for u32"))?;
    NonZeroU32::new(value_u32).ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn non_zero_usize(value: u64, key: &'static str) -> Result<NonZeroUsize, LoadError> {
    NonZeroUsize::new(usize_value(value, key)?)
        .ok_or_else(|| LoadError::invalid(key, "must be greater than zero"))
}

fn usize_value(value: u64, key: &'static str) -> Result<usize, LoadError> {
    usize::try_from(value)
        .map_err(|_| LoadError::invalid(key, "value exceeds supported range for usize"))
}

fn seconds(value: u64, key: &'static str) -> Result<Duration, LoadError> {
    if value == 0 {
        return Err(LoadError::invalid(key, "must be greater than zero"));
    }
    Ok(Duration::from_secs(value))
}

fn fraction(value: f64, key: &'static str) -> Result<f64, LoadError> {
    if value.is_nan() || value <= 0.0 || value > 1.0 {
        return Err(LoadError::invalid(key, "must be within (0, 1]"));
    }
    Ok(value)
}

fn quality(value: u64, key: &'static str) -> Result<u8, LoadError> {
    u8::try_from(value)
        .ok()
        .filter(|quality| *quality <= 100)
        .ok_or_else(|| LoadError::invalid(key, "must be within 0..=100"))
}

fn image_format(name: &str, key: &'static str) -> Result<ImageFormat, LoadError> {
    name.parse()
        .map_err(|err| LoadError::invalid(key, format!("{err}")))
}

#[cfg(test)]
mod tests;
