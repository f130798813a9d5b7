use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueHint, builder::BoolishValueParser};

use crate::domain::{FitMode, ImageFormat};

/// Command-line arguments for the kirie binary.
#[derive(Debug, Parser)]
#[command(name = "kirie", version, about = "Cached image and banner processing engine")]
pub struct CliArgs {
    /// Optional path to a configuration file.
    #[arg(long = "config-file", env = "KIRIE_CONFIG_FILE", value_name = "PATH")]
    pub config_file: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand, Clone)]
pub enum Command {
    /// Run the engine with its health endpoint until interrupted.
    Serve(Box<ServeArgs>),
    /// Resize and re-encode one image file.
    Transform(TransformArgs),
    /// Compose one banner from a template.
    Compose(ComposeArgs),
    /// List the available banner templates.
    Templates(TemplatesArgs),
}

#[derive(Debug, Args, Default, Clone)]
pub struct LoggingOverrides {
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

#[derive(Debug, Args, Default, Clone)]
pub struct EngineOverrides {
    #[command(flatten)]
    pub logging: LoggingOverrides,

    /// Override the banner template file.
    #[arg(long = "templates-file", value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub templates_file: Option<PathBuf>,

    /// Override the image-generation endpoint.
    #[arg(long = "image-generation-endpoint", value_name = "URL")]
    pub image_generation_endpoint: Option<String>,

    /// Enable or disable the artifact cache.
    #[arg(
        long = "cache-enabled",
        value_name = "BOOL",
        value_parser = BoolishValueParser::new()
    )]
    pub cache_enabled: Option<bool>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeArgs {
    #[command(flatten)]
    pub overrides: ServeOverrides,
}

#[derive(Debug, Args, Default, Clone)]
pub struct ServeOverrides {
    #[command(flatten)]
    pub engine: EngineOverrides,

    /// Override the administrative listener host.
    #[arg(long = "server-admin-host", value_name = "HOST")]
    pub server_admin_host: Option<String>,

    /// Override the administrative listener port.
    #[arg(long = "server-admin-port", value_name = "PORT")]
    pub admin_port: Option<u16>,

    /// Override the cache entry limit.
    #[arg(long = "cache-max-entries", value_name = "COUNT")]
    pub cache_max_entries: Option<u64>,

    /// Override the memory-pressure threshold (fraction of system memory).
    #[arg(long = "cache-memory-pressure-threshold", value_name = "FRACTION")]
    pub cache_memory_pressure_threshold: Option<f64>,

    /// Override the image executor concurrency.
    #[arg(long = "executor-image-max-concurrency", value_name = "COUNT")]
    pub image_max_concurrency: Option<u64>,

    /// Override the image executor queue depth.
    #[arg(long = "executor-image-max-queue-depth", value_name = "COUNT")]
    pub image_max_queue_depth: Option<u64>,

    /// Override the banner executor concurrency.
    #[arg(long = "executor-banner-max-concurrency", value_name = "COUNT")]
    pub banner_max_concurrency: Option<u64>,

    /// Override the banner executor queue depth.
    #[arg(long = "executor-banner-max-queue-depth", value_name = "COUNT")]
    pub banner_max_queue_depth: Option<u64>,

    /// Override the banner composition deadline.
    #[arg(long = "banner-composition-deadline-seconds", value_name = "SECONDS")]
    pub composition_deadline_seconds: Option<u64>,
}

#[derive(Debug, Args, Clone)]
pub struct TransformArgs {
    #[command(flatten)]
    pub overrides: EngineOverrides,

    /// Source image (jpeg, png or webp).
    #[arg(value_name = "INPUT", value_hint = ValueHint::FilePath)]
    pub input: PathBuf,

    /// Where to write the result.
    #[arg(value_name = "OUTPUT", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Target width; omit both width and height to only re-encode.
    #[arg(long, value_name = "PIXELS", requires = "height")]
    pub width: Option<u32>,

    /// Target height; omit both width and height to only re-encode.
    #[arg(long, value_name = "PIXELS", requires = "width")]
    pub height: Option<u32>,

    /// Output format; defaults to the output file's extension, then jpeg.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<ImageFormat>,

    /// Encoder quality (0-100).
    #[arg(long, value_name = "QUALITY")]
    pub quality: Option<u8>,

    /// How the source is fitted into the target box.
    #[arg(long, value_name = "MODE", default_value = "contain")]
    pub fit: FitMode,
}

#[derive(Debug, Args, Clone)]
pub struct ComposeArgs {
    #[command(flatten)]
    pub overrides: EngineOverrides,

    /// Where to write the banner.
    #[arg(value_name = "OUTPUT", value_hint = ValueHint::FilePath)]
    pub output: PathBuf,

    /// Template id.
    #[arg(long, value_name = "ID", default_value = "standard")]
    pub template: String,

    /// Banner size as WIDTHxHEIGHT.
    #[arg(long, value_name = "SIZE", default_value = "728x90")]
    pub size: String,

    /// Background image; generated from the template prompt when omitted.
    #[arg(long, value_name = "PATH", value_hint = ValueHint::FilePath)]
    pub background: Option<PathBuf>,

    #[arg(long = "catch-copy", value_name = "TEXT")]
    pub catch_copy: Option<String>,

    #[arg(long = "body-copy", value_name = "TEXT")]
    pub body_copy: Option<String>,

    #[arg(long = "cta-text", value_name = "TEXT")]
    pub cta_text: Option<String>,

    /// Output format; defaults to the configured banner format.
    #[arg(long, value_name = "FORMAT")]
    pub format: Option<ImageFormat>,

    /// Encoder quality (0-100).
    #[arg(long, value_name = "QUALITY")]
    pub quality: Option<u8>,
}

#[derive(Debug, Args, Default, Clone)]
pub struct TemplatesArgs {
    #[command(flatten)]
    pub overrides: EngineOverrides,

    /// Print full template definitions as JSON.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub json: bool,
}
