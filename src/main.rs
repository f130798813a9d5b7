use std::{path::Path, process};

use bytes::Bytes;
use kirie::{
    application::{AppError, MediaEngine, Rendered},
    config,
    domain::{BannerSettings, ImageFormat, TextLayers, TransformParams},
    infra::{
        error::InfraError,
        http::{AdminState, build_admin_router},
        telemetry,
    },
};
use tracing::{Dispatch, Level, dispatcher, error, info};
use tracing_subscriber::fmt as tracing_fmt;

#[tokio::main]
async fn main() {
    if let Err(error) = run().await {
        report_application_error(&error);
        process::exit(1);
    }
}

fn report_application_error(error: &AppError) {
    if dispatcher::has_been_set() {
        error!(error = %error, "application error");
        return;
    }

    let subscriber = tracing_fmt().with_max_level(Level::ERROR).finish();
    let dispatch = Dispatch::new(subscriber);
    dispatcher::with_default(&dispatch, || {
        error!(error = %error, "application error");
    });
}

async fn run() -> Result<(), AppError> {
    let (cli_args, settings) = config::load_with_cli()?;

    let command = cli_args
        .command
        .unwrap_or(config::Command::Serve(Box::<config::ServeArgs>::default()));

    telemetry::init(&settings.logging)?;

    match command {
        config::Command::Serve(_) => run_serve(settings).await,
        config::Command::Transform(args) => run_transform(settings, args).await,
        config::Command::Compose(args) => run_compose(settings, args).await,
        config::Command::Templates(args) => run_templates(settings, args),
    }
}

async fn run_serve(settings: config::Settings) -> Result<(), AppError> {
    let engine = MediaEngine::init(&settings)?;
    let router = build_admin_router(AdminState::from_engine(&engine));

    let listener = tokio::net::TcpListener::bind(settings.server.admin_addr)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "kirie::serve",
        addr = %settings.server.admin_addr,
        "Admin listener ready"
    );

    let result = axum::serve(listener, router.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .map_err(|err| AppError::unexpected(format!("server error: {err}")));

    engine.teardown().await;
    result
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(target = "kirie::serve", error = %err, "Failed to listen for shutdown signal");
        return;
    }
    info!(target = "kirie::serve", "Shutdown requested");
}

async fn run_transform(
    settings: config::Settings,
    args: config::TransformArgs,
) -> Result<(), AppError> {
    let input = read_file(&args.input).await?;
    let format = args
        .format
        .or_else(|| format_from_extension(&args.output))
        .unwrap_or(ImageFormat::Jpeg);

    let engine = MediaEngine::init(&settings)?;
    let transformer = engine.transformer();
    let result = match (args.width, args.height) {
        (Some(width), Some(height)) => {
            let quality = args
                .quality
                .unwrap_or(transformer.config().default_quality);
            let params = TransformParams::new(width, height, format, quality).with_fit(args.fit);
            transformer.transform(input, params).await
        }
        _ => transformer.optimize(input, Some(format), args.quality).await,
    };
    engine.teardown().await;

    let rendered = result?;
    write_artifact(&args.output, &rendered).await
}

async fn run_compose(settings: config::Settings, args: config::ComposeArgs) -> Result<(), AppError> {
    let background = match args.background.as_deref() {
        Some(path) => Some(read_file(path).await?),
        None => None,
    };
    let text = TextLayers {
        catch_copy: args.catch_copy,
        body_copy: args.body_copy,
        cta_text: args.cta_text,
    };
    let banner_settings = BannerSettings {
        format: args.format.or_else(|| format_from_extension(&args.output)),
        quality: args.quality,
        ..BannerSettings::default()
    };

    let engine = MediaEngine::init(&settings)?;
    let result = engine
        .composer()
        .compose(&args.template, &args.size, text, background, banner_settings)
        .await;
    engine.teardown().await;

    let rendered = result?;
    write_artifact(&args.output, &rendered).await
}

fn run_templates(settings: config::Settings, args: config::TemplatesArgs) -> Result<(), AppError> {
    let catalog = match settings.banner.templates_file.as_deref() {
        Some(path) => kirie::application::TemplateCatalog::builtin_with_file(path)?,
        None => kirie::application::TemplateCatalog::builtin(),
    };

    if args.json {
        let templates: Vec<_> = catalog.iter().collect();
        let json = serde_json::to_string_pretty(&templates)
            .map_err(|err| AppError::unexpected(format!("failed to encode templates: {err}")))?;
        println!("{json}");
        return Ok(());
    }

    for template in catalog.iter() {
        println!(
            "{:<12} {}x{}  {}",
            template.id,
            template.layout.base_width,
            template.layout.base_height,
            template.description
        );
    }
    Ok(())
}

async fn read_file(path: &Path) -> Result<Bytes, AppError> {
    tokio::fs::read(path)
        .await
        .map(Bytes::from)
        .map_err(|err| AppError::from(InfraError::from(err)))
}

async fn write_artifact(path: &Path, rendered: &Rendered) -> Result<(), AppError> {
    tokio::fs::write(path, &rendered.artifact.bytes)
        .await
        .map_err(|err| AppError::from(InfraError::from(err)))?;
    info!(
        target = "kirie::cli",
        path = %path.display(),
        format = %rendered.artifact.format,
        dimensions = %rendered.artifact.dimensions(),
        bytes = rendered.artifact.len(),
        "Artifact written"
    );
    Ok(())
}

fn format_from_extension(path: &Path) -> Option<ImageFormat> {
    path.extension()
        .and_then(|ext| ext.to_str())
        .and_then(|ext| ext.parse().ok())
}
