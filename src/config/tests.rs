use super::*;

#[test]
fn defaults_match_the_documented_table() {
    let settings = Settings::from_raw(RawSettings::default()).expect("valid settings");

    assert_eq!(settings.server.admin_addr.port(), DEFAULT_ADMIN_PORT);
    assert_eq!(settings.logging.level, LevelFilter::INFO);
    assert!(matches!(settings.logging.format, LogFormat::Compact));

    assert!(settings.cache.enabled);
    assert_eq!(settings.cache.max_entries.get(), 1000);
    assert_eq!(
        settings.cache.category_ttls.get(category::IMAGE),
        Some(&Duration::from_secs(3600))
    );
    assert_eq!(
        settings.cache.category_ttls.get(category::BANNER),
        Some(&Duration::from_secs(1800))
    );
    assert_eq!(settings.cache.memory_pressure_threshold, 0.3);

    assert_eq!(settings.executor.image_max_queue_depth, 100);
    assert_eq!(settings.executor.banner_max_queue_depth, 50);
    assert_eq!(settings.executor.image_max_concurrency, default_concurrency());

    assert_eq!(settings.media.max_width.get(), 2000);
    assert_eq!(settings.media.allowed_formats, ImageFormat::ALL.to_vec());
    assert_eq!(settings.media.transform_deadline, None);

    assert_eq!(settings.banner.composition_deadline, Duration::from_secs(30));
    assert_eq!(settings.banner.default_format, ImageFormat::Jpeg);
    assert_eq!(settings.banner.default_quality, 85);

    assert_eq!(settings.image_generation.endpoint, None);
    assert_eq!(settings.image_generation.model, "dall-e-3");
}

#[test]
fn cli_overrides_take_highest_precedence() {
    let mut raw = RawSettings::default();
    raw.server.admin_port = Some(4000);
    raw.logging.level = Some("info".to_string());
    raw.executor.banner_max_concurrency = Some(2);

    let overrides = ServeOverrides {
        admin_port: Some(4321),
        banner_max_concurrency: Some(6),
        engine: EngineOverrides {
            logging: LoggingOverrides {
                log_level: Some("debug".to_string()),
                ..Default::default()
            },
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_serve_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert_eq!(settings.server.admin_addr.port(), 4321);
    assert_eq!(settings.logging.level, LevelFilter::DEBUG);
    assert_eq!(settings.executor.banner_limits().max_concurrency.get(), 6);
}

#[test]
fn cli_json_logging_enforces_format() {
    let mut raw = RawSettings::default();
    let overrides = EngineOverrides {
        logging: LoggingOverrides {
            log_json: Some(true),
            ..Default::default()
        },
        ..Default::default()
    };

    raw.apply_engine_overrides(&overrides);
    let settings = Settings::from_raw(raw).expect("valid settings");

    assert!(matches!(settings.logging.format, LogFormat::Json));
}

#[test]
fn category_ttls_extend_the_defaults() {
    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds.insert("image".to_string(), 60);
    raw.cache.ttl_seconds.insert("thumbnail".to_string(), 5);

    let settings = Settings::from_raw(raw).expect("valid settings");
    let ttls = &settings.cache.category_ttls;
    assert_eq!(ttls.get("image"), Some(&Duration::from_secs(60)));
    assert_eq!(ttls.get("thumbnail"), Some(&Duration::from_secs(5)));
    assert_eq!(ttls.get("banner"), Some(&Duration::from_secs(1800)));
}

#[test]
fn rejects_out_of_range_values() {
    fn invalid_key(raw: RawSettings) -> &'static str {
        match Settings::from_raw(raw) {
            Err(LoadError::Invalid { key, .. }) => key,
            other => panic!("expected invalid settings, got {other:?}"),
        }
    }

    let mut raw = RawSettings::default();
    raw.cache.max_entries = Some(0);
    assert_eq!(invalid_key(raw), "cache.max_entries");

    let mut raw = RawSettings::default();
    raw.cache.memory_pressure_threshold = Some(1.5);
    assert_eq!(invalid_key(raw), "cache.memory_pressure_threshold");

    let mut raw = RawSettings::default();
    raw.cache.ttl_seconds.insert("banner".to_string(), 0);
    assert_eq!(invalid_key(raw), "cache.ttl_seconds");

    let mut raw = RawSettings::default();
    raw.executor.image_max_concurrency = Some(0);
    assert_eq!(invalid_key(raw), "executor.image_max_concurrency");

    let mut raw = RawSettings::default();
    raw.media.allowed_formats = Some(vec!["png".to_string(), "gif".to_string()]);
    assert_eq!(invalid_key(raw), "media.allowed_formats");

    let mut raw = RawSettings::default();
    raw.media.default_quality = Some(101);
    assert_eq!(invalid_key(raw), "media.default_quality");

    let mut raw = RawSettings::default();
    raw.banner.composition_deadline_seconds = Some(0);
    assert_eq!(invalid_key(raw), "banner.composition_deadline_seconds");

    let mut raw = RawSettings::default();
    raw.image_generation.endpoint = Some("ftp://images.example".to_string());
    assert_eq!(invalid_key(raw), "image_generation.endpoint");
}

#[test]
fn blank_generation_values_count_as_unset() {
    let mut raw = RawSettings::default();
    raw.image_generation.endpoint = Some("  ".to_string());
    raw.image_generation.api_key = Some(String::new());

    let settings = Settings::from_raw(raw).expect("valid settings");
    assert_eq!(settings.image_generation.endpoint, None);
    assert_eq!(settings.image_generation.api_key, None);
}

#[test]
fn default_to_serve_command() {
    let args = CliArgs::parse_from(["kirie"]);
    let command = args
        .command
        .unwrap_or(Command::Serve(Box::<ServeArgs>::default()));
    assert!(matches!(command, Command::Serve(_)));
}

#[test]
fn parse_transform_arguments() {
    let args = CliArgs::parse_from([
        "kirie",
        "transform",
        "in.png",
        "out.webp",
        "--width",
        "300",
        "--height",
        "250",
        "--format",
        "webp",
        "--fit",
        "cover",
        "--log-level",
        "warn",
    ]);

    match args.command.expect("transform command") {
        Command::Transform(transform) => {
            assert_eq!(transform.input, std::path::Path::new("in.png"));
            assert_eq!(transform.output, std::path::Path::new("out.webp"));
            assert_eq!((transform.width, transform.height), (Some(300), Some(250)));
            assert_eq!(transform.format, Some(ImageFormat::Webp));
            assert_eq!(transform.fit, crate::domain::FitMode::Cover);
            assert_eq!(transform.overrides.logging.log_level.as_deref(), Some("warn"));
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn transform_requires_both_dimensions() {
    let result = CliArgs::try_parse_from(["kirie", "transform", "in.png", "out.png", "--width", "10"]);
    assert!(result.is_err());
}

#[test]
fn parse_compose_arguments() {
    let args = CliArgs::parse_from([
        "kirie",
        "compose",
        "banner.jpg",
        "--template",
        "night",
        "--size",
        "300x250",
        "--catch-copy",
        "Open late",
        "--templates-file",
        "/etc/kirie/templates.toml",
    ]);

    match args.command.expect("compose command") {
        Command::Compose(compose) => {
            assert_eq!(compose.template, "night");
            assert_eq!(compose.size, "300x250");
            assert_eq!(compose.catch_copy.as_deref(), Some("Open late"));
            assert_eq!(compose.background, None);
            assert_eq!(
                compose.overrides.templates_file.as_deref(),
                Some(std::path::Path::new("/etc/kirie/templates.toml"))
            );
        }
        _ => panic!("wrong command parsed"),
    }
}

#[test]
fn parse_serve_overrides() {
    let args = CliArgs::parse_from([
        "kirie",
        "serve",
        "--server-admin-host",
        "0.0.0.0",
        "--cache-enabled",
        "false",
        "--executor-image-max-queue-depth",
        "0",
    ]);

    match args.command.expect("serve command") {
        Command::Serve(serve) => {
            assert_eq!(serve.overrides.server_admin_host.as_deref(), Some("0.0.0.0"));
            assert_eq!(serve.overrides.engine.cache_enabled, Some(false));
            assert_eq!(serve.overrides.image_max_queue_depth, Some(0));
        }
        _ => panic!("wrong command parsed"),
    }
}
