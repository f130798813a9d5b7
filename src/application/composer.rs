//! Banner composition under a wall-clock deadline.
//!
//! Validation happens up front and never counts against the deadline. Every
//! step after it (background acquisition, overlay preparation, queue wait
//! and the composition itself) races a single timer. When the timer wins,
//! the in-flight future is dropped before it reaches the cache write, so a
//! composition that finishes late on the executor is never stored.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, ContentKey, KeyParams, category, content_digest};
use crate::domain::{
    Artifact, BannerSettings, BannerSize, BannerTemplate, FitMode, ImageFormat, Overlay, Rect,
    TemplateStyle, TextLayers, TransformParams,
};
use crate::executor::{BoundedExecutor, ExecutorStats};
use crate::infra::imagegen::{BackgroundGenerator, GenerationError};
use crate::infra::metrics::MetricsSink;

use super::error::MediaError;
use super::ops::{CompositionOp, MediaOp, PreparedOverlay};
use super::templates::TemplateCatalog;
use super::transformer::{CacheOutcome, ImageTransformer, Rendered};

const CATEGORY: &str = "banner";

pub mod banner_metrics {
    pub const DURATION: &str = "kirie_banner_compose_duration_seconds";
    pub const SIZE: &str = "kirie_banner_compose_size_bytes";
    pub const ERRORS: &str = "kirie_banner_compose_errors_total";
}

#[derive(Debug, Clone, PartialEq)]
pub struct ComposerConfig {
    pub deadline: Duration,
    pub default_format: ImageFormat,
    pub default_quality: u8,
}

impl Default for ComposerConfig {
    fn default() -> Self {
        Self {
            deadline: Duration::from_secs(30),
            default_format: ImageFormat::Jpeg,
            default_quality: 85,
        }
    }
}

impl From<&crate::config::ComposerSettings> for ComposerConfig {
    fn from(settings: &crate::config::ComposerSettings) -> Self {
        Self {
            deadline: settings.composition_deadline,
            default_format: settings.default_format,
            default_quality: settings.default_quality,
        }
    }
}

/// One entry of [`BannerComposer::compose_batch`].
#[derive(Debug, Clone, Default)]
pub struct ComposeRequest {
    pub template_id: String,
    pub size: String,
    pub text: TextLayers,
    pub background: Option<Bytes>,
    pub settings: BannerSettings,
}

#[derive(Debug, Clone, Serialize)]
pub struct ComposerStats {
    pub executor: ExecutorStats,
    pub templates: usize,
    pub deadline_ms: u64,
}

/// A validated request with the template style resolved.
struct Plan {
    template: Arc<BannerTemplate>,
    size: BannerSize,
    style: TemplateStyle,
    format: ImageFormat,
    quality: u8,
}

pub struct BannerComposer {
    config: ComposerConfig,
    catalog: Arc<TemplateCatalog>,
    cache: Arc<CacheStore>,
    executor: BoundedExecutor<MediaOp>,
    transformer: Arc<ImageTransformer>,
    generator: Arc<dyn BackgroundGenerator>,
    metrics: Arc<dyn MetricsSink>,
}

impl BannerComposer {
    pub fn new(
        config: ComposerConfig,
        catalog: Arc<TemplateCatalog>,
        cache: Arc<CacheStore>,
        executor: BoundedExecutor<MediaOp>,
        transformer: Arc<ImageTransformer>,
        generator: Arc<dyn BackgroundGenerator>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            catalog,
            cache,
            executor,
            transformer,
            generator,
            metrics,
        }
    }

    pub fn config(&self) -> &ComposerConfig {
        &self.config
    }

    pub fn catalog(&self) -> &TemplateCatalog {
        &self.catalog
    }

    /// Compose a banner from `template_id` at `size` (`WIDTHxHEIGHT`).
    ///
    /// Without a `background` the template's image prompt is sent to the
    /// background generator; a generation failure ends the composition with
    /// [`MediaError::Upstream`].
    pub async fn compose(
        &self,
        template_id: &str,
        size: &str,
        text: TextLayers,
        background: Option<Bytes>,
        settings: BannerSettings,
    ) -> Result<Rendered, MediaError> {
        let started = Instant::now();
        let result = self
            .run(template_id, size, text, background, settings)
            .await;
        self.record(template_id, size, started.elapsed(), &result);
        result
    }

    /// Compose every request; results keep the input order.
    pub async fn compose_batch(
        &self,
        requests: Vec<ComposeRequest>,
    ) -> Vec<Result<Rendered, MediaError>> {
        join_all(requests.into_iter().map(|request| async move {
            self.compose(
                &request.template_id,
                &request.size,
                request.text,
                request.background,
                request.settings,
            )
            .await
        }))
        .await
    }

    pub fn stats(&self) -> ComposerStats {
        ComposerStats {
            executor: self.executor.stats(),
            templates: self.catalog.len(),
            deadline_ms: self.config.deadline.as_millis() as u64,
        }
    }

    async fn run(
        &self,
        template_id: &str,
        size: &str,
        text: TextLayers,
        background: Option<Bytes>,
        settings: BannerSettings,
    ) -> Result<Rendered, MediaError> {
        let plan = self.plan(template_id, size, background.as_deref(), &settings)?;
        let deadline = self.config.deadline;

        tokio::time::timeout(deadline, self.render(&plan, text, background, settings))
            .await
            .map_err(|_| MediaError::Timeout {
                category: CATEGORY,
                deadline,
                context: format!("template `{template_id}` at {}", plan.size),
            })?
    }

    fn plan(
        &self,
        template_id: &str,
        size: &str,
        background: Option<&[u8]>,
        settings: &BannerSettings,
    ) -> Result<Plan, MediaError> {
        let template = self.catalog.get(template_id).ok_or_else(|| {
            MediaError::validation(CATEGORY, format!("unknown template `{template_id}`"))
        })?;
        let size: BannerSize = size
            .parse()
            .map_err(|err| MediaError::from_domain(CATEGORY, err))?;
        let limits = self.transformer.config();
        if size.width > limits.max_width || size.height > limits.max_height {
            return Err(MediaError::validation(
                CATEGORY,
                format!(
                    "size {size} exceeds the {}x{} maximum",
                    limits.max_width, limits.max_height
                ),
            ));
        }

        let defaults = &template.layout.defaults;
        let style = TemplateStyle {
            background_color: settings.background_color.unwrap_or(defaults.background_color),
            text_color: settings.text_color.unwrap_or(defaults.text_color),
            button_color: settings.button_color.unwrap_or(defaults.button_color),
            font_family: defaults.font_family.clone(),
            font_size: settings.font_size.unwrap_or(defaults.font_size),
            image_opacity: settings.image_opacity.unwrap_or(defaults.image_opacity),
        };
        if style.font_size == 0 {
            return Err(MediaError::validation(CATEGORY, "font size must be positive"));
        }
        if !(0.0..=1.0).contains(&style.image_opacity) {
            return Err(MediaError::validation(
                CATEGORY,
                format!("image opacity {} outside 0..=1", style.image_opacity),
            ));
        }

        let quality = settings.quality.unwrap_or(self.config.default_quality);
        if quality > 100 {
            return Err(MediaError::validation(
                CATEGORY,
                format!("quality {quality} outside 0..=100"),
            ));
        }

        let layout = &template.layout;
        for (index, overlay) in settings.overlays.iter().enumerate() {
            let inside = overlay.width > 0
                && overlay.height > 0
                && overlay.x.saturating_add(overlay.width) <= layout.base_width
                && overlay.y.saturating_add(overlay.height) <= layout.base_height;
            if !inside {
                return Err(MediaError::validation(
                    CATEGORY,
                    format!(
                        "overlay {index} must fit the {}x{} template canvas",
                        layout.base_width, layout.base_height
                    ),
                ));
            }
            self.check_source(&format!("overlay {index}"), &overlay.image)?;
        }
        if let Some(background) = background {
            self.check_source("background", background)?;
        }

        Ok(Plan {
            size,
            style,
            format: settings.format.unwrap_or(self.config.default_format),
            quality,
            template,
        })
    }

    /// Header check for caller-supplied images, reported against the banner.
    fn check_source(&self, what: &str, bytes: &[u8]) -> Result<(), MediaError> {
        match self.transformer.inspect(bytes) {
            Ok(_) => Ok(()),
            Err(MediaError::Validation { reason, .. }) => {
                Err(MediaError::validation(CATEGORY, format!("{what}: {reason}")))
            }
            Err(other) => Err(other),
        }
    }

    async fn render(
        &self,
        plan: &Plan,
        text: TextLayers,
        background: Option<Bytes>,
        settings: BannerSettings,
    ) -> Result<Rendered, MediaError> {
        let template_id = plan.template.id.as_str();
        let background = match background {
            Some(bytes) => bytes,
            None => self.generate_background(plan).await?,
        };
        let overlays = self.prepare_overlays(plan, &settings.overlays).await?;

        let key = banner_key(plan, &text, &settings, &background, &overlays)?;
        if let Some(artifact) = self.cache.lookup(&key) {
            return Ok(Rendered {
                artifact,
                cache: CacheOutcome::Hit,
            });
        }

        let op = CompositionOp {
            template_id: template_id.to_string(),
            background,
            size: plan.size,
            layout: plan.template.layout.clone(),
            style: plan.style.clone(),
            text,
            overlays,
            format: plan.format,
            quality: plan.quality,
        };
        let completion = self
            .executor
            .submit(MediaOp::Composition(Box::new(op)))
            .map_err(|source| MediaError::Overloaded {
                category: CATEGORY,
                source,
            })?;
        let artifact = completion
            .await
            .map_err(|source| MediaError::Composition {
                template_id: template_id.to_string(),
                size: plan.size.to_string(),
                source,
            })?;

        if let Err(err) = self.cache.store(&key, artifact.clone()) {
            debug!(
                target = "kirie::application::composer",
                key = %key,
                error = %err,
                "Composed banner not cached"
            );
        }
        Ok(Rendered {
            artifact,
            cache: CacheOutcome::Miss,
        })
    }

    async fn generate_background(&self, plan: &Plan) -> Result<Bytes, MediaError> {
        let prompt = plan.template.image_prompt.as_str();
        let BannerSize { width, height } = plan.size;
        let params = KeyParams::new()
            .with("prompt", prompt)
            .with("width", width)
            .with("height", height);
        let key = ContentKey::compute(category::GENERATED_IMAGE, &params);

        if let Some(cached) = self.cache.lookup(&key) {
            return Ok(cached.bytes);
        }

        let bytes = self
            .generator
            .generate_image(prompt, width, height)
            .await
            .map_err(|source| MediaError::Upstream {
                template_id: plan.template.id.clone(),
                source,
            })?;
        info!(
            target = "kirie::application::composer",
            template_id = %plan.template.id,
            size = %plan.size,
            bytes = bytes.len(),
            "Generated banner background"
        );

        let info = self
            .transformer
            .inspect(&bytes)
            .map_err(|err| MediaError::Upstream {
                template_id: plan.template.id.clone(),
                source: GenerationError::Malformed(err.to_string()),
            })?;
        let artifact = Artifact::new(
            bytes.clone(),
            info.format.unwrap_or(ImageFormat::Png),
            info.width,
            info.height,
        );
        if let Err(err) = self.cache.store(&key, artifact) {
            debug!(
                target = "kirie::application::composer",
                key = %key,
                error = %err,
                "Generated background not cached"
            );
        }
        Ok(bytes)
    }

    async fn prepare_overlays(
        &self,
        plan: &Plan,
        overlays: &[Overlay],
    ) -> Result<Vec<PreparedOverlay>, MediaError> {
        let layout = &plan.template.layout;
        let sx = f64::from(plan.size.width) / f64::from(layout.base_width);
        let sy = f64::from(plan.size.height) / f64::from(layout.base_height);

        let mut prepared = Vec::with_capacity(overlays.len());
        for overlay in overlays {
            let target = Rect::new(overlay.x, overlay.y, overlay.width, overlay.height).scale(sx, sy);
            let params = TransformParams::new(target.width, target.height, ImageFormat::Png, 100)
                .with_fit(FitMode::Contain);
            let rendered = self
                .transformer
                .transform(overlay.image.clone(), params)
                .await?;
            prepared.push(PreparedOverlay {
                image: rendered.artifact.bytes,
                x: target.x,
                y: target.y,
            });
        }
        Ok(prepared)
    }

    fn record(
        &self,
        template_id: &str,
        size: &str,
        elapsed: Duration,
        result: &Result<Rendered, MediaError>,
    ) {
        let seconds = elapsed.as_secs_f64();
        let cache = match result {
            Ok(rendered) => rendered.cache.as_str(),
            Err(_) => "none",
        };
        let labels = [
            ("template_id", template_id.to_string()),
            ("size", size.to_string()),
            ("cache", cache.to_string()),
        ];
        self.metrics
            .observe_duration(banner_metrics::DURATION, &labels, seconds);

        match result {
            Ok(rendered) => {
                self.metrics.observe_size(
                    banner_metrics::SIZE,
                    &labels,
                    rendered.artifact.len() as u64,
                );
                debug!(
                    target = "kirie::application::composer",
                    template_id,
                    size,
                    cache,
                    bytes = rendered.artifact.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Banner composition finished"
                );
            }
            Err(err) => {
                self.metrics.increment_error(
                    banner_metrics::ERRORS,
                    &[
                        ("template_id", template_id.to_string()),
                        ("size", size.to_string()),
                        ("error_type", err.kind().to_string()),
                    ],
                );
                warn!(
                    target = "kirie::application::composer",
                    template_id,
                    size,
                    error_type = err.kind(),
                    error = %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Banner composition failed"
                );
            }
        }
    }
}

fn banner_key(
    plan: &Plan,
    text: &TextLayers,
    settings: &BannerSettings,
    background: &[u8],
    overlays: &[PreparedOverlay],
) -> Result<ContentKey, MediaError> {
    let overlay_ids: Vec<String> = overlays
        .iter()
        .map(|overlay| format!("{}@{},{}", content_digest(&overlay.image), overlay.x, overlay.y))
        .collect();
    let params = KeyParams::new()
        .with("template_id", plan.template.id.as_str())
        .with("size", plan.size.to_string())
        .with("format", plan.format.as_str())
        .with("quality", plan.quality)
        .with_content("background", background)
        .with("overlays", overlay_ids)
        .with_serialized("text", text)
        .and_then(|params| params.with_serialized("settings", settings))
        .map_err(|err| MediaError::validation(CATEGORY, err.to_string()))?;
    Ok(ContentKey::compute(category::BANNER, &params))
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::super::testing::{RecordingSink, eventually, png};
    use super::super::transformer::TransformerConfig;
    use super::*;
    use crate::cache::CacheConfig;
    use crate::executor::ExecutorLimits;
    use crate::infra::imagegen::UnconfiguredGenerator;

    #[derive(Default)]
    struct CountingGenerator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl BackgroundGenerator for CountingGenerator {
        async fn generate_image(
            &self,
            _prompt: &str,
            width: u32,
            height: u32,
        ) -> Result<Bytes, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Bytes::from(png(width, height)))
        }
    }

    struct SlowGenerator(Duration);

    #[async_trait]
    impl BackgroundGenerator for SlowGenerator {
        async fn generate_image(
            &self,
            _prompt: &str,
            width: u32,
            height: u32,
        ) -> Result<Bytes, GenerationError> {
            tokio::time::sleep(self.0).await;
            Ok(Bytes::from(png(width, height)))
        }
    }

    struct Harness {
        composer: BannerComposer,
        cache: Arc<CacheStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness(config: ComposerConfig, generator: Arc<dyn BackgroundGenerator>) -> Harness {
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        let sink = Arc::new(RecordingSink::default());
        let limits = ExecutorLimits::new(NonZeroUsize::new(2).unwrap(), 8);
        let transformer = Arc::new(ImageTransformer::new(
            TransformerConfig::default(),
            Arc::clone(&cache),
            BoundedExecutor::new("image", limits),
            sink.clone(),
        ));
        let composer = BannerComposer::new(
            config,
            Arc::new(TemplateCatalog::builtin()),
            Arc::clone(&cache),
            BoundedExecutor::new("banner", limits),
            transformer,
            generator,
            sink.clone(),
        );
        Harness {
            composer,
            cache,
            sink,
        }
    }

    fn hi() -> TextLayers {
        TextLayers::catch_copy("hi")
    }

    #[tokio::test]
    async fn upstream_failure_produces_nothing() {
        let h = harness(ComposerConfig::default(), Arc::new(UnconfiguredGenerator));

        let err = h
            .composer
            .compose("standard", "728x90", hi(), None, BannerSettings::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Upstream { .. }), "{err}");
        assert!(!err.is_retryable());
        assert!(h.cache.is_empty());
        assert_eq!(h.composer.stats().executor.completed, 0);
        let errors = h.sink.named(banner_metrics::ERRORS);
        assert_eq!(errors[0].label("error_type"), Some("upstream"));
        assert_eq!(errors[0].label("template_id"), Some("standard"));
    }

    #[tokio::test]
    async fn invalid_requests_are_rejected_before_any_work() {
        let generator = Arc::new(CountingGenerator::default());
        let h = harness(ComposerConfig::default(), generator.clone());

        let bad_opacity = BannerSettings {
            image_opacity: Some(1.5),
            ..BannerSettings::default()
        };
        let outside = BannerSettings {
            overlays: vec![Overlay {
                image: Bytes::from(png(4, 4)),
                x: 700,
                y: 0,
                width: 50,
                height: 10,
            }],
            ..BannerSettings::default()
        };
        let cases = [
            ("missing", "728x90", BannerSettings::default()),
            ("standard", "728", BannerSettings::default()),
            ("standard", "0x90", BannerSettings::default()),
            ("standard", "728x90", bad_opacity),
            ("standard", "728x90", outside),
        ];
        for (template, size, settings) in cases {
            let err = h
                .composer
                .compose(template, size, hi(), None, settings)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Validation { .. }), "{template} {size}: {err}");
        }
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert_eq!(h.cache.health_report().misses, 0);
    }

    #[tokio::test]
    async fn unreadable_background_is_rejected_as_validation() {
        let h = harness(ComposerConfig::default(), Arc::new(UnconfiguredGenerator));

        let err = h
            .composer
            .compose(
                "standard",
                "728x90",
                hi(),
                Some(Bytes::from_static(b"not an image")),
                BannerSettings::default(),
            )
            .await
            .unwrap_err();

        assert_eq!(err.kind(), "validation", "{err}");
        assert!(!err.is_retryable());
        let report = h.cache.health_report();
        assert_eq!((report.hits, report.misses), (0, 0));
        let executor = h.composer.stats().executor;
        assert_eq!((executor.completed, executor.failed), (0, 0));
    }

    #[tokio::test]
    async fn unreadable_overlay_fails_before_background_generation() {
        let generator = Arc::new(CountingGenerator::default());
        let h = harness(ComposerConfig::default(), generator.clone());
        let settings = BannerSettings {
            overlays: vec![Overlay {
                image: Bytes::from_static(b"garbage"),
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            }],
            ..BannerSettings::default()
        };

        let err = h
            .composer
            .compose("standard", "728x90", hi(), None, settings)
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Validation { .. }), "{err}");
        assert!(err.to_string().contains("overlay 0"), "{err}");
        assert_eq!(generator.calls.load(Ordering::SeqCst), 0);
        assert!(h.cache.is_empty());
        assert_eq!(h.cache.health_report().misses, 0);
    }

    #[tokio::test]
    async fn identical_compositions_hit_the_cache() {
        let generator = Arc::new(CountingGenerator::default());
        let h = harness(ComposerConfig::default(), generator.clone());

        let first = h
            .composer
            .compose("night", "300x250", hi(), None, BannerSettings::default())
            .await
            .unwrap();
        let second = h
            .composer
            .compose("night", "300x250", hi(), None, BannerSettings::default())
            .await
            .unwrap();

        assert_eq!(first.cache, CacheOutcome::Miss);
        assert_eq!(second.cache, CacheOutcome::Hit);
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.artifact.dimensions(), "300x250");
        assert_eq!(first.artifact.format, ImageFormat::Jpeg);
        assert_eq!(generator.calls.load(Ordering::SeqCst), 1);
        assert_eq!(h.composer.stats().executor.completed, 1);
    }

    #[tokio::test]
    async fn different_text_or_background_changes_the_key() {
        let h = harness(ComposerConfig::default(), Arc::new(UnconfiguredGenerator));
        let background = Bytes::from(png(728, 90));
        let settings = BannerSettings {
            format: Some(ImageFormat::Png),
            ..BannerSettings::default()
        };

        let base = h
            .composer
            .compose("standard", "728x90", hi(), Some(background.clone()), settings.clone())
            .await
            .unwrap();
        let other_text = h
            .composer
            .compose(
                "standard",
                "728x90",
                TextLayers::catch_copy("hello"),
                Some(background),
                settings.clone(),
            )
            .await
            .unwrap();
        let other_background = h
            .composer
            .compose("standard", "728x90", hi(), Some(Bytes::from(png(64, 8))), settings)
            .await
            .unwrap();

        assert_eq!(base.cache, CacheOutcome::Miss);
        assert_eq!(other_text.cache, CacheOutcome::Miss);
        assert_eq!(other_background.cache, CacheOutcome::Miss);
        assert_eq!(base.artifact.format, ImageFormat::Png);
    }

    #[tokio::test]
    async fn overlays_are_prepared_through_the_transformer() {
        let h = harness(ComposerConfig::default(), Arc::new(UnconfiguredGenerator));
        let settings = BannerSettings {
            overlays: vec![Overlay {
                image: Bytes::from(png(40, 40)),
                x: 10,
                y: 10,
                width: 60,
                height: 60,
            }],
            ..BannerSettings::default()
        };

        let rendered = h
            .composer
            .compose(
                "natural",
                "364x45",
                hi(),
                Some(Bytes::from(png(364, 45))),
                settings,
            )
            .await
            .unwrap();

        assert_eq!(rendered.artifact.dimensions(), "364x45");
        assert_eq!(h.cache.health_report().categories.get("image"), Some(&1));
        assert_eq!(h.cache.health_report().categories.get("banner"), Some(&1));
    }

    #[tokio::test]
    async fn deadline_expiry_is_a_timeout_and_never_cached() {
        let config = ComposerConfig {
            deadline: Duration::from_millis(50),
            ..ComposerConfig::default()
        };
        let h = harness(config, Arc::new(SlowGenerator(Duration::from_millis(500))));

        let err = h
            .composer
            .compose("standard", "728x90", hi(), None, BannerSettings::default())
            .await
            .unwrap_err();

        assert!(matches!(err, MediaError::Timeout { .. }), "{err}");
        assert!(err.is_retryable());
        tokio::time::sleep(Duration::from_millis(600)).await;
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn late_compositions_are_discarded() {
        let config = ComposerConfig {
            deadline: Duration::from_millis(1),
            default_format: ImageFormat::Png,
            ..ComposerConfig::default()
        };
        let h = harness(config, Arc::new(UnconfiguredGenerator));

        let err = h
            .composer
            .compose(
                "standard",
                "1456x180",
                hi(),
                Some(Bytes::from(png(2000, 2000))),
                BannerSettings::default(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout { .. }), "{err}");

        let composer = &h.composer;
        assert!(
            eventually(|| {
                let stats = composer.stats().executor;
                stats.active == 0 && stats.queued == 0
            })
            .await
        );
        assert_eq!(h.cache.health_report().categories.get("banner"), None);
    }

    #[tokio::test]
    async fn batch_keeps_request_order() {
        let h = harness(
            ComposerConfig::default(),
            Arc::new(CountingGenerator::default()),
        );
        let request = |template: &str, size: &str| ComposeRequest {
            template_id: template.to_string(),
            size: size.to_string(),
            text: hi(),
            ..ComposeRequest::default()
        };

        let results = h
            .composer
            .compose_batch(vec![
                request("standard", "728x90"),
                request("unknown", "728x90"),
                request("night", "320x50"),
            ])
            .await;

        assert_eq!(results[0].as_ref().unwrap().artifact.dimensions(), "728x90");
        assert!(matches!(results[1], Err(MediaError::Validation { .. })));
        assert_eq!(results[2].as_ref().unwrap().artifact.dimensions(), "320x50");
    }
}
