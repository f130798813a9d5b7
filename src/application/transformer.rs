//! Cached image transforms.
//!
//! A transform is validated, keyed by the content hash of its source plus
//! its parameters, looked up in the cache and only then handed to the image
//! executor. Successful results are cached under the `image` category.

use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::Bytes;
use futures::future::join_all;
use serde::Serialize;
use tracing::{debug, warn};

use crate::cache::{CacheStore, ContentKey, KeyParams, category};
use crate::domain::{Artifact, FitMode, ImageFormat, TransformParams};
use crate::executor::{BoundedExecutor, ExecutorStats};
use crate::infra::metrics::MetricsSink;

use super::error::MediaError;
use super::ops::{ImageOp, MediaOp};
use super::raster::{self, SourceInfo};

const CATEGORY: &str = "image";

pub mod image_metrics {
    pub const DURATION: &str = "kirie_image_transform_duration_seconds";
    pub const SIZE: &str = "kirie_image_transform_size_bytes";
    pub const ERRORS: &str = "kirie_image_transform_errors_total";
}

#[derive(Debug, Clone, PartialEq)]
pub struct TransformerConfig {
    pub max_width: u32,
    pub max_height: u32,
    /// Largest source side accepted, checked from the header before decoding.
    pub max_source_dimension: u32,
    pub default_quality: u8,
    pub allowed_formats: Vec<ImageFormat>,
    pub deadline: Option<Duration>,
}

impl Default for TransformerConfig {
    fn default() -> Self {
        Self {
            max_width: 2000,
            max_height: 2000,
            max_source_dimension: 10_000,
            default_quality: 80,
            allowed_formats: ImageFormat::ALL.to_vec(),
            deadline: None,
        }
    }
}

impl From<&crate::config::MediaSettings> for TransformerConfig {
    fn from(settings: &crate::config::MediaSettings) -> Self {
        Self {
            max_width: settings.max_width.get(),
            max_height: settings.max_height.get(),
            max_source_dimension: settings.max_source_dimension.get(),
            default_quality: settings.default_quality,
            allowed_formats: settings.allowed_formats.clone(),
            deadline: settings.transform_deadline,
        }
    }
}

/// Whether a result came from the cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheOutcome {
    Hit,
    Miss,
}

impl CacheOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            CacheOutcome::Hit => "hit",
            CacheOutcome::Miss => "miss",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rendered {
    pub artifact: Artifact,
    pub cache: CacheOutcome,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransformerStats {
    pub executor: ExecutorStats,
    pub max_width: u32,
    pub max_height: u32,
    pub allowed_formats: Vec<ImageFormat>,
}

pub struct ImageTransformer {
    config: TransformerConfig,
    cache: Arc<CacheStore>,
    executor: BoundedExecutor<MediaOp>,
    metrics: Arc<dyn MetricsSink>,
}

impl ImageTransformer {
    pub fn new(
        config: TransformerConfig,
        cache: Arc<CacheStore>,
        executor: BoundedExecutor<MediaOp>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        Self {
            config,
            cache,
            executor,
            metrics,
        }
    }

    pub fn config(&self) -> &TransformerConfig {
        &self.config
    }

    pub async fn transform(
        &self,
        input: Bytes,
        params: TransformParams,
    ) -> Result<Rendered, MediaError> {
        self.observed("transform", input, params).await
    }

    /// Transform every item through the shared executor; results keep the
    /// input order.
    pub async fn transform_batch(
        &self,
        items: Vec<(Bytes, TransformParams)>,
    ) -> Vec<Result<Rendered, MediaError>> {
        join_all(
            items
                .into_iter()
                .map(|(input, params)| self.transform(input, params)),
        )
        .await
    }

    /// Re-encode `input` at its own size, shrunk to fit the configured
    /// maximum when larger.
    pub async fn optimize(
        &self,
        input: Bytes,
        format: Option<ImageFormat>,
        quality: Option<u8>,
    ) -> Result<Rendered, MediaError> {
        let info = self.inspect(&input)?;
        let params = TransformParams::new(
            info.width.min(self.config.max_width),
            info.height.min(self.config.max_height),
            format.unwrap_or(ImageFormat::Jpeg),
            quality.unwrap_or(self.config.default_quality),
        )
        .with_fit(FitMode::Inside);
        self.observed("optimize", input, params).await
    }

    /// Read format and dimensions from the header, rejecting sources the
    /// engine cannot decode or that exceed the source size limit.
    pub fn inspect(&self, input: &[u8]) -> Result<SourceInfo, MediaError> {
        if input.is_empty() {
            return Err(MediaError::validation(CATEGORY, "source image is empty"));
        }
        let info = raster::probe(input).map_err(|reason| {
            MediaError::validation(CATEGORY, format!("unreadable image header: {reason}"))
        })?;
        if info.format.is_none() {
            return Err(MediaError::validation(
                CATEGORY,
                "source is not a jpeg, png or webp image",
            ));
        }
        let limit = self.config.max_source_dimension;
        if info.width == 0 || info.height == 0 || info.width > limit || info.height > limit {
            return Err(MediaError::validation(
                CATEGORY,
                format!(
                    "source is {}x{}, sides must be between 1 and {limit}",
                    info.width, info.height
                ),
            ));
        }
        Ok(info)
    }

    pub fn stats(&self) -> TransformerStats {
        TransformerStats {
            executor: self.executor.stats(),
            max_width: self.config.max_width,
            max_height: self.config.max_height,
            allowed_formats: self.config.allowed_formats.clone(),
        }
    }

    async fn observed(
        &self,
        operation: &'static str,
        input: Bytes,
        params: TransformParams,
    ) -> Result<Rendered, MediaError> {
        let started = Instant::now();
        let result = self.run(input, &params).await;
        self.record(operation, &params, started.elapsed(), &result);
        result
    }

    async fn run(&self, input: Bytes, params: &TransformParams) -> Result<Rendered, MediaError> {
        self.validate(&input, params)?;

        let key = ContentKey::compute(category::IMAGE, &key_params(&input, params));
        if let Some(artifact) = self.cache.lookup(&key) {
            return Ok(Rendered {
                artifact,
                cache: CacheOutcome::Hit,
            });
        }

        let completion = self
            .executor
            .submit(MediaOp::Image(ImageOp {
                source: input,
                params: *params,
            }))
            .map_err(|source| MediaError::Overloaded {
                category: CATEGORY,
                source,
            })?;

        let outcome = match self.config.deadline {
            Some(deadline) => tokio::time::timeout(deadline, completion)
                .await
                .map_err(|_| MediaError::Timeout {
                    category: CATEGORY,
                    deadline,
                    context: params.to_string(),
                })?,
            None => completion.await,
        };
        let artifact = outcome.map_err(|source| MediaError::Transform {
            params: params.to_string(),
            source,
        })?;

        if let Err(err) = self.cache.store(&key, artifact.clone()) {
            debug!(
                target = "kirie::application::transformer",
                key = %key,
                error = %err,
                "Transformed image not cached"
            );
        }
        Ok(Rendered {
            artifact,
            cache: CacheOutcome::Miss,
        })
    }

    fn validate(&self, input: &[u8], params: &TransformParams) -> Result<(), MediaError> {
        let config = &self.config;
        if !(1..=config.max_width).contains(&params.width) {
            return Err(MediaError::validation(
                CATEGORY,
                format!("width {} outside 1..={}", params.width, config.max_width),
            ));
        }
        if !(1..=config.max_height).contains(&params.height) {
            return Err(MediaError::validation(
                CATEGORY,
                format!("height {} outside 1..={}", params.height, config.max_height),
            ));
        }
        if params.quality > 100 {
            return Err(MediaError::validation(
                CATEGORY,
                format!("quality {} outside 0..=100", params.quality),
            ));
        }
        if !config.allowed_formats.contains(&params.format) {
            return Err(MediaError::validation(
                CATEGORY,
                format!("output format {} is not allowed", params.format),
            ));
        }
        self.inspect(input).map(|_| ())
    }

    fn record(
        &self,
        operation: &'static str,
        params: &TransformParams,
        elapsed: Duration,
        result: &Result<Rendered, MediaError>,
    ) {
        let seconds = elapsed.as_secs_f64();
        match result {
            Ok(rendered) => {
                let labels = [
                    ("operation", operation.to_string()),
                    ("format", params.format.to_string()),
                    ("size", params.size_label()),
                    ("cache", rendered.cache.as_str().to_string()),
                ];
                self.metrics
                    .observe_duration(image_metrics::DURATION, &labels, seconds);
                self.metrics.observe_size(
                    image_metrics::SIZE,
                    &labels,
                    rendered.artifact.len() as u64,
                );
                debug!(
                    target = "kirie::application::transformer",
                    operation,
                    params = %params,
                    cache = rendered.cache.as_str(),
                    bytes = rendered.artifact.len(),
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image transform finished"
                );
            }
            Err(err) => {
                self.metrics.increment_error(
                    image_metrics::ERRORS,
                    &[
                        ("operation", operation.to_string()),
                        ("format", params.format.to_string()),
                        ("size", params.size_label()),
                        ("error_type", err.kind().to_string()),
                    ],
                );
                self.metrics.observe_duration(
                    image_metrics::DURATION,
                    &[
                        ("operation", operation.to_string()),
                        ("format", params.format.to_string()),
                        ("size", params.size_label()),
                        ("cache", "none".to_string()),
                    ],
                    seconds,
                );
                warn!(
                    target = "kirie::application::transformer",
                    operation,
                    params = %params,
                    error_type = err.kind(),
                    error = %err,
                    elapsed_ms = elapsed.as_millis() as u64,
                    "Image transform failed"
                );
            }
        }
    }
}

fn key_params(input: &[u8], params: &TransformParams) -> KeyParams {
    KeyParams::new()
        .with_content("source", input)
        .with("width", params.width)
        .with("height", params.height)
        .with("format", params.format.as_str())
        .with("quality", params.quality)
        .with("fit", params.fit.as_str())
}

#[cfg(test)]
mod tests {
    use std::num::NonZeroUsize;

    use super::super::testing::{RecordingSink, eventually, png};
    use super::*;
    use crate::cache::CacheConfig;
    use crate::executor::ExecutorLimits;

    struct Harness {
        transformer: ImageTransformer,
        cache: Arc<CacheStore>,
        sink: Arc<RecordingSink>,
    }

    fn harness(config: TransformerConfig) -> Harness {
        let cache = Arc::new(CacheStore::new(CacheConfig::default()));
        let sink = Arc::new(RecordingSink::default());
        let executor = BoundedExecutor::new(
            "image",
            ExecutorLimits::new(NonZeroUsize::new(2).unwrap(), 16),
        );
        let transformer =
            ImageTransformer::new(config, Arc::clone(&cache), executor, sink.clone());
        Harness {
            transformer,
            cache,
            sink,
        }
    }

    fn jpeg_300x250() -> TransformParams {
        TransformParams::new(300, 250, ImageFormat::Jpeg, 80)
    }

    #[tokio::test]
    async fn repeated_transform_is_served_from_cache() {
        let h = harness(TransformerConfig::default());
        let source = Bytes::from(png(640, 480));

        let first = h
            .transformer
            .transform(source.clone(), jpeg_300x250())
            .await
            .unwrap();
        let second = h
            .transformer
            .transform(source, jpeg_300x250())
            .await
            .unwrap();

        assert_eq!(first.cache, CacheOutcome::Miss);
        assert_eq!(second.cache, CacheOutcome::Hit);
        assert_eq!(first.artifact, second.artifact);
        assert_eq!(first.artifact.format, ImageFormat::Jpeg);
        assert_eq!(h.cache.health_report().hits, 1);
        assert_eq!(h.transformer.stats().executor.completed, 1);

        let sizes = h.sink.named(image_metrics::SIZE);
        assert_eq!(sizes.len(), 2);
        assert_eq!(sizes[0].label("size"), Some("300x250"));
        assert_eq!(sizes[1].label("cache"), Some("hit"));
    }

    #[tokio::test]
    async fn invalid_requests_fail_before_the_cache() {
        let mut config = TransformerConfig::default();
        config.allowed_formats = vec![ImageFormat::Png];
        let h = harness(config);
        let source = Bytes::from(png(20, 20));

        let cases = [
            TransformParams::new(0, 10, ImageFormat::Png, 80),
            TransformParams::new(10, 2001, ImageFormat::Png, 80),
            TransformParams::new(10, 10, ImageFormat::Png, 101),
            TransformParams::new(10, 10, ImageFormat::Jpeg, 80),
        ];
        for params in cases {
            let err = h
                .transformer
                .transform(source.clone(), params)
                .await
                .unwrap_err();
            assert!(matches!(err, MediaError::Validation { .. }), "{params}");
        }

        let err = h
            .transformer
            .transform(Bytes::new(), TransformParams::new(10, 10, ImageFormat::Png, 80))
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Validation { .. }));

        let report = h.cache.health_report();
        assert_eq!(report.hits + report.misses, 0);
        assert_eq!(h.transformer.stats().executor.completed, 0);
        let errors = h.sink.named(image_metrics::ERRORS);
        assert_eq!(errors.len(), 5);
        assert!(errors.iter().all(|e| e.label("error_type") == Some("validation")));
    }

    #[tokio::test]
    async fn oversized_sources_are_rejected_from_the_header() {
        let h = harness(TransformerConfig {
            max_source_dimension: 50,
            ..TransformerConfig::default()
        });
        let err = h
            .transformer
            .transform(Bytes::from(png(60, 10)), jpeg_300x250())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Validation { .. }));
    }

    #[tokio::test]
    async fn decode_failures_are_transform_failures_and_not_cached() {
        let h = harness(TransformerConfig::default());
        let mut truncated = png(64, 64);
        truncated.truncate(40);

        let err = h
            .transformer
            .transform(Bytes::from(truncated), jpeg_300x250())
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Transform { .. }), "{err}");
        assert!(err.is_retryable());
        assert!(h.cache.is_empty());
        assert_eq!(
            h.sink.named(image_metrics::ERRORS)[0].label("error_type"),
            Some("transform")
        );
    }

    #[tokio::test]
    async fn deadline_abandons_the_transform_and_discards_the_late_result() {
        let h = harness(TransformerConfig {
            deadline: Some(Duration::from_millis(1)),
            ..TransformerConfig::default()
        });
        let params = TransformParams::new(2000, 2000, ImageFormat::Png, 80);

        let err = h
            .transformer
            .transform(Bytes::from(png(1200, 1200)), params)
            .await
            .unwrap_err();
        assert!(matches!(err, MediaError::Timeout { .. }), "{err}");

        let transformer = &h.transformer;
        assert!(eventually(|| transformer.stats().executor.completed == 1).await);
        assert!(h.cache.is_empty());
    }

    #[tokio::test]
    async fn optimize_clamps_to_the_maximum_size() {
        let h = harness(TransformerConfig {
            max_width: 100,
            max_height: 100,
            ..TransformerConfig::default()
        });
        let rendered = h
            .transformer
            .optimize(Bytes::from(png(400, 40)), Some(ImageFormat::Png), None)
            .await
            .unwrap();
        assert_eq!((rendered.artifact.width, rendered.artifact.height), (100, 10));

        let small = h
            .transformer
            .optimize(Bytes::from(png(30, 20)), None, Some(60))
            .await
            .unwrap();
        assert_eq!(small.artifact.format, ImageFormat::Jpeg);
        assert_eq!((small.artifact.width, small.artifact.height), (30, 20));
    }

    #[tokio::test]
    async fn inspect_reports_source_facts() {
        let h = harness(TransformerConfig::default());
        let info = h.transformer.inspect(&png(12, 34)).unwrap();
        assert_eq!(info.format, Some(ImageFormat::Png));
        assert_eq!((info.width, info.height), (12, 34));
        assert!(h.transformer.inspect(b"GIF89a not supported").is_err());
    }

    #[tokio::test]
    async fn batch_results_keep_input_order() {
        let h = harness(TransformerConfig::default());
        let source = Bytes::from(png(50, 50));
        let results = h
            .transformer
            .transform_batch(vec![
                (source.clone(), TransformParams::new(10, 10, ImageFormat::Png, 80)),
                (source.clone(), TransformParams::new(0, 10, ImageFormat::Png, 80)),
                (source, TransformParams::new(20, 20, ImageFormat::Webp, 80)),
            ])
            .await;

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].as_ref().unwrap().artifact.width, 10);
        assert!(matches!(results[1], Err(MediaError::Validation { .. })));
        assert_eq!(results[2].as_ref().unwrap().artifact.format, ImageFormat::Webp);
    }
}
