//! Owned lifecycle of the media engine.
//!
//! [`MediaEngine::init`] wires one cache, two independent executors (image
//! and banner work never queue behind each other), the transformer, the
//! composer and the cache sweeper. [`MediaEngine::teardown`] stops the
//! sweeper and discards every cached artifact. Nothing here is global; the
//! engine is handed to whoever needs it.

use std::sync::Arc;

use serde::Serialize;
use tracing::info;

use crate::cache::{
    CacheConfig, CacheStore, CacheSweeper, HealthReport, MemoryProbe, NoPressure, SweeperHandle,
};
use crate::config::Settings;
use crate::executor::{BoundedExecutor, ExecutorLimits, default_concurrency};
use crate::infra::imagegen::{
    BackgroundGenerator, HttpGeneratorConfig, HttpImageGenerator, UnconfiguredGenerator,
};
use crate::infra::metrics::{MetricsSink, RecorderSink};
use crate::infra::system_memory::SystemMemoryProbe;

use super::composer::{BannerComposer, ComposerConfig, ComposerStats};
use super::error::AppError;
use super::templates::TemplateCatalog;
use super::transformer::{ImageTransformer, TransformerConfig, TransformerStats};

const DEFAULT_IMAGE_QUEUE_DEPTH: usize = 100;
const DEFAULT_BANNER_QUEUE_DEPTH: usize = 50;

/// Snapshot served by the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct EngineHealth {
    pub cache: HealthReport,
    pub image: TransformerStats,
    pub banner: ComposerStats,
}

pub struct EngineBuilder {
    cache: CacheConfig,
    image_limits: ExecutorLimits,
    banner_limits: ExecutorLimits,
    transformer: TransformerConfig,
    composer: ComposerConfig,
    catalog: TemplateCatalog,
    generator: Arc<dyn BackgroundGenerator>,
    metrics: Arc<dyn MetricsSink>,
    probe: Arc<dyn MemoryProbe>,
    sweeper: bool,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineBuilder {
    /// Defaults: built-in templates, no background generator, no memory
    /// probe, metrics through the global recorder.
    pub fn new() -> Self {
        Self {
            cache: CacheConfig::default(),
            image_limits: ExecutorLimits::new(default_concurrency(), DEFAULT_IMAGE_QUEUE_DEPTH),
            banner_limits: ExecutorLimits::new(default_concurrency(), DEFAULT_BANNER_QUEUE_DEPTH),
            transformer: TransformerConfig::default(),
            composer: ComposerConfig::default(),
            catalog: TemplateCatalog::builtin(),
            generator: Arc::new(UnconfiguredGenerator),
            metrics: Arc::new(RecorderSink),
            probe: Arc::new(NoPressure),
            sweeper: true,
        }
    }

    /// Everything from loaded settings: system memory probe, HTTP generator
    /// when an endpoint is configured, template file when one is named.
    pub fn from_settings(settings: &Settings) -> Result<Self, AppError> {
        let catalog = match settings.banner.templates_file.as_deref() {
            Some(path) => TemplateCatalog::builtin_with_file(path)?,
            None => TemplateCatalog::builtin(),
        };

        let generation = &settings.image_generation;
        let generator: Arc<dyn BackgroundGenerator> = match generation.endpoint.as_ref() {
            Some(endpoint) => Arc::new(HttpImageGenerator::new(HttpGeneratorConfig {
                endpoint: endpoint.clone(),
                api_key: generation.api_key.clone(),
                model: generation.model.clone(),
                timeout: generation.timeout,
            })?),
            None => Arc::new(UnconfiguredGenerator),
        };

        Ok(Self::new()
            .cache(CacheConfig::from(&settings.cache))
            .image_limits(settings.executor.image_limits())
            .banner_limits(settings.executor.banner_limits())
            .transformer(TransformerConfig::from(&settings.media))
            .composer(ComposerConfig::from(&settings.banner))
            .catalog(catalog)
            .generator(generator)
            .memory_probe(Arc::new(SystemMemoryProbe::new())))
    }

    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = config;
        self
    }

    pub fn image_limits(mut self, limits: ExecutorLimits) -> Self {
        self.image_limits = limits;
        self
    }

    pub fn banner_limits(mut self, limits: ExecutorLimits) -> Self {
        self.banner_limits = limits;
        self
    }

    pub fn transformer(mut self, config: TransformerConfig) -> Self {
        self.transformer = config;
        self
    }

    pub fn composer(mut self, config: ComposerConfig) -> Self {
        self.composer = config;
        self
    }

    pub fn catalog(mut self, catalog: TemplateCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    pub fn generator(mut self, generator: Arc<dyn BackgroundGenerator>) -> Self {
        self.generator = generator;
        self
    }

    pub fn metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }

    pub fn memory_probe(mut self, probe: Arc<dyn MemoryProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Skip the background sweep loops; expired entries are still dropped
    /// lazily on lookup.
    pub fn without_sweeper(mut self) -> Self {
        self.sweeper = false;
        self
    }

    /// Must run inside a Tokio runtime.
    pub fn build(self) -> MediaEngine {
        let cache = Arc::new(CacheStore::with_memory_probe(self.cache, self.probe));
        let transformer = Arc::new(ImageTransformer::new(
            self.transformer,
            Arc::clone(&cache),
            BoundedExecutor::new("image", self.image_limits),
            Arc::clone(&self.metrics),
        ));
        let composer = BannerComposer::new(
            self.composer,
            Arc::new(self.catalog),
            Arc::clone(&cache),
            BoundedExecutor::new("banner", self.banner_limits),
            Arc::clone(&transformer),
            self.generator,
            self.metrics,
        );
        let sweeper = self
            .sweeper
            .then(|| CacheSweeper::spawn(Arc::clone(&cache)));

        info!(
            target = "kirie::application::engine",
            image_concurrency = self.image_limits.max_concurrency.get(),
            banner_concurrency = self.banner_limits.max_concurrency.get(),
            templates = composer.catalog().len(),
            cache_enabled = cache.config().enabled,
            "Media engine started"
        );

        MediaEngine {
            cache,
            transformer,
            composer: Arc::new(composer),
            sweeper,
        }
    }
}

pub struct MediaEngine {
    cache: Arc<CacheStore>,
    transformer: Arc<ImageTransformer>,
    composer: Arc<BannerComposer>,
    sweeper: Option<SweeperHandle>,
}

impl MediaEngine {
    pub fn init(settings: &Settings) -> Result<Self, AppError> {
        Ok(EngineBuilder::from_settings(settings)?.build())
    }

    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    pub fn cache(&self) -> &Arc<CacheStore> {
        &self.cache
    }

    pub fn transformer(&self) -> &Arc<ImageTransformer> {
        &self.transformer
    }

    pub fn composer(&self) -> &Arc<BannerComposer> {
        &self.composer
    }

    pub fn health(&self) -> EngineHealth {
        EngineHealth {
            cache: self.cache.health_report(),
            image: self.transformer.stats(),
            banner: self.composer.stats(),
        }
    }

    /// Stop the sweeper and discard every cached artifact. Operations still
    /// running finish on the blocking pool; their results are returned to
    /// callers but land in an empty cache.
    pub async fn teardown(mut self) -> usize {
        if let Some(sweeper) = self.sweeper.take() {
            sweeper.shutdown().await;
        }
        let discarded = self.cache.clear();
        info!(
            target = "kirie::application::engine",
            discarded,
            "Media engine stopped"
        );
        discarded
    }
}
