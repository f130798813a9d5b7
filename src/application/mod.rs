//! The media engine: cached transforms and template compositions.

pub mod composer;
pub mod engine;
pub mod error;
pub mod ops;
pub mod raster;
pub mod templates;
pub mod transformer;

#[cfg(test)]
mod testing;

pub use composer::{BannerComposer, ComposeRequest, ComposerConfig, ComposerStats, banner_metrics};
pub use engine::{EngineBuilder, EngineHealth, MediaEngine};
pub use error::{AppError, MediaError};
pub use ops::{CompositionOp, ImageOp, MediaOp, PreparedOverlay};
pub use raster::{RasterError, SourceInfo};
pub use templates::{TemplateCatalog, TemplateError, parse_templates};
pub use transformer::{
    CacheOutcome, ImageTransformer, Rendered, TransformerConfig, TransformerStats, image_metrics,
};
