//! Value types shared by the cache, executors and media components.

pub mod artifact;
pub mod banner;
pub mod error;
pub mod template;
pub mod transform;

pub use artifact::{Artifact, ImageFormat};
pub use banner::{BannerSettings, BannerSize, Overlay, TextLayers};
pub use error::DomainError;
pub use template::{BannerTemplate, LayoutAreas, Rect, Rgba, TemplateLayout, TemplateStyle};
pub use transform::{FitMode, TransformParams};
