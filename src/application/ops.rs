//! Operations submitted to the media executors.

use bytes::Bytes;

use crate::domain::{Artifact, BannerSize, ImageFormat, TemplateLayout, TemplateStyle, TextLayers, TransformParams};
use crate::executor::Operation;

use super::raster::{self, RasterError};

/// Resize and re-encode one image.
#[derive(Debug, Clone)]
pub struct ImageOp {
    pub source: Bytes,
    pub params: TransformParams,
}

/// An overlay already resized for the target banner, positioned in output
/// pixels.
#[derive(Debug, Clone)]
pub struct PreparedOverlay {
    pub image: Bytes,
    pub x: u32,
    pub y: u32,
}

/// Everything needed to render one banner, with the style already resolved
/// against the template defaults.
#[derive(Debug, Clone)]
pub struct CompositionOp {
    pub template_id: String,
    pub background: Bytes,
    pub size: BannerSize,
    pub layout: TemplateLayout,
    pub style: TemplateStyle,
    pub text: TextLayers,
    pub overlays: Vec<PreparedOverlay>,
    pub format: ImageFormat,
    pub quality: u8,
}

#[derive(Debug, Clone)]
pub enum MediaOp {
    Image(ImageOp),
    Composition(Box<CompositionOp>),
}

impl Operation for MediaOp {
    type Output = Artifact;
    type Error = RasterError;

    fn kind(&self) -> &'static str {
        match self {
            MediaOp::Image(_) => "image",
            MediaOp::Composition(_) => "composition",
        }
    }

    fn execute(self) -> Result<Artifact, RasterError> {
        match self {
            MediaOp::Image(op) => raster::transform(&op.source, &op.params),
            MediaOp::Composition(op) => raster::compose(&op),
        }
    }
}
