//! Pixel work: decode, resize, composite and encode.
//!
//! Everything here is synchronous and CPU bound. It only ever runs inside an
//! executor slot.

use image::imageops::{self, FilterType};
use image::{DynamicImage, Pixel, RgbaImage};
use imagesize::ImageType;
use thiserror::Error;

use crate::domain::{
    Artifact, FitMode, ImageFormat, Rect, Rgba, TextLayers, TransformParams,
};

use super::ops::CompositionOp;

const RESIZE_FILTER: FilterType = FilterType::Lanczos3;
/// Glyph box width as a share of the font size.
const GLYPH_ADVANCE: f32 = 0.55;
const GLYPH_HEIGHT: f32 = 0.7;
/// Body copy and button text are set smaller than the catch copy.
const SECONDARY_FONT_SCALE: f32 = 0.6;

#[derive(Debug, Error)]
pub enum RasterError {
    #[error("could not decode {what}: {source}")]
    Decode {
        what: &'static str,
        #[source]
        source: image::ImageError,
    },
    #[error("could not encode {format} output: {source}")]
    Encode {
        format: ImageFormat,
        #[source]
        source: image::ImageError,
    },
    #[error("invalid geometry: {0}")]
    Geometry(String),
}

/// Header-level facts about an encoded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SourceInfo {
    /// `None` when the container is not one the engine can encode.
    pub format: Option<ImageFormat>,
    pub width: u32,
    pub height: u32,
}

/// Read format and dimensions from the header without decoding pixels.
pub fn probe(bytes: &[u8]) -> Result<SourceInfo, String> {
    let size = imagesize::blob_size(bytes).map_err(|err| err.to_string())?;
    let format = match imagesize::image_type(bytes).map_err(|err| err.to_string())? {
        ImageType::Jpeg => Some(ImageFormat::Jpeg),
        ImageType::Png => Some(ImageFormat::Png),
        ImageType::Webp => Some(ImageFormat::Webp),
        _ => None,
    };
    let width = u32::try_from(size.width).map_err(|_| "width out of range".to_string())?;
    let height = u32::try_from(size.height).map_err(|_| "height out of range".to_string())?;
    Ok(SourceInfo {
        format,
        width,
        height,
    })
}

pub fn transform(source: &[u8], params: &TransformParams) -> Result<Artifact, RasterError> {
    let decoded = decode(source, "source image")?;
    let resized = resize(&decoded, params.width, params.height, params.fit)?;
    let (width, height) = (resized.width(), resized.height());
    let bytes = encode(&resized, params.format, params.quality)?;
    Ok(Artifact::new(bytes, params.format, width, height))
}

pub fn compose(op: &CompositionOp) -> Result<Artifact, RasterError> {
    let (width, height) = (op.size.width, op.size.height);
    let layout = &op.layout;
    let sx = f64::from(width) / f64::from(layout.base_width);
    let sy = f64::from(height) / f64::from(layout.base_height);
    let style = &op.style;

    let mut canvas = RgbaImage::from_pixel(width, height, pixel(style.background_color));

    let image_area = layout.areas.image.scale(sx, sy);
    let background = decode(&op.background, "background image")?;
    let mut background = background
        .resize_to_fill(image_area.width, image_area.height, RESIZE_FILTER)
        .to_rgba8();
    apply_opacity(&mut background, style.image_opacity);
    imageops::overlay(
        &mut canvas,
        &background,
        i64::from(image_area.x),
        i64::from(image_area.y),
    );

    for overlay in &op.overlays {
        let layer = decode(&overlay.image, "overlay image")?.to_rgba8();
        imageops::overlay(&mut canvas, &layer, i64::from(overlay.x), i64::from(overlay.y));
    }

    let font_px = (style.font_size as f32 * sy as f32).max(1.0);
    draw_text_layers(&mut canvas, &op.text, op, sx, sy, font_px);

    let composed = DynamicImage::ImageRgba8(canvas);
    let bytes = encode(&composed, op.format, op.quality)?;
    Ok(Artifact::new(bytes, op.format, width, height))
}

fn draw_text_layers(
    canvas: &mut RgbaImage,
    text: &TextLayers,
    op: &CompositionOp,
    sx: f64,
    sy: f64,
    font_px: f32,
) {
    let areas = &op.layout.areas;
    let style = &op.style;

    if let Some(copy) = non_blank(&text.catch_copy) {
        draw_glyph_boxes(canvas, areas.catch_copy.scale(sx, sy), copy, font_px, style.text_color);
    }
    if let Some(copy) = non_blank(&text.body_copy) {
        draw_glyph_boxes(
            canvas,
            areas.body_copy.scale(sx, sy),
            copy,
            font_px * SECONDARY_FONT_SCALE,
            style.text_color,
        );
    }
    if let Some(label) = non_blank(&text.cta_text) {
        let button = areas.cta_button.scale(sx, sy);
        fill_rect(canvas, button, style.button_color);
        draw_glyph_boxes(
            canvas,
            button,
            label,
            font_px * SECONDARY_FONT_SCALE,
            style.text_color,
        );
    }
}

fn non_blank(layer: &Option<String>) -> Option<&str> {
    layer.as_deref().map(str::trim).filter(|text| !text.is_empty())
}

/// Lay out one box per visible character, left to right, clipped to `area`.
fn draw_glyph_boxes(canvas: &mut RgbaImage, area: Rect, text: &str, font_px: f32, color: Rgba) {
    let font_px = font_px.min(area.height as f32);
    let advance = (font_px * GLYPH_ADVANCE).max(1.0).round() as u32;
    let glyph_width = (advance * 4 / 5).max(1);
    let glyph_height = (font_px * GLYPH_HEIGHT).max(1.0).round() as u32;
    let top = area.y + area.height.saturating_sub(glyph_height) / 2;
    let right = area.x.saturating_add(area.width);

    let mut cursor = area.x;
    for ch in text.chars() {
        if cursor.saturating_add(glyph_width) > right {
            break;
        }
        if !ch.is_whitespace() {
            fill_rect(canvas, Rect::new(cursor, top, glyph_width, glyph_height), color);
        }
        cursor = cursor.saturating_add(advance);
    }
}

fn fill_rect(canvas: &mut RgbaImage, rect: Rect, color: Rgba) {
    let paint = pixel(color);
    let x_end = rect.x.saturating_add(rect.width).min(canvas.width());
    let y_end = rect.y.saturating_add(rect.height).min(canvas.height());
    for y in rect.y..y_end {
        for x in rect.x..x_end {
            canvas.get_pixel_mut(x, y).blend(&paint);
        }
    }
}

fn apply_opacity(image: &mut RgbaImage, opacity: f32) {
    if opacity >= 1.0 {
        return;
    }
    let opacity = opacity.clamp(0.0, 1.0);
    for px in image.pixels_mut() {
        px.0[3] = (f32::from(px.0[3]) * opacity).round() as u8;
    }
}

fn pixel(color: Rgba) -> image::Rgba<u8> {
    image::Rgba(color.0)
}

fn decode(bytes: &[u8], what: &'static str) -> Result<DynamicImage, RasterError> {
    image::load_from_memory(bytes).map_err(|source| RasterError::Decode { what, source })
}

fn resize(
    image: &DynamicImage,
    width: u32,
    height: u32,
    fit: FitMode,
) -> Result<DynamicImage, RasterError> {
    if width == 0 || height == 0 {
        return Err(RasterError::Geometry(format!(
            "target {width}x{height} has an empty side"
        )));
    }
    if image.width() == 0 || image.height() == 0 {
        return Err(RasterError::Geometry("source image is empty".into()));
    }

    let resized = match fit {
        FitMode::Fill => image.resize_exact(width, height, RESIZE_FILTER),
        FitMode::Cover => image.resize_to_fill(width, height, RESIZE_FILTER),
        FitMode::Inside => image.resize(width, height, RESIZE_FILTER),
        FitMode::Contain => {
            let fitted = image.resize(width, height, RESIZE_FILTER).to_rgba8();
            let mut canvas = RgbaImage::from_pixel(width, height, pixel(Rgba::TRANSPARENT_WHITE));
            let x = (width - fitted.width()) / 2;
            let y = (height - fitted.height()) / 2;
            imageops::overlay(&mut canvas, &fitted, i64::from(x), i64::from(y));
            DynamicImage::ImageRgba8(canvas)
        }
    };
    Ok(resized)
}

/// Encode with the requested quality; only JPEG is lossy, PNG and WebP are
/// written losslessly.
pub fn encode(image: &DynamicImage, format: ImageFormat, quality: u8) -> Result<Vec<u8>, RasterError> {
    use image::codecs::jpeg::JpegEncoder;
    use image::codecs::png::PngEncoder;
    use image::codecs::webp::WebPEncoder;

    let mut buffer = Vec::new();
    let result = match format {
        ImageFormat::Jpeg => {
            let encoder = JpegEncoder::new_with_quality(&mut buffer, quality.clamp(1, 100));
            DynamicImage::ImageRgb8(image.to_rgb8()).write_with_encoder(encoder)
        }
        ImageFormat::Png => image.write_with_encoder(PngEncoder::new(&mut buffer)),
        ImageFormat::Webp => {
            let rgba = DynamicImage::ImageRgba8(image.to_rgba8());
            rgba.write_with_encoder(WebPEncoder::new_lossless(&mut buffer))
        }
    };
    result.map_err(|source| RasterError::Encode { format, source })?;
    Ok(buffer)
}
