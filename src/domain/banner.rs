//! Caller-facing inputs of a banner composition.

use std::fmt;
use std::str::FromStr;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::artifact::ImageFormat;
use super::error::DomainError;
use super::template::Rgba;

/// Output dimensions parsed from a `WxH` descriptor such as `728x90`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BannerSize {
    pub width: u32,
    pub height: u32,
}

impl BannerSize {
    pub fn new(width: u32, height: u32) -> Result<Self, DomainError> {
        if width == 0 || height == 0 {
            return Err(DomainError::validation(
                "size",
                format!("dimensions must be positive, got {width}x{height}"),
            ));
        }
        Ok(Self { width, height })
    }
}

impl FromStr for BannerSize {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || {
            DomainError::validation(
                "size",
                format!("`{value}` is not a `WIDTHxHEIGHT` descriptor"),
            )
        };
        let (width, height) = value
            .trim()
            .split_once(['x', 'X'])
            .ok_or_else(invalid)?;
        let width: u32 = width.trim().parse().map_err(|_| invalid())?;
        let height: u32 = height.trim().parse().map_err(|_| invalid())?;
        BannerSize::new(width, height)
    }
}

impl fmt::Display for BannerSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Text placed into the template's copy areas.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct TextLayers {
    pub catch_copy: Option<String>,
    pub body_copy: Option<String>,
    pub cta_text: Option<String>,
}

impl TextLayers {
    pub fn catch_copy(text: impl Into<String>) -> Self {
        Self {
            catch_copy: Some(text.into()),
            ..Self::default()
        }
    }
}

/// An extra image placed on top of the background at a position on the
/// template's base canvas.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Overlay {
    pub image: Bytes,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// Per-request style overrides. Anything left unset falls back to the
/// template's defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BannerSettings {
    pub background_color: Option<Rgba>,
    pub text_color: Option<Rgba>,
    pub button_color: Option<Rgba>,
    pub font_size: Option<u32>,
    pub image_opacity: Option<f32>,
    pub format: Option<ImageFormat>,
    pub quality: Option<u8>,
    /// Folded into cache keys by content hash, never serialized.
    #[serde(skip)]
    pub overlays: Vec<Overlay>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_size_descriptors() {
        let size: BannerSize = "728x90".parse().unwrap();
        assert_eq!((size.width, size.height), (728, 90));
        assert_eq!(" 300 X 250 ".parse::<BannerSize>().unwrap().to_string(), "300x250");
    }

    #[test]
    fn rejects_malformed_or_empty_sizes() {
        for raw in ["", "728", "0x90", "728x0", "-1x5", "axb", "728x90x2"] {
            assert!(raw.parse::<BannerSize>().is_err(), "`{raw}` should be rejected");
        }
    }

    #[test]
    fn text_layers_use_camel_case_fields() {
        let layers: TextLayers = serde_json::from_str(r#"{"catchCopy":"hi"}"#).unwrap();
        assert_eq!(layers, TextLayers::catch_copy("hi"));
    }

    #[test]
    fn settings_serialization_skips_overlays() {
        let settings = BannerSettings {
            quality: Some(70),
            overlays: vec![Overlay {
                image: Bytes::from_static(b"png"),
                x: 0,
                y: 0,
                width: 10,
                height: 10,
            }],
            ..BannerSettings::default()
        };
        let json = serde_json::to_value(&settings).unwrap();
        assert!(json.get("overlays").is_none());
        assert_eq!(json["quality"], 70);
    }
}
