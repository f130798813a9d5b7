//! Banner templates: layout rectangles on a base canvas plus a default style.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::error::DomainError;

pub const DEFAULT_BASE_WIDTH: u32 = 728;
pub const DEFAULT_BASE_HEIGHT: u32 = 90;

/// An sRGB colour with alpha, written as `#rgb`, `#rrggbb` or `#rrggbbaa`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Rgba(pub [u8; 4]);

impl Rgba {
    pub const WHITE: Rgba = Rgba([255, 255, 255, 255]);
    pub const TRANSPARENT_WHITE: Rgba = Rgba([255, 255, 255, 0]);

    pub fn opaque(r: u8, g: u8, b: u8) -> Self {
        Self([r, g, b, 255])
    }
}

impl FromStr for Rgba {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let invalid = || DomainError::validation("color", format!("`{value}` is not a hex colour"));
        let hex = value.trim().strip_prefix('#').ok_or_else(invalid)?;
        if !hex.is_ascii() {
            return Err(invalid());
        }

        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&hex[range], 16).map_err(|_| invalid())
        };
        let short = |index: usize| {
            u8::from_str_radix(&hex[index..index + 1], 16)
                .map(|nibble| nibble * 17)
                .map_err(|_| invalid())
        };

        match hex.len() {
            3 => Ok(Rgba([short(0)?, short(1)?, short(2)?, 255])),
            6 => Ok(Rgba([channel(0..2)?, channel(2..4)?, channel(4..6)?, 255])),
            8 => Ok(Rgba([
                channel(0..2)?,
                channel(2..4)?,
                channel(4..6)?,
                channel(6..8)?,
            ])),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for Rgba {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Rgba> for String {
    fn from(value: Rgba) -> Self {
        value.to_string()
    }
}

impl fmt::Display for Rgba {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [r, g, b, a] = self.0;
        if a == 255 {
            write!(f, "#{r:02x}{g:02x}{b:02x}")
        } else {
            write!(f, "#{r:02x}{g:02x}{b:02x}{a:02x}")
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub const fn new(x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// Scale from the template's base canvas onto the output canvas.
    pub fn scale(&self, sx: f64, sy: f64) -> Rect {
        let scale = |value: u32, factor: f64| (f64::from(value) * factor).round() as u32;
        Rect {
            x: scale(self.x, sx),
            y: scale(self.y, sy),
            width: scale(self.width, sx).max(1),
            height: scale(self.height, sy).max(1),
        }
    }

    fn fits_within(&self, width: u32, height: u32) -> bool {
        self.x.saturating_add(self.width) <= width && self.y.saturating_add(self.height) <= height
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LayoutAreas {
    pub image: Rect,
    pub catch_copy: Rect,
    pub body_copy: Rect,
    pub cta_button: Rect,
}

impl LayoutAreas {
    fn named(&self) -> [(&'static str, &Rect); 4] {
        [
            ("image", &self.image),
            ("catch_copy", &self.catch_copy),
            ("body_copy", &self.body_copy),
            ("cta_button", &self.cta_button),
        ]
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateStyle {
    pub background_color: Rgba,
    pub text_color: Rgba,
    pub button_color: Rgba,
    pub font_family: String,
    pub font_size: u32,
    pub image_opacity: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TemplateLayout {
    #[serde(default = "default_base_width")]
    pub base_width: u32,
    #[serde(default = "default_base_height")]
    pub base_height: u32,
    pub areas: LayoutAreas,
    pub defaults: TemplateStyle,
}

fn default_base_width() -> u32 {
    DEFAULT_BASE_WIDTH
}

fn default_base_height() -> u32 {
    DEFAULT_BASE_HEIGHT
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BannerTemplate {
    pub id: String,
    #[serde(default)]
    pub description: String,
    pub layout: TemplateLayout,
    /// Prompt sent to the image-generation service when no background is supplied.
    pub image_prompt: String,
    #[serde(default)]
    pub catchphrases: Vec<String>,
}

impl BannerTemplate {
    pub fn validate(&self) -> Result<(), DomainError> {
        if self.id.trim().is_empty() {
            return Err(DomainError::validation("template.id", "must not be empty"));
        }
        let layout = &self.layout;
        if layout.base_width == 0 || layout.base_height == 0 {
            return Err(DomainError::validation(
                "template.layout",
                format!("template `{}` has an empty base canvas", self.id),
            ));
        }
        for (name, rect) in layout.areas.named() {
            if !rect.fits_within(layout.base_width, layout.base_height) {
                return Err(DomainError::validation(
                    "template.layout.areas",
                    format!(
                        "area `{name}` of template `{}` exceeds the {}x{} base canvas",
                        self.id, layout.base_width, layout.base_height
                    ),
                ));
            }
        }
        if !(0.0..=1.0).contains(&layout.defaults.image_opacity) {
            return Err(DomainError::validation(
                "template.layout.defaults.image_opacity",
                "must be between 0 and 1",
            ));
        }
        if layout.defaults.font_size == 0 {
            return Err(DomainError::validation(
                "template.layout.defaults.font_size",
                "must be greater than zero",
            ));
        }
        if self.image_prompt.trim().is_empty() {
            return Err(DomainError::validation(
                "template.image_prompt",
                format!("template `{}` has no image prompt", self.id),
            ));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_colours() {
        assert_eq!("#fff".parse::<Rgba>().unwrap(), Rgba::WHITE);
        assert_eq!(
            "#ff69b4".parse::<Rgba>().unwrap(),
            Rgba::opaque(0xff, 0x69, 0xb4)
        );
        assert_eq!("#00000080".parse::<Rgba>().unwrap(), Rgba([0, 0, 0, 0x80]));
        assert!("ff69b4".parse::<Rgba>().is_err());
        assert!("#ff69b".parse::<Rgba>().is_err());
        assert!("#gggggg".parse::<Rgba>().is_err());
    }

    #[test]
    fn colour_display_round_trips_through_serde() {
        let colour = Rgba([0x2c, 0x3e, 0x50, 0xff]);
        let json = serde_json::to_string(&colour).unwrap();
        assert_eq!(json, "\"#2c3e50\"");
        assert_eq!(serde_json::from_str::<Rgba>(&json).unwrap(), colour);
    }

    #[test]
    fn rect_scaling_never_collapses_to_zero() {
        let rect = Rect::new(20, 60, 400, 1);
        let scaled = rect.scale(0.5, 0.5);
        assert_eq!(scaled, Rect::new(10, 30, 200, 1));
    }
}
