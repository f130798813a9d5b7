use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::artifact::ImageFormat;
use super::error::DomainError;

/// How a source image is mapped onto the requested box.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FitMode {
    /// Scale to fit inside the box, then pad to the exact box size.
    #[default]
    Contain,
    /// Scale to cover the box and crop the overflow.
    Cover,
    /// Stretch to the exact box, ignoring aspect ratio.
    Fill,
    /// Scale to fit inside the box without padding; output may be smaller.
    Inside,
}

impl FitMode {
    pub fn as_str(self) -> &'static str {
        match self {
            FitMode::Contain => "contain",
            FitMode::Cover => "cover",
            FitMode::Fill => "fill",
            FitMode::Inside => "inside",
        }
    }
}

impl fmt::Display for FitMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FitMode {
    type Err = DomainError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "contain" => Ok(FitMode::Contain),
            "cover" => Ok(FitMode::Cover),
            "fill" => Ok(FitMode::Fill),
            "inside" => Ok(FitMode::Inside),
            other => Err(DomainError::validation(
                "fit",
                format!("unknown fit mode `{other}`"),
            )),
        }
    }
}

/// Parameters of a single resize/format/quality transform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TransformParams {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub quality: u8,
    #[serde(default)]
    pub fit: FitMode,
}

impl TransformParams {
    pub fn new(width: u32, height: u32, format: ImageFormat, quality: u8) -> Self {
        Self {
            width,
            height,
            format,
            quality,
            fit: FitMode::default(),
        }
    }

    pub fn with_fit(mut self, fit: FitMode) -> Self {
        self.fit = fit;
        self
    }

    pub fn size_label(&self) -> String {
        format!("{}x{}", self.width, self.height)
    }
}

impl fmt::Display for TransformParams {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}x{} {} q{} ({})",
            self.width, self.height, self.format, self.quality, self.fit
        )
    }
}
