//! Banner template catalogue: built-in templates plus optional TOML file.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Deserialize;
use thiserror::Error;
use tracing::info;

use crate::domain::{
    BannerTemplate, DomainError, LayoutAreas, Rect, Rgba, TemplateLayout, TemplateStyle,
};

#[derive(Debug, Error)]
pub enum TemplateError {
    #[error("failed to read template file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse template file: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("template `{id}` is defined more than once")]
    Duplicate { id: String },
    #[error(transparent)]
    Invalid(#[from] DomainError),
}

#[derive(Debug, Deserialize)]
struct TemplateFile {
    #[serde(default)]
    templates: Vec<BannerTemplate>,
}

/// Immutable set of templates keyed by id.
#[derive(Debug, Clone, Default)]
pub struct TemplateCatalog {
    templates: BTreeMap<String, Arc<BannerTemplate>>,
}

impl TemplateCatalog {
    pub fn empty() -> Self {
        Self::default()
    }

    /// The templates that ship with the engine.
    pub fn builtin() -> Self {
        let mut catalog = Self::empty();
        for template in builtin_templates() {
            catalog
                .templates
                .insert(template.id.clone(), Arc::new(template));
        }
        catalog
    }

    /// Built-in templates, extended and overridden by the file at `path`.
    pub fn builtin_with_file(path: &Path) -> Result<Self, TemplateError> {
        let text = std::fs::read_to_string(path).map_err(|source| TemplateError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let mut catalog = Self::builtin();
        let loaded = parse_templates(&text)?;
        let count = loaded.len();
        for template in loaded {
            catalog
                .templates
                .insert(template.id.clone(), Arc::new(template));
        }
        info!(
            target = "kirie::application::templates",
            path = %path.display(),
            count,
            total = catalog.len(),
            "Loaded banner templates from file"
        );
        Ok(catalog)
    }

    /// Add a template, rejecting invalid layouts and duplicate ids.
    pub fn insert(&mut self, template: BannerTemplate) -> Result<(), TemplateError> {
        template.validate()?;
        if self.templates.contains_key(&template.id) {
            return Err(TemplateError::Duplicate { id: template.id });
        }
        self.templates
            .insert(template.id.clone(), Arc::new(template));
        Ok(())
    }

    pub fn get(&self, id: &str) -> Option<Arc<BannerTemplate>> {
        self.templates.get(id).cloned()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.templates.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &BannerTemplate> {
        self.templates.values().map(AsRef::as_ref)
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }
}

/// Parse and validate a `[[templates]]` document.
pub fn parse_templates(text: &str) -> Result<Vec<BannerTemplate>, TemplateError> {
    let file: TemplateFile = toml::from_str(text)?;
    let mut seen = BTreeMap::new();
    for template in &file.templates {
        template.validate()?;
        if seen.insert(template.id.as_str(), ()).is_some() {
            return Err(TemplateError::Duplicate {
                id: template.id.clone(),
            });
        }
    }
    Ok(file.templates)
}

fn leaderboard_areas() -> LayoutAreas {
    LayoutAreas {
        image: Rect::new(0, 0, 728, 90),
        catch_copy: Rect::new(20, 20, 400, 30),
        body_copy: Rect::new(20, 60, 400, 20),
        cta_button: Rect::new(600, 30, 100, 30),
    }
}

fn builtin(
    id: &str,
    description: &str,
    colors: [Rgba; 3],
    image_opacity: f32,
    image_prompt: &str,
    catchphrases: &[&str],
) -> BannerTemplate {
    let [background_color, text_color, button_color] = colors;
    BannerTemplate {
        id: id.to_string(),
        description: description.to_string(),
        layout: TemplateLayout {
            base_width: 728,
            base_height: 90,
            areas: leaderboard_areas(),
            defaults: TemplateStyle {
                background_color,
                text_color,
                button_color,
                font_family: "Noto Sans".to_string(),
                font_size: 24,
                image_opacity,
            },
        },
        image_prompt: image_prompt.to_string(),
        catchphrases: catchphrases.iter().map(ToString::to_string).collect(),
    }
}

fn builtin_templates() -> Vec<BannerTemplate> {
    vec![
        builtin(
            "standard",
            "Light background, dark copy, warm call to action",
            [
                Rgba::WHITE,
                Rgba::opaque(0x33, 0x33, 0x33),
                Rgba::opaque(0xff, 0x6b, 0x6b),
            ],
            0.8,
            "a clean abstract background with soft gradients and gentle light, web banner style",
            &["Something new is here", "See what changed this season"],
        ),
        builtin(
            "night",
            "Dark background with high-contrast copy",
            [
                Rgba::opaque(0x1a, 0x1a, 0x2e),
                Rgba::WHITE,
                Rgba::opaque(0xe9, 0x45, 0x60),
            ],
            0.6,
            "a city skyline at night with neon reflections, cinematic, wide format",
            &["Open late, every night", "Your evening starts here"],
        ),
        builtin(
            "natural",
            "Muted earth tones with a leafy image",
            [
                Rgba::opaque(0xf4, 0xf1, 0xea),
                Rgba::opaque(0x2f, 0x4f, 0x2f),
                Rgba::opaque(0x6b, 0x8e, 0x23),
            ],
            0.9,
            "sunlight through green leaves, shallow depth of field, calm and natural",
            &["Take a breath", "Made with care, close to home"],
        ),
    ]
}
