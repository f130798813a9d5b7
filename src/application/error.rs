use std::time::Duration;

use thiserror::Error;

use crate::{
    config::LoadError,
    domain::DomainError,
    executor::{SubmitError, TaskError},
    infra::{error::InfraError, imagegen::GenerationError},
};

use super::raster::RasterError;
use super::templates::TemplateError;

/// Failure taxonomy shared by the transformer and the composer.
///
/// Every variant carries the request context a caller needs to log the
/// failure; none of them expose internal state beyond the cause chain.
#[derive(Debug, Error)]
pub enum MediaError {
    #[error("invalid {category} request: {reason}")]
    Validation {
        category: &'static str,
        reason: String,
    },
    #[error("image transform failed for {params}: {source}")]
    Transform {
        params: String,
        #[source]
        source: TaskError<RasterError>,
    },
    #[error("banner composition failed for template `{template_id}` at {size}: {source}")]
    Composition {
        template_id: String,
        size: String,
        #[source]
        source: TaskError<RasterError>,
    },
    #[error("{category} deadline of {}ms exceeded ({context})", .deadline.as_millis())]
    Timeout {
        category: &'static str,
        deadline: Duration,
        context: String,
    },
    #[error("background generation failed for template `{template_id}`: {source}")]
    Upstream {
        template_id: String,
        #[source]
        source: GenerationError,
    },
    #[error("{category} processing is saturated: {source}")]
    Overloaded {
        category: &'static str,
        #[source]
        source: SubmitError,
    },
}

impl MediaError {
    pub fn validation(category: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            category,
            reason: reason.into(),
        }
    }

    pub fn from_domain(category: &'static str, err: DomainError) -> Self {
        Self::validation(category, err.to_string())
    }

    /// Value of the `error_type` metric label.
    pub fn kind(&self) -> &'static str {
        match self {
            MediaError::Validation { .. } => "validation",
            MediaError::Transform { .. } => "transform",
            MediaError::Composition { .. } => "composition",
            MediaError::Timeout { .. } => "timeout",
            MediaError::Upstream { .. } => "upstream",
            MediaError::Overloaded { .. } => "overloaded",
        }
    }

    /// Whether re-submitting the same request may succeed. Validation
    /// failures never will; upstream failures are left to the caller's
    /// judgement and are not retried automatically.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            MediaError::Transform { .. }
                | MediaError::Composition { .. }
                | MediaError::Timeout { .. }
                | MediaError::Overloaded { .. }
        )
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Template(#[from] TemplateError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }
}
