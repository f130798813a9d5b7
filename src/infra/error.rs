use thiserror::Error;

/// Failures while wiring the engine to the outside world.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
    #[error("failed to build the image generation client: {0}")]
    HttpClient(#[from] reqwest::Error),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
