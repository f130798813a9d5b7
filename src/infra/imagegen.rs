//! Background image generation collaborator.
//!
//! The composer asks a [`BackgroundGenerator`] for a background whenever a
//! caller supplies none. [`HttpImageGenerator`] speaks the OpenAI images API
//! shape (`b64_json` responses); [`UnconfiguredGenerator`] refuses every
//! request so a deployment without an endpoint fails compositions cleanly.

use std::time::Duration;

use async_trait::async_trait;
use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use super::error::InfraError;

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error("no image generation endpoint is configured")]
    Unconfigured,
    #[error("image generation request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("image generation service answered {status}: {body}")]
    Status { status: StatusCode, body: String },
    #[error("image generation response was malformed: {0}")]
    Malformed(String),
    #[error("generated image payload is not valid base64: {0}")]
    Decode(#[from] base64::DecodeError),
}

#[async_trait]
pub trait BackgroundGenerator: Send + Sync {
    async fn generate_image(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<Bytes, GenerationError>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UnconfiguredGenerator;

#[async_trait]
impl BackgroundGenerator for UnconfiguredGenerator {
    async fn generate_image(
        &self,
        _prompt: &str,
        _width: u32,
        _height: u32,
    ) -> Result<Bytes, GenerationError> {
        Err(GenerationError::Unconfigured)
    }
}

#[derive(Debug, Clone)]
pub struct HttpGeneratorConfig {
    pub endpoint: String,
    pub api_key: Option<String>,
    pub model: String,
    pub timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct HttpImageGenerator {
    client: Client,
    config: HttpGeneratorConfig,
}

#[derive(Debug, Serialize)]
struct GenerationRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    n: u8,
    size: String,
    response_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct GenerationResponse {
    #[serde(default)]
    data: Vec<GeneratedImage>,
}

#[derive(Debug, Deserialize)]
struct GeneratedImage {
    b64_json: Option<String>,
}

impl HttpImageGenerator {
    pub fn new(config: HttpGeneratorConfig) -> Result<Self, InfraError> {
        let client = Client::builder()
            .user_agent(concat!("kirie/", env!("CARGO_PKG_VERSION")))
            .timeout(config.timeout)
            .build()?;
        Ok(Self { client, config })
    }
}

#[async_trait]
impl BackgroundGenerator for HttpImageGenerator {
    async fn generate_image(
        &self,
        prompt: &str,
        width: u32,
        height: u32,
    ) -> Result<Bytes, GenerationError> {
        let body = GenerationRequest {
            model: &self.config.model,
            prompt,
            n: 1,
            size: format!("{width}x{height}"),
            response_format: "b64_json",
        };

        let mut request = self.client.post(&self.config.endpoint).json(&body);
        if let Some(key) = self.config.api_key.as_deref() {
            request = request.bearer_auth(key);
        }

        debug!(
            target = "kirie::infra::imagegen",
            endpoint = %self.config.endpoint,
            model = %self.config.model,
            width,
            height,
            "Requesting generated background"
        );
        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            warn!(
                target = "kirie::infra::imagegen",
                %status,
                "Image generation service rejected the request"
            );
            return Err(GenerationError::Status { status, body });
        }

        let payload: GenerationResponse = response.json().await?;
        let encoded = payload
            .data
            .into_iter()
            .find_map(|image| image.b64_json)
            .ok_or_else(|| GenerationError::Malformed("no b64_json image in response".into()))?;
        let decoded = STANDARD.decode(encoded.trim())?;
        if decoded.is_empty() {
            return Err(GenerationError::Malformed("empty image payload".into()));
        }
        Ok(Bytes::from(decoded))
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderMap;
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::{Value, json};

    use super::*;

    async fn spawn_stub(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{addr}/v1/images/generations")
    }

    fn generator(endpoint: String) -> HttpImageGenerator {
        HttpImageGenerator::new(HttpGeneratorConfig {
            endpoint,
            api_key: Some("secret".into()),
            model: "dall-e-3".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    #[tokio::test]
    async fn decodes_b64_json_payloads() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|headers: HeaderMap, Json(body): Json<Value>| async move {
                assert_eq!(headers["authorization"], "Bearer secret");
                assert_eq!(body["size"], "728x90");
                assert_eq!(body["response_format"], "b64_json");
                Json(json!({ "data": [{ "b64_json": STANDARD.encode(b"png-bytes") }] }))
            }),
        );
        let endpoint = spawn_stub(router).await;

        let bytes = generator(endpoint)
            .generate_image("sunset", 728, 90)
            .await
            .unwrap();
        assert_eq!(&bytes[..], b"png-bytes");
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|| async { (StatusCode::TOO_MANY_REQUESTS, "slow down") }),
        );
        let endpoint = spawn_stub(router).await;

        let err = generator(endpoint)
            .generate_image("sunset", 728, 90)
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            GenerationError::Status { status, ref body }
                if status == StatusCode::TOO_MANY_REQUESTS && body == "slow down"
        ));
    }

    #[tokio::test]
    async fn missing_image_is_malformed() {
        let router = Router::new().route(
            "/v1/images/generations",
            post(|| async { Json(json!({ "data": [{ "url": "https://example.com/x.png" }] })) }),
        );
        let endpoint = spawn_stub(router).await;

        let err = generator(endpoint)
            .generate_image("sunset", 728, 90)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Malformed(_)));
    }

    #[tokio::test]
    async fn unconfigured_generator_always_fails() {
        let err = UnconfiguredGenerator
            .generate_image("anything", 1, 1)
            .await
            .unwrap_err();
        assert!(matches!(err, GenerationError::Unconfigured));
    }
}
