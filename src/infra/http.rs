//! Operational HTTP surface: health report and template listing.

use std::sync::Arc;
use std::time::Instant;

use axum::{
    Json, Router,
    body::Body,
    extract::State,
    http::Request,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::get,
};
use serde::Serialize;
use time::OffsetDateTime;
use tracing::{debug, error, warn};
use uuid::Uuid;

use crate::application::{
    BannerComposer, ComposerStats, ImageTransformer, MediaEngine, TransformerStats,
};
use crate::cache::{CacheStore, HealthReport};

#[derive(Clone)]
pub struct AdminState {
    cache: Arc<CacheStore>,
    transformer: Arc<ImageTransformer>,
    composer: Arc<BannerComposer>,
}

impl AdminState {
    pub fn from_engine(engine: &MediaEngine) -> Self {
        Self {
            cache: Arc::clone(engine.cache()),
            transformer: Arc::clone(engine.transformer()),
            composer: Arc::clone(engine.composer()),
        }
    }
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    #[serde(serialize_with = "time::serde::rfc3339::serialize")]
    checked_at: OffsetDateTime,
    cache: HealthReport,
    image: TransformerStats,
    banner: ComposerStats,
}

#[derive(Debug, Serialize)]
struct TemplateSummary<'a> {
    id: &'a str,
    description: &'a str,
    base_width: u32,
    base_height: u32,
    catchphrases: &'a [String],
}

#[derive(Clone)]
struct RequestContext {
    request_id: String,
}

pub fn build_admin_router(state: AdminState) -> Router {
    Router::new()
        .route("/healthz", get(health))
        .route("/templates", get(templates))
        .layer(middleware::from_fn(log_responses))
        .layer(middleware::from_fn(set_request_context))
        .with_state(state)
}

async fn health(State(state): State<AdminState>) -> Json<HealthResponse> {
    let cache = state.cache.health_report();
    Json(HealthResponse {
        status: cache.status,
        checked_at: OffsetDateTime::now_utc(),
        cache,
        image: state.transformer.stats(),
        banner: state.composer.stats(),
    })
}

async fn templates(State(state): State<AdminState>) -> Response {
    let summaries: Vec<TemplateSummary<'_>> = state
        .composer
        .catalog()
        .iter()
        .map(|template| TemplateSummary {
            id: &template.id,
            description: &template.description,
            base_width: template.layout.base_width,
            base_height: template.layout.base_height,
            catchphrases: &template.catchphrases,
        })
        .collect();
    Json(summaries).into_response()
}

async fn set_request_context(mut request: Request<Body>, next: Next) -> Response {
    let ctx = RequestContext {
        request_id: Uuid::new_v4().to_string(),
    };
    request.extensions_mut().insert(ctx.clone());

    let mut response = next.run(request).await;
    response.extensions_mut().insert(ctx);
    response
}

async fn log_responses(request: Request<Body>, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();
    let start = Instant::now();
    let request_id = request
        .extensions()
        .get::<RequestContext>()
        .map(|ctx| ctx.request_id.clone())
        .unwrap_or_default();

    let response = next.run(request).await;
    let status = response.status();
    let elapsed_ms = start.elapsed().as_millis() as u64;

    if status.is_server_error() {
        error!(
            target = "kirie::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms,
            request_id,
            "request failed",
        );
    } else if status.is_client_error() {
        warn!(
            target = "kirie::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms,
            request_id,
            "client request error",
        );
    } else {
        debug!(
            target = "kirie::http::response",
            status = status.as_u16(),
            method = %method,
            path = %uri.path(),
            elapsed_ms,
            request_id,
            "request served",
        );
    }

    response
}
