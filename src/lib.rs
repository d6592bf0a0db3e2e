pub mod api;
pub mod config;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

use crate::config::IngestConfig;
use crate::services::encoder::{VariantEncoder, WebpEncoder};
use crate::services::fan_out::FanOutWriter;
use axum::{
    Router,
    middleware::from_fn,
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

#[derive(OpenApi)]
#[openapi(
    paths(
        api::handlers::health::health_check,
        api::handlers::uploads::upload_list,
        api::handlers::uploads::upload_item,
        api::handlers::uploads::upload_media,
    ),
    components(
        schemas(
            api::handlers::health::HealthResponse,
            api::handlers::uploads::MediaUploadResponse,
            services::forms::ResolvedList,
            services::forms::ResolvedItem,
            services::forms::MediaRecord,
            services::forms::TagPlan,
            services::forms::item::NewTag,
        )
    ),
    tags(
        (name = "uploads", description = "Form upload endpoints"),
        (name = "system", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: IngestConfig,
    pub writer: Arc<FanOutWriter>,
}

impl AppState {
    /// State backed by the WebP encoder.
    pub fn new(config: IngestConfig) -> Self {
        Self::with_encoder(config, Arc::new(WebpEncoder))
    }

    pub fn with_encoder(config: IngestConfig, encoder: Arc<dyn VariantEncoder>) -> Self {
        let writer = Arc::new(FanOutWriter::new(encoder, config.fanout_queue_depth));
        Self { config, writer }
    }
}

pub fn create_app(state: AppState) -> Router {
    Router::new()
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()))
        .route("/health", get(api::handlers::health::health_check))
        .route("/lists/:list_id", post(api::handlers::uploads::upload_list))
        .route(
            "/lists/:list_id/items/:item_id",
            post(api::handlers::uploads::upload_item),
        )
        .route(
            "/items/:item_id/media",
            post(api::handlers::uploads::upload_media),
        )
        .layer(from_fn(api::middleware::request_id::request_id_middleware))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any)
                .expose_headers(Any),
        )
        .layer(axum::extract::DefaultBodyLimit::max(state.config.body_limit()))
        .with_state(state)
}
