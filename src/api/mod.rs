pub mod routes;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue, Method};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::data::browser::Browser;
use crate::execution::pipeline::PricePipeline;

/// Shared by every handler.
pub struct AppState<B: Browser> {
    pub pipeline: Arc<PricePipeline<B>>,
}

impl<B: Browser> Clone for AppState<B> {
    fn clone(&self) -> Self {
        Self {
            pipeline: Arc::clone(&self.pipeline),
        }
    }
}

pub fn router<B: Browser + 'static>(pipeline: PricePipeline<B>, allowed_origin: &str) -> Result<Router> {
    let origin: HeaderValue = allowed_origin
        .parse()
        .with_context(|| format!("invalid CORS origin {}", allowed_origin))?;
    let cors = CorsLayer::new()
        .allow_origin(origin)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE]);

    let state = AppState {
        pipeline: Arc::new(pipeline),
    };

    Ok(Router::new()
        .route("/health", get(routes::health))
        .route("/predict_prices", post(routes::predict_prices::<B>))
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state))
}
