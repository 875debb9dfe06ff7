//! HTTP handlers.

use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};

use super::AppState;
use crate::data::browser::Browser;
use crate::data::navigator::NavigationError;
use crate::execution::pipeline::PipelineError;
use crate::forecast::types::ForecastResult;

#[derive(Debug, Deserialize)]
pub struct PredictRequest {
    #[serde(default, alias = "state")]
    pub region: Option<String>,
    #[serde(default)]
    pub market: Option<String>,
    #[serde(default)]
    pub commodity: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct PredictResponse {
    pub region: String,
    pub market: String,
    pub commodity: String,
    pub data_file: Option<String>,
    pub predictions: ForecastResult,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    available_markets: Option<Vec<String>>,
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
    available_markets: Option<Vec<String>>,
}

impl ApiError {
    fn bad_request(message: impl Into<String>) -> Self {
        Self {
            status: StatusCode::BAD_REQUEST,
            message: message.into(),
            available_markets: None,
        }
    }
}

impl From<PipelineError> for ApiError {
    fn from(e: PipelineError) -> Self {
        let status = match &e {
            PipelineError::NoData | PipelineError::InvalidInput(_) => StatusCode::NOT_FOUND,
            PipelineError::InsufficientData(_) => StatusCode::UNPROCESSABLE_ENTITY,
            PipelineError::ModelFailed(_) | PipelineError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::ScrapeFailed(NavigationError::Exhausted { .. }) => StatusCode::BAD_GATEWAY,
            PipelineError::ScrapeFailed(_) => StatusCode::INTERNAL_SERVER_ERROR,
            PipelineError::BudgetExceeded(_) => StatusCode::GATEWAY_TIMEOUT,
        };
        let available_markets = match &e {
            PipelineError::InvalidInput(NavigationError::MarketNotAvailable { available, .. }) => {
                Some(available.clone())
            }
            _ => None,
        };
        Self {
            status,
            message: e.to_string(),
            available_markets,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            error: self.message,
            available_markets: self.available_markets,
        };
        (self.status, Json(body)).into_response()
    }
}

/// Liveness probe.
pub async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "alive",
        "service": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION")
    }))
}

fn required(value: Option<String>, name: &str) -> Result<String, ApiError> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::bad_request(format!("Missing required field: {}", name)))
}

pub async fn predict_prices<B: Browser + 'static>(
    State(state): State<AppState<B>>,
    payload: Result<Json<PredictRequest>, JsonRejection>,
) -> Result<Json<PredictResponse>, ApiError> {
    let Json(req) = payload.map_err(|e| ApiError::bad_request(e.body_text()))?;
    let region = required(req.region, "region")?;
    let market = required(req.market, "market")?;
    let commodity = required(req.commodity, "commodity")?;

    let prediction = state.pipeline.predict(&region, &market, &commodity).await?;

    Ok(Json(PredictResponse {
        region: prediction.query.region,
        market: prediction.query.market,
        commodity: prediction.query.commodity,
        data_file: prediction.data_file.map(|p| p.display().to_string()),
        predictions: prediction.result,
    }))
}
