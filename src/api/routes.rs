//! API route definitions.

use crate::analysis::model::validate_hour;
use crate::analysis::AnalyticsError;
use crate::api::state::AppState;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;
use serde_json::{json, Value};

pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/access-counts", get(access_counts))
        .route("/decomposition", get(decomposition))
        .route("/predict", get(predict))
        .route("/observation-span", get(observation_span))
        .route("/model", get(model_status))
        .route("/model/retrain", post(retrain))
}

/// Failures rendered as a JSON payload. Analytics failures keep a 200 status
/// so dashboards always get a parseable body with an `error` field.
#[derive(Debug)]
pub enum ApiError {
    Analytics(AnalyticsError),
    BadHourParam(Option<String>),
    Internal(String),
}

impl From<AnalyticsError> for ApiError {
    fn from(e: AnalyticsError) -> Self {
        Self::Analytics(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            Self::Analytics(e) => {
                tracing::warn!(kind = e.kind(), error = %e, "analytics request failed");
                (
                    StatusCode::OK,
                    Json(json!({ "error": e.to_string(), "kind": e.kind() })),
                )
                    .into_response()
            }
            Self::BadHourParam(raw) => {
                tracing::debug!(?raw, "rejected hour parameter");
                (
                    StatusCode::OK,
                    Json(json!({
                        "error": "hour must be an integer between 0 and 23",
                        "kind": "invalid_hour"
                    })),
                )
                    .into_response()
            }
            Self::Internal(msg) => {
                tracing::error!(error = %msg, "internal error");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal error", "kind": "internal" })),
                )
                    .into_response()
            }
        }
    }
}

/// Run storage-bound analytics work off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, ApiError>
where
    F: FnOnce() -> Result<T, AnalyticsError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| ApiError::Internal(e.to_string()))?
        .map_err(ApiError::from)
}

pub async fn health() -> Json<Value> {
    Json(json!({
        "data": {
            "status": "ok",
            "version": env!("CARGO_PKG_VERSION")
        },
        "meta": {
            "timestamp": chrono::Utc::now().to_rfc3339(),
        }
    }))
}

async fn access_counts(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let aggregation = blocking(move || state.access_counts()).await?;
    Ok(Json(json!({
        "data": aggregation.series,
        "meta": {
            "points": aggregation.series.len(),
            "dropped": aggregation.dropped,
        }
    })))
}

#[derive(Debug, Deserialize)]
struct DecompositionQuery {
    period: Option<usize>,
}

async fn decomposition(
    State(state): State<AppState>,
    Query(q): Query<DecompositionQuery>,
) -> Result<Json<Value>, ApiError> {
    let result = blocking(move || state.decomposition(q.period)).await?;
    Ok(Json(json!({
        "data": {
            "trend": result.trend,
            "seasonal": result.seasonal,
            "residual": result.residual,
        },
        "meta": {
            "period": result.period,
            "points": result.trend.len(),
            "seasonal_estimated": result.seasonal_estimated,
        }
    })))
}

#[derive(Debug, Deserialize)]
struct PredictQuery {
    hour: Option<String>,
}

async fn predict(
    State(state): State<AppState>,
    Query(q): Query<PredictQuery>,
) -> Result<Json<Value>, ApiError> {
    let hour = q
        .hour
        .as_deref()
        .and_then(|h| h.trim().parse::<i64>().ok())
        .ok_or_else(|| ApiError::BadHourParam(q.hour.clone()))?;
    validate_hour(hour)?;

    let probability = state.estimator.predict(hour)?;
    Ok(Json(json!({
        "data": {
            "hour": hour,
            "probability": probability,
        }
    })))
}

async fn observation_span(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let span = blocking(move || state.observation_span()).await?;
    Ok(Json(json!({ "data": span })))
}

async fn model_status(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "data": {
            "state": state.estimator.phase(),
            "model": state.estimator.model().as_deref(),
        }
    }))
}

async fn retrain(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
    let model = blocking(move || state.retrain()).await?;
    Ok(Json(json!({
        "data": {
            "state": "ready",
            "model": &*model,
        }
    })))
}
