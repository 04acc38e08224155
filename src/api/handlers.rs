//! Read-only handlers over the connection store.

use super::ApiState;
use crate::storage::StoredConnection;
use axum::extract::rejection::QueryRejection;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Categorical raw column whose indicators carry the protocol.
pub const PROTOCOL_COLUMN: &str = "protocol_type";
pub const UNKNOWN_PROTOCOL: &str = "unknown";

#[derive(Serialize)]
pub struct HealthResponse {
    status: &'static str,
    version: &'static str,
    schema_version: String,
    features: usize,
    timestamp: i64,
}

pub async fn health(State(state): State<ApiState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy",
        version: env!("CARGO_PKG_VERSION"),
        schema_version: state.schema.version().to_string(),
        features: state.schema.len(),
        timestamp: chrono::Utc::now().timestamp(),
    })
}

#[derive(Debug, Default, Deserialize)]
pub struct RecentQuery {
    pub limit: Option<usize>,
    /// Protocol label (`tcp`, `udp`, ...); `all` or absent disables filtering
    pub protocol: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConnectionView {
    pub id: i64,
    pub timestamp: String,
    pub protocol: String,
    pub predicted_class: String,
    pub prediction_probability: f64,
    pub features: Map<String, Value>,
}

/// Query failures are reported as a body, never as a dropped connection.
#[derive(Debug)]
pub enum QueryFailure {
    /// Malformed query string
    BadRequest(String),
    /// Store read failed
    Store(String),
}

impl IntoResponse for QueryFailure {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            QueryFailure::BadRequest(detail) => {
                tracing::warn!(error = %detail, "rejected connection query");
                (StatusCode::BAD_REQUEST, "invalid query")
            }
            QueryFailure::Store(detail) => {
                tracing::error!(error = %detail, "connection query failed");
                (StatusCode::INTERNAL_SERVER_ERROR, "query failed")
            }
        };
        let body = Json(json!({
            "error": message,
            "data": [],
        }));
        (status, body).into_response()
    }
}

/// Most recent stored connections, newest first.
pub async fn recent(
    State(state): State<ApiState>,
    query: Result<Query<RecentQuery>, QueryRejection>,
) -> Result<Json<Vec<ConnectionView>>, QueryFailure> {
    let Query(query) = query.map_err(|e| QueryFailure::BadRequest(e.body_text()))?;
    let limit = query
        .limit
        .unwrap_or(state.default_limit)
        .clamp(1, state.max_limit.max(1));

    let protocol = query
        .protocol
        .map(|p| p.trim().to_ascii_lowercase())
        .filter(|p| !p.is_empty() && p != "all");

    let indicator = match protocol {
        Some(ref p) => match state.protocol_levels.iter().find(|(level, _)| level == p) {
            Some((_, feature)) => Some(feature.clone()),
            None => return Ok(Json(Vec::new())),
        },
        None => None,
    };

    let store = state.store.clone();
    let rows = tokio::task::spawn_blocking(move || store.recent(limit, indicator.as_deref()))
        .await
        .map_err(|e| QueryFailure::Store(e.to_string()))?
        .map_err(|e| QueryFailure::Store(e.to_string()))?;

    Ok(Json(rows.into_iter().map(|r| view(&state, r)).collect()))
}

fn view(state: &ApiState, row: StoredConnection) -> ConnectionView {
    let protocol = state
        .protocol_levels
        .iter()
        .find(|(_, feature)| {
            state
                .schema
                .index_of(feature)
                .and_then(|i| row.features.get(i))
                .map(|v| *v >= 0.5)
                .unwrap_or(false)
        })
        .map(|(level, _)| level.clone())
        .unwrap_or_else(|| UNKNOWN_PROTOCOL.to_string());

    let features = state
        .schema
        .names()
        .iter()
        .zip(&row.features)
        .map(|(name, v)| (name.clone(), json!(v)))
        .collect();

    ConnectionView {
        id: row.id,
        timestamp: row.timestamp,
        protocol,
        predicted_class: row.predicted_class,
        prediction_probability: row.prediction_probability,
        features,
    }
}
