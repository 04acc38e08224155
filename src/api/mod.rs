//! Query API: a thin read-only HTTP surface over the connection store.

pub mod handlers;

use crate::config::ApiConfig;
use crate::schema::ReferenceSchema;
use crate::storage::SqliteStore;
use axum::routing::get;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

/// Shared handler state
#[derive(Clone)]
pub struct ApiState {
    pub store: Arc<SqliteStore>,
    pub schema: Arc<ReferenceSchema>,
    pub default_limit: usize,
    pub max_limit: usize,
    /// `(lowercase protocol level, indicator feature name)` pairs
    pub protocol_levels: Arc<[(String, String)]>,
}

impl ApiState {
    pub fn new(store: Arc<SqliteStore>, config: &ApiConfig) -> Self {
        let schema = Arc::clone(store.schema());
        let protocol_levels = schema
            .indicator_levels(handlers::PROTOCOL_COLUMN)
            .into_iter()
            .map(|(level, i)| (level.to_ascii_lowercase(), schema.names()[i].clone()))
            .collect();
        Self {
            store,
            schema,
            default_limit: config.default_limit,
            max_limit: config.max_limit,
            protocol_levels,
        }
    }
}

pub fn router(state: ApiState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/get_data", get(handlers::recent))
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .with_state(state)
}
