mod analyze;
mod health;
mod metrics;
mod usage;

use axum::{
    Router,
    routing::{get, post},
};
use std::sync::Arc;

use crate::state::AppState;

pub use analyze::analyze_handler;
pub use health::health_handler;
pub use metrics::metrics_handler;
pub use usage::usage_handler;

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .route("/analyze", post(analyze_handler))
        .route("/usage", get(usage_handler))
        .route("/metrics", get(metrics_handler))
        .with_state(state)
}
