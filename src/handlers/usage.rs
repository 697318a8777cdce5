use axum::{Json, extract::State, http::HeaderMap};
use std::sync::Arc;

use crate::error::AnalyzeError;
use crate::gate::UsageReport;
use crate::identity::Credentials;
use crate::state::AppState;

// What the caller has used in the current window; never consumes
pub async fn usage_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
) -> Result<Json<UsageReport>, AnalyzeError> {
    let creds = Credentials::from_headers(&headers);
    state.gate.usage(&creds).await.map(Json)
}
