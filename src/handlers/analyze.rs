use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::HeaderMap,
    response::{IntoResponse, Response},
};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc::error::TrySendError, oneshot};
use tracing::{debug, error, warn};

use crate::error::{AnalyzeError, RATE_LIMIT_LIMIT, RATE_LIMIT_REMAINING, RATE_LIMIT_RESET};
use crate::identity::Credentials;
use crate::metrics::{REQUEST_LATENCY, REQUEST_TOTAL};
use crate::models::{AnalysisJob, AnalyzeRequest};
use crate::state::AppState;

pub async fn analyze_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Result<Json<AnalyzeRequest>, JsonRejection>,
) -> Result<Response, AnalyzeError> {
    REQUEST_TOTAL.inc();

    // an unreadable body is treated like a missing caseText
    let case_text = match body {
        Ok(Json(req)) => req.case_text,
        Err(rejection) => {
            debug!(error = %rejection, "request body rejected");
            None
        }
    };

    let creds = Credentials::from_headers(&headers);
    let admission = state.gate.admit(&creds, case_text.as_deref()).await?;

    let rate_headers = [
        (RATE_LIMIT_LIMIT, admission.limit.to_string()),
        (RATE_LIMIT_REMAINING, admission.remaining().to_string()),
        (RATE_LIMIT_RESET, admission.resets_at.to_rfc3339()),
    ];
    debug!(identity = ?admission.identity, used = admission.used, "queueing analysis");

    let start_time = Instant::now();

    let (response_tx, response_rx) = oneshot::channel();
    let job = AnalysisJob {
        case_text: admission.case_text,
        response_tx,
    };

    state.job_tx.try_send(job).map_err(|e| match e {
        TrySendError::Full(_) => {
            warn!("analysis queue full, turning request away");
            AnalyzeError::UpstreamUnavailable
        }
        TrySendError::Closed(_) => {
            error!("analysis worker is not running");
            AnalyzeError::GenerationFailed
        }
    })?;

    // wait for response from worker
    let analysis = response_rx
        .await
        .map_err(|_| AnalyzeError::GenerationFailed)??;

    REQUEST_LATENCY.observe(start_time.elapsed().as_secs_f64());

    Ok((rate_headers, Json(analysis)).into_response())
}
