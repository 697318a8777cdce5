use axum::{
    Json,
    http::{HeaderValue, StatusCode, header},
    response::{IntoResponse, Response},
};
use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::metrics::REJECTIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    // anonymous fixed window
    Rate,
    // subscriber calendar month
    Quota,
}

/// Every way an analysis request can end without a result.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AnalyzeError {
    #[error("{0}")]
    InvalidInput(String),

    #[error("Authentication required. Please sign in.")]
    Unauthenticated,

    #[error("An active subscription is required. Subscribe to unlock monthly analyses.")]
    Forbidden,

    #[error("{}", limit_message(.kind, .limit, .cadence))]
    LimitExceeded {
        kind: LimitKind,
        limit: u32,
        cadence: String,
        resets_at: DateTime<Utc>,
        retry_after_secs: u64,
    },

    #[error("AI service is busy. Please try again in a moment.")]
    UpstreamUnavailable,

    #[error("Analysis failed. Please try again.")]
    GenerationFailed,
}

fn limit_message(kind: &LimitKind, limit: &u32, cadence: &str) -> String {
    match kind {
        LimitKind::Rate => format!(
            "Rate limit exceeded: {limit} analyses {cadence}. Try again later or upgrade to Pro."
        ),
        LimitKind::Quota => format!(
            "Monthly quota reached: {limit} analyses {cadence}. Your quota resets at the start of next month."
        ),
    }
}

impl AnalyzeError {
    pub fn status(&self) -> StatusCode {
        match self {
            AnalyzeError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AnalyzeError::Unauthenticated => StatusCode::UNAUTHORIZED,
            AnalyzeError::Forbidden => StatusCode::FORBIDDEN,
            AnalyzeError::LimitExceeded { .. } => StatusCode::TOO_MANY_REQUESTS,
            AnalyzeError::UpstreamUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            AnalyzeError::GenerationFailed => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    // Metric label
    pub fn reason(&self) -> &'static str {
        match self {
            AnalyzeError::InvalidInput(_) => "invalid_input",
            AnalyzeError::Unauthenticated => "unauthenticated",
            AnalyzeError::Forbidden => "forbidden",
            AnalyzeError::LimitExceeded {
                kind: LimitKind::Rate,
                ..
            } => "rate_limited",
            AnalyzeError::LimitExceeded {
                kind: LimitKind::Quota,
                ..
            } => "quota_exceeded",
            AnalyzeError::UpstreamUnavailable => "upstream_unavailable",
            AnalyzeError::GenerationFailed => "generation_failed",
        }
    }
}

pub const RATE_LIMIT_LIMIT: &str = "x-ratelimit-limit";
pub const RATE_LIMIT_REMAINING: &str = "x-ratelimit-remaining";
pub const RATE_LIMIT_RESET: &str = "x-ratelimit-reset";

#[derive(Serialize)]
pub struct ErrorBody {
    pub error: String,
}

impl IntoResponse for AnalyzeError {
    fn into_response(self) -> Response {
        REJECTIONS.with_label_values(&[self.reason()]).inc();

        let retry = match &self {
            AnalyzeError::LimitExceeded {
                limit,
                retry_after_secs,
                resets_at,
                ..
            } => Some((*limit, *retry_after_secs, *resets_at)),
            _ => None,
        };

        let mut response = (
            self.status(),
            Json(ErrorBody {
                error: self.to_string(),
            }),
        )
            .into_response();

        if let Some((limit, secs, resets_at)) = retry {
            let headers = response.headers_mut();
            headers.insert(header::RETRY_AFTER, HeaderValue::from(secs));
            headers.insert(RATE_LIMIT_LIMIT, HeaderValue::from(limit));
            headers.insert(RATE_LIMIT_REMAINING, HeaderValue::from_static("0"));
            if let Ok(value) = HeaderValue::from_str(&resets_at.to_rfc3339()) {
                headers.insert(RATE_LIMIT_RESET, value);
            }
        }

        response
    }
}
