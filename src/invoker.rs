use async_trait::async_trait;
use reqwest::StatusCode;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::AnalyzeError;
use crate::models::{
    CaseAnalysis, ChatMessage, ChatRequest, ChatResponse, ModelAnalysis, ResponseFormat,
};

const SYSTEM_PROMPT: &str = r#"You are CasePrep AI, an analyst who prepares MBA students for business case discussions. Read the case supplied by the user and answer with a single JSON object shaped exactly like this:

{
  "title": "short case title inferred from the text",
  "frameworks": [
    {
      "name": "strategy framework, e.g. Porter's Five Forces, SWOT, PESTEL, Value Chain, BCG Matrix, Ansoff Matrix",
      "relevance": "one or two sentences on why it fits this case",
      "application": ["concrete point tied to this case", "another", "another"]
    }
  ],
  "keyQuestions": ["ten probing discussion questions a professor would raise"],
  "executiveSummary": "three paragraphs: the situation, the central tension, what is at stake",
  "keyMetrics": [
    { "metric": "name", "value": "figure taken from the case", "significance": "what it means strategically" }
  ],
  "protagonistDecision": {
    "recommendation": "two or three sentences on what the protagonist should do",
    "reasoning": ["reason", "reason", "reason"],
    "risks": ["risk", "risk"]
  },
  "counterArguments": [
    {
      "position": "alternative stance",
      "argument": "the strongest case for it in two or three sentences",
      "rebuttal": "how to answer it"
    }
  ]
}

Guidelines:
- Pick 3 to 5 frameworks and apply each one to the facts of this case rather than in general terms.
- Questions should be Socratic and force students to take a position.
- Pull every meaningful number out of the case into keyMetrics.
- Give 3 or 4 counter-arguments.
- Name the people, companies and figures from the case.
- Output JSON only, with no markdown."#;

/// Why the model call did not produce text.
#[derive(Debug, thiserror::Error)]
pub enum UpstreamError {
    // overloaded, throttled, timed out or unreachable; worth retrying later
    #[error("upstream unavailable: {0}")]
    Busy(String),
    #[error("upstream request failed: {0}")]
    Failed(String),
    #[error("upstream returned no content")]
    Empty,
}

impl From<UpstreamError> for AnalyzeError {
    fn from(err: UpstreamError) -> Self {
        match err {
            UpstreamError::Busy(_) => AnalyzeError::UpstreamUnavailable,
            UpstreamError::Failed(_) | UpstreamError::Empty => AnalyzeError::GenerationFailed,
        }
    }
}

/// Sends case text to a model and returns its raw JSON reply.
#[async_trait]
pub trait ModelClient: Send + Sync {
    async fn complete(&self, case_text: &str) -> Result<String, UpstreamError>;
}

pub struct OpenAiClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    temperature: f32,
    max_tokens: u32,
    timeout: Duration,
}

impl OpenAiClient {
    pub fn new(
        client: reqwest::Client,
        base_url: &str,
        api_key: String,
        model: String,
        temperature: f32,
        max_tokens: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model,
            temperature,
            max_tokens,
            timeout,
        }
    }
}

fn is_busy_status(status: StatusCode) -> bool {
    matches!(
        status,
        StatusCode::TOO_MANY_REQUESTS
            | StatusCode::BAD_GATEWAY
            | StatusCode::SERVICE_UNAVAILABLE
            | StatusCode::GATEWAY_TIMEOUT
    )
}

// The timeout also covers reading the body, so a stall mid-body is busy too
fn transport_error(e: reqwest::Error) -> UpstreamError {
    if e.is_timeout() || e.is_connect() || e.is_body() {
        UpstreamError::Busy(e.to_string())
    } else if e.is_decode() {
        UpstreamError::Failed(format!("parse error: {e}"))
    } else {
        UpstreamError::Failed(e.to_string())
    }
}

#[async_trait]
impl ModelClient for OpenAiClient {
    async fn complete(&self, case_text: &str) -> Result<String, UpstreamError> {
        let body = ChatRequest {
            model: &self.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT.to_string(),
                },
                ChatMessage {
                    role: "user",
                    content: format!("Analyze this business case:\n\n{case_text}"),
                },
            ],
            temperature: self.temperature,
            max_tokens: self.max_tokens,
            response_format: ResponseFormat {
                kind: "json_object",
            },
        };

        let res = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .bearer_auth(&self.api_key)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(transport_error)?;

        let status = res.status();
        if is_busy_status(status) {
            return Err(UpstreamError::Busy(format!("status {status}")));
        }
        if !status.is_success() {
            return Err(UpstreamError::Failed(format!("status {status}")));
        }

        let reply: ChatResponse = res
            .json()
            .await
            .map_err(transport_error)?;

        reply
            .choices
            .into_iter()
            .next()
            .and_then(|choice| choice.message.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(UpstreamError::Empty)
    }
}

/// Runs one analysis end to end: model call, shape check, id and timestamp.
pub async fn run_analysis(
    client: &dyn ModelClient,
    case_text: &str,
) -> Result<CaseAnalysis, AnalyzeError> {
    let content = client.complete(case_text).await.map_err(|e| {
        warn!(error = %e, "model call failed");
        AnalyzeError::from(e)
    })?;

    let analysis: ModelAnalysis = serde_json::from_str(&content).map_err(|e| {
        warn!(error = %e, "model reply is not a valid analysis document");
        AnalyzeError::GenerationFailed
    })?;

    let stamped = CaseAnalysis::stamp(analysis);
    debug!(id = %stamped.id, "analysis generated");
    Ok(stamped)
}
